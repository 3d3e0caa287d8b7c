//! 🚀 esx: the front door. Loads config, sets up logging, and drives the library.
//!
//! 🎬 *[narrator voice]* "He only wanted to export one index. He got a cursor leak
//! and a 3am page." This binary closes its cursors. Every time. 🦆
//!
//! ```text
//! esx [--config esx.toml] scroll --index books --max-results 100 > books.ndjson
//! esx [--config esx.toml] load   --index books --file books.ndjson --id-field isbn
//! esx [--config esx.toml] delete --index books --ids a,b,c
//! ```

use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use esx::app_config::BulkConfig;
use esx::bulk::{BulkItemResult, BulkOperation, DeleteOperation, IndexOperation};
use esx::common::RawHit;
use esx::query::{SortField, SourceFilter};
use esx::{EsxError, Pagination, Query, SearchHitStream, SearchOperations};

/// 🔍 Scroll out of, bulk into, and delete from an Elasticsearch index.
#[derive(Debug, Parser)]
#[command(name = "esx", version, about)]
struct Cli {
    /// 🔧 TOML config file, merged over ESX_* environment variables.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 🌊 Stream every matching `_source` to stdout as NDJSON.
    Scroll(ScrollArgs),
    /// 📦 Bulk-index an NDJSON file.
    Load(LoadArgs),
    /// 🗑️ Bulk-delete documents by id.
    Delete(DeleteArgs),
}

#[derive(Debug, Args)]
struct ScrollArgs {
    #[arg(long)]
    index: String,
    /// Engine-native query clause as JSON. Defaults to match_all.
    #[arg(long)]
    query: Option<String>,
    #[arg(long)]
    page_size: Option<usize>,
    /// Stop after this many hits.
    #[arg(long)]
    max_results: Option<usize>,
    /// `field`, `field:asc` or `field:desc`. Repeatable.
    #[arg(long)]
    sort: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    includes: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    excludes: Vec<String>,
}

impl ScrollArgs {
    fn to_query(&self, default_page_size: usize) -> Result<Query> {
        let mut query = match &self.query {
            Some(raw) => Query::native(
                serde_json::from_str(raw).context("💀 --query is not valid JSON. One stray quote and here we are.")?,
            ),
            None => Query::match_all(),
        };
        query.pagination = match (self.page_size, self.max_results) {
            (size, Some(max_results)) => Pagination::limiting(size.unwrap_or(default_page_size), max_results),
            (Some(size), None) => Pagination::paged(0, size),
            (None, None) => Pagination::Unpaged,
        };
        for raw in &self.sort {
            query = query.with_sort(SortField::parse(raw)?);
        }
        if !self.includes.is_empty() || !self.excludes.is_empty() {
            query = query.with_source_filter(SourceFilter {
                includes: self.includes.clone(),
                excludes: self.excludes.clone(),
            });
        }
        Ok(query)
    }
}

#[derive(Debug, Args)]
struct LoadArgs {
    #[arg(long)]
    index: String,
    /// NDJSON, one document per line.
    #[arg(long)]
    file: PathBuf,
    /// Top-level field whose value becomes the document id. Without it the engine picks.
    #[arg(long)]
    id_field: Option<String>,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    #[arg(long)]
    index: String,
    #[arg(long, value_delimiter = ',', required = true)]
    ids: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 📡 stderr, so stdout stays clean NDJSON for whoever is piping us
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like Elasticsearch isn't reachable. \
                Check the url in your config, and that the cluster is actually running. \
                If you're using Docker, `docker ps` is a good first stop. ☕"
            );
        }

        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    if let Some(path) = &cli.config {
        let exists = path.try_exists().with_context(|| {
            format!("💀 Could not check whether the config file '{}' exists.", path.display())
        })?;
        if !exists {
            bail!(
                "💀 Config file '{}' does not exist. Relative paths are relative to where you ran esx, \
                 not where the binary lives. An absolute path settles the argument.",
                path.display()
            );
        }
    }

    let app_config = esx::load_config(cli.config.as_deref())
        .context("💀 Couldn't load the config. Check the file and any ESX_* variables for typos.")?;
    let ops = SearchOperations::from_config(&app_config)
        .await
        .context("💀 Couldn't set up the engine backend.")?;

    match cli.command {
        Command::Scroll(args) => scroll(&ops, args).await,
        Command::Load(args) => load(&ops, &app_config.bulk, args).await,
        Command::Delete(args) => delete(&ops, &app_config.bulk, args).await,
    }
}

// ============================================================
//  🌊 scroll
// ============================================================

async fn scroll(ops: &SearchOperations, args: ScrollArgs) -> Result<()> {
    let query = args.to_query(ops.scroll_config().default_page_size)?;
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg} {pos} hits ({per_sec})")?);
    spinner.set_message(format!("scrolling '{}'", args.index));

    let mut stream = ops
        .search_for_stream_with(&args.index, query, |raw: RawHit| Ok(raw.source.unwrap_or(Value::Null)))
        .await
        .with_context(|| format!("💀 Couldn't open a scroll on '{}'.", args.index))?;
    spinner.enable_steady_tick(Duration::from_millis(120));

    let outcome = write_ndjson(&mut stream, &spinner).await;
    // 🧹 on every path, success or not
    stream.close().await;
    spinner.finish_and_clear();

    let written = outcome.with_context(|| format!("💀 The scroll on '{}' broke off mid-way.", args.index))?;

    let mut table = summary_table();
    table.add_row(vec![Cell::new("index"), Cell::new(&args.index)]);
    table.add_row(vec![Cell::new("hits written"), right(written)]);
    if let Some(total) = stream.total_hits() {
        table.add_row(vec![Cell::new("total hits"), right(total.value)]);
    }
    eprintln!("{table}");
    Ok(())
}

async fn write_ndjson(stream: &mut SearchHitStream<Value>, spinner: &ProgressBar) -> Result<usize> {
    let mut out = BufWriter::new(std::io::stdout());
    while let Some(source) = stream.try_next().await? {
        serde_json::to_writer(&mut out, &source)?;
        out.write_all(b"\n")?;
        spinner.inc(1);
    }
    out.flush()?;
    Ok(stream.delivered())
}

// ============================================================
//  📦 load / delete
// ============================================================

async fn load(ops: &SearchOperations, bulk: &BulkConfig, args: LoadArgs) -> Result<()> {
    let raw = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("💀 Couldn't read '{}'.", args.file.display()))?;
    let operations = parse_ndjson(&raw, &args.index, args.id_field.as_deref())
        .with_context(|| format!("💀 '{}' is not the NDJSON we were promised.", args.file.display()))?;
    info!("📦 loading {} document(s) into '{}'", operations.len(), args.index);
    submit_in_chunks(ops, bulk, operations).await
}

async fn delete(ops: &SearchOperations, bulk: &BulkConfig, args: DeleteArgs) -> Result<()> {
    let operations: Vec<BulkOperation> = args
        .ids
        .iter()
        .map(|id| DeleteOperation::new(&args.index, id).into())
        .collect();
    submit_in_chunks(ops, bulk, operations).await
}

fn parse_ndjson(raw: &str, index: &str, id_field: Option<&str>) -> Result<Vec<BulkOperation>> {
    let mut operations = Vec::new();
    for (line_no, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let source: Value =
            serde_json::from_str(line).with_context(|| format!("line {} is not a JSON document", line_no + 1))?;
        let mut operation = IndexOperation::new(index, source);
        if let Some(field) = id_field {
            operation.id = id_from(&operation.source, field);
        }
        operations.push(operation.into());
    }
    Ok(operations)
}

fn id_from(source: &Value, field: &str) -> Option<String> {
    match source.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// 📊 Per-result counts across every chunk, plus every failed id.
#[derive(Debug, Default)]
struct BulkTally {
    by_result: BTreeMap<String, usize>,
    failed: BTreeMap<String, String>,
}

impl BulkTally {
    fn record(&mut self, results: &[BulkItemResult]) {
        for result in results {
            let key = match result {
                BulkItemResult::Success(success) => success.result.clone().unwrap_or_else(|| "ok".to_string()),
                BulkItemResult::Failure(_) => "failed".to_string(),
            };
            *self.by_result.entry(key).or_default() += 1;
        }
    }

    /// Failed items, counted one by one. `failed` is keyed by id, so shared ids collapse there.
    fn failed_count(&self) -> usize {
        self.by_result.get("failed").copied().unwrap_or_default()
    }
}

async fn submit_in_chunks(ops: &SearchOperations, bulk: &BulkConfig, operations: Vec<BulkOperation>) -> Result<()> {
    let total = operations.len();
    let chunk_size = bulk.max_operations_per_request.max(1);
    let bar = ProgressBar::new(total as u64);
    bar.set_style(ProgressStyle::with_template("{msg}\n| [{bar:40.cyan/blue}] {pos}/{len}")?.progress_chars("=>-"));
    bar.set_message("bulk");

    let mut tally = BulkTally::default();
    let mut remaining = operations.into_iter();
    loop {
        let chunk: Vec<BulkOperation> = remaining.by_ref().take(chunk_size).collect();
        if chunk.is_empty() {
            break;
        }
        let sent = chunk.len() as u64;
        match ops.bulk(chunk, &bulk.options).await {
            Ok(results) => tally.record(&results),
            Err(EsxError::BulkFailure(failure)) => {
                // -- 🚨 partial failure: keep going, report at the end
                tally.record(failure.items());
                tally.failed.extend(failure.failed_documents().clone());
            }
            Err(other) => {
                bar.abandon();
                return Err(other).context("💀 A bulk request didn't make it. Earlier chunks were already applied.");
            }
        }
        bar.inc(sent);
    }
    bar.finish_and_clear();

    let mut table = summary_table();
    table.set_header(vec!["result", "count"]);
    for (result, count) in &tally.by_result {
        table.add_row(vec![Cell::new(result), right(count)]);
    }
    table.add_row(vec![Cell::new("total"), right(total)]);
    println!("{table}");

    let failed = tally.failed_count();
    if failed > 0 {
        let mut failures = summary_table();
        failures.set_header(vec!["id", "failure"]);
        for (id, message) in &tally.failed {
            failures.add_row(vec![Cell::new(id), Cell::new(message)]);
        }
        println!("{failures}");
        bail!("💀 {} of {} operation(s) failed, see the table above.", failed, total);
    }
    Ok(())
}

fn summary_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn right(value: impl ToString) -> Cell {
    Cell::new(value.to_string()).set_alignment(CellAlignment::Right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use esx::bulk::{BulkAction, BulkItemFailure, BulkItemSuccess};
    use serde_json::json;

    fn scroll_args(page_size: Option<usize>, max_results: Option<usize>) -> ScrollArgs {
        ScrollArgs {
            index: "books".into(),
            query: None,
            page_size,
            max_results,
            sort: Vec::new(),
            includes: Vec::new(),
            excludes: Vec::new(),
        }
    }

    #[test]
    fn the_one_where_flags_pick_the_pagination_mode() -> Result<()> {
        assert_eq!(scroll_args(None, None).to_query(500)?.pagination, Pagination::Unpaged);
        assert_eq!(scroll_args(Some(50), None).to_query(500)?.pagination, Pagination::paged(0, 50));
        assert_eq!(scroll_args(None, Some(10)).to_query(500)?.pagination, Pagination::limiting(500, 10));
        Ok(())
    }

    #[test]
    fn the_one_where_sort_and_source_filters_make_it_into_the_query() -> Result<()> {
        let args = ScrollArgs {
            query: Some(r#"{"term":{"genre":"scifi"}}"#.into()),
            sort: vec!["year:desc".into(), "title".into()],
            includes: vec!["title".into()],
            ..scroll_args(Some(10), None)
        };
        let query = args.to_query(500)?;
        assert_eq!(query.query, json!({ "term": { "genre": "scifi" } }));
        assert_eq!(query.sort, vec![SortField::desc("year"), SortField::asc("title")]);
        assert_eq!(query.source_filter.map(|f| f.includes), Some(vec!["title".to_string()]));
        Ok(())
    }

    #[test]
    fn the_one_where_bad_flags_are_caught_before_any_request() {
        let bad_json = ScrollArgs { query: Some("{nope".into()), ..scroll_args(None, None) };
        assert!(bad_json.to_query(500).is_err());
        let bad_sort = ScrollArgs { sort: vec!["year:sideways".into()], ..scroll_args(None, None) };
        assert!(bad_sort.to_query(500).is_err());
    }

    #[test]
    fn the_one_where_ndjson_lines_become_index_operations() -> Result<()> {
        let raw = "{\"isbn\":\"978-0\",\"title\":\"Dune\"}\n\n{\"isbn\":42,\"title\":\"Emma\"}\n{\"title\":\"anon\"}\n";
        let operations = parse_ndjson(raw, "books", Some("isbn"))?;
        let ids: Vec<Option<&str>> = operations.iter().map(|op| op.id()).collect();
        assert_eq!(ids, vec![Some("978-0"), Some("42"), None]);
        assert!(parse_ndjson("{\"ok\":1}\nnot json\n", "books", None).is_err());
        Ok(())
    }

    #[test]
    fn the_one_where_the_tally_counts_outcomes_not_requests() {
        let mut tally = BulkTally::default();
        tally.record(&[
            BulkItemResult::Success(BulkItemSuccess {
                action: BulkAction::Delete,
                index: "books".into(),
                id: "a".into(),
                version: None,
                seq_no: None,
                primary_term: None,
                result: Some("not_found".into()),
                status: 404,
            }),
            BulkItemResult::Failure(BulkItemFailure {
                action: BulkAction::Index,
                index: "books".into(),
                id: "b".into(),
                status: 409,
                error_type: "version_conflict_engine_exception".into(),
                reason: "nope".into(),
            }),
        ]);
        assert_eq!(tally.by_result.get("not_found"), Some(&1));
        assert_eq!(tally.by_result.get("failed"), Some(&1));
    }

    #[test]
    fn the_one_where_failures_sharing_an_id_are_still_counted_apart() {
        let nameless = |reason: &str| {
            BulkItemResult::Failure(BulkItemFailure {
                action: BulkAction::Index,
                index: "books".into(),
                id: String::new(),
                status: 400,
                error_type: "mapper_parsing_exception".into(),
                reason: reason.into(),
            })
        };
        let mut tally = BulkTally::default();
        let first_chunk = [nameless("bad date")];
        let second_chunk = [nameless("bad title"), nameless("bad isbn")];
        for chunk in [&first_chunk[..], &second_chunk[..]] {
            tally.record(chunk);
            tally.failed.extend(
                chunk
                    .iter()
                    .filter_map(BulkItemResult::as_failure)
                    .map(|f| (f.id.clone(), f.message())),
            );
        }

        assert_eq!(tally.failed.len(), 1, "the id table collapses them");
        assert_eq!(tally.failed_count(), 3);
    }
}
