//! 🎛️ Bulk options: the knobs that apply to a whole `_bulk` call at once.
//!
//! Per-item overrides (per-document routing, versions) ride on the individual
//! operations. These apply uniformly and land in the request's query string.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::errors::EsxError;

/// 🔄 When writes become visible to searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Nothing special. Visible after the next scheduled refresh.
    #[default]
    None,
    /// Refresh the affected shards right away.
    Immediate,
    /// Hold the response until a refresh has made the writes visible.
    WaitFor,
}

impl RefreshPolicy {
    /// The `refresh` query-parameter value.
    pub fn as_param(&self) -> &'static str {
        match self {
            Self::None => "false",
            Self::Immediate => "true",
            Self::WaitFor => "wait_for",
        }
    }
}

impl FromStr for RefreshPolicy {
    type Err = EsxError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "none" | "false" => Ok(Self::None),
            "immediate" | "true" => Ok(Self::Immediate),
            "wait_for" | "wait-for" => Ok(Self::WaitFor),
            other => Err(EsxError::InvalidQuery(format!(
                "refresh policy '{other}' is not one of none, immediate, wait_for"
            ))),
        }
    }
}

/// 🧮 How many shard copies must be active before the bulk proceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "ActiveShardCountWire")]
pub enum ActiveShardCount {
    All,
    Count(u32),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ActiveShardCountWire {
    Number(u32),
    Text(String),
}

impl TryFrom<ActiveShardCountWire> for ActiveShardCount {
    type Error = EsxError;

    fn try_from(wire: ActiveShardCountWire) -> Result<Self, Self::Error> {
        match wire {
            ActiveShardCountWire::Number(n) => Ok(Self::Count(n)),
            ActiveShardCountWire::Text(text) => text.parse(),
        }
    }
}

impl FromStr for ActiveShardCount {
    type Err = EsxError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        raw.parse::<u32>().map(Self::Count).map_err(|_| {
            EsxError::InvalidQuery(format!(
                "wait_for_active_shards '{raw}' should be 'all' or a number"
            ))
        })
    }
}

impl fmt::Display for ActiveShardCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Count(n) => write!(f, "{n}"),
        }
    }
}

/// 🎛️ Options shared by every item of one bulk call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
pub struct BulkOptions {
    #[serde(default)]
    pub refresh: RefreshPolicy,
    #[serde(default)]
    pub routing: Option<String>,
    #[serde(default)]
    pub pipeline: Option<String>,
    #[serde(default)]
    pub wait_for_active_shards: Option<ActiveShardCount>,
}

impl BulkOptions {
    pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into());
        self
    }

    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = Some(pipeline.into());
        self
    }

    pub fn with_wait_for_active_shards(mut self, count: ActiveShardCount) -> Self {
        self.wait_for_active_shards = Some(count);
        self
    }

    /// 📡 Query-string pairs for `POST /_bulk`. `refresh` is only sent when it matters.
    pub fn query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if self.refresh != RefreshPolicy::None {
            params.push(("refresh", self.refresh.as_param().to_string()));
        }
        if let Some(routing) = &self.routing {
            params.push(("routing", routing.clone()));
        }
        if let Some(pipeline) = &self.pipeline {
            params.push(("pipeline", pipeline.clone()));
        }
        if let Some(count) = &self.wait_for_active_shards {
            params.push(("wait_for_active_shards", count.to_string()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_default_options_add_nothing_to_the_url() {
        assert!(BulkOptions::default().query_params().is_empty());
    }

    #[test]
    fn the_one_where_every_option_finds_its_query_param() {
        let params = BulkOptions::default()
            .with_refresh(RefreshPolicy::WaitFor)
            .with_routing("tenant-7")
            .with_pipeline("geoip")
            .with_wait_for_active_shards(ActiveShardCount::All)
            .query_params();
        assert_eq!(
            params,
            vec![
                ("refresh", "wait_for".to_string()),
                ("routing", "tenant-7".to_string()),
                ("pipeline", "geoip".to_string()),
                ("wait_for_active_shards", "all".to_string()),
            ]
        );
    }

    #[test]
    fn the_one_where_options_come_out_of_toml() -> Result<(), toml::de::Error> {
        let options: BulkOptions = toml::from_str(
            r#"
            refresh = "immediate"
            pipeline = "enrich"
            wait_for_active_shards = 2
            "#,
        )?;
        assert_eq!(options.refresh, RefreshPolicy::Immediate);
        assert_eq!(options.pipeline.as_deref(), Some("enrich"));
        assert_eq!(options.wait_for_active_shards, Some(ActiveShardCount::Count(2)));

        let all: BulkOptions = toml::from_str(r#"wait_for_active_shards = "all""#)?;
        assert_eq!(all.wait_for_active_shards, Some(ActiveShardCount::All));
        Ok(())
    }

    #[test]
    fn the_one_where_cli_spellings_parse() {
        assert_eq!("wait-for".parse::<RefreshPolicy>().ok(), Some(RefreshPolicy::WaitFor));
        assert_eq!("true".parse::<RefreshPolicy>().ok(), Some(RefreshPolicy::Immediate));
        assert!("sometimes".parse::<RefreshPolicy>().is_err());
        assert_eq!("3".parse::<ActiveShardCount>().ok(), Some(ActiveShardCount::Count(3)));
        assert!("most".parse::<ActiveShardCount>().is_err());
    }
}
