//! 🔧 App Configuration: TOML and env vars in, one `AppConfig` out.
//!
//! 📡 "It worked on my machine." "Which config did your machine load?" "...a config." 🦆
//!
//! 🏗️ Figment does the layering. Env vars (`ESX_*`, nested keys split on `__`) form
//! the base, an optional TOML file is merged on top and wins on conflicts.

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::{ElasticsearchConfig, InMemoryEngineConfig};
use crate::bulk::BulkOptions;
use crate::common::KeepAlive;

/// 📦 Everything the library and CLI need to know before the first request.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    /// 🔌 Which engine to talk to.
    pub engine: EngineConfig,
    #[serde(default)]
    pub scroll: ScrollConfig,
    #[serde(default)]
    pub bulk: BulkConfig,
}

/// 🎭 One variant per backend, same shape as the `EngineBackend` dispatcher.
///
/// Env vars arrive lowercased, hence the aliases: `ESX_ENGINE__ELASTICSEARCH__URL`
/// lands on `Elasticsearch`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub enum EngineConfig {
    #[serde(alias = "elasticsearch")]
    Elasticsearch(ElasticsearchConfig),
    #[serde(alias = "in_memory", alias = "inmemory")]
    InMemory(InMemoryEngineConfig),
}

/// 🌊 Scroll defaults.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ScrollConfig {
    /// ⏳ Sent on the opening search and again on every continuation.
    #[serde(default)]
    pub keep_alive: KeepAlive,
    /// 📏 Page size for queries that open a scroll without saying how big a page is.
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
}

fn default_page_size() -> usize {
    500
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            keep_alive: KeepAlive::default(),
            default_page_size: default_page_size(),
        }
    }
}

/// 📦 Bulk defaults. The options apply to every `_bulk` call; the cap is how the CLI chunks.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BulkConfig {
    #[serde(flatten)]
    pub options: BulkOptions,
    #[serde(default = "default_max_operations_per_request")]
    pub max_operations_per_request: usize,
}

fn default_max_operations_per_request() -> usize {
    1000
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            options: BulkOptions::default(),
            max_operations_per_request: default_max_operations_per_request(),
        }
    }
}

/// 🚀 Load the config from env vars, plus a TOML file when one is given.
///
/// No file means env vars only. There is no implicit `esx.toml` fallback: a config you
/// did not ask for is a config you will not think to check at 3am.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("ESX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (ESX_*). \
             Either the file is not where you said, or it is and serde disagrees with it.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (ESX_*). \
                 No file was provided, so the environment has some explaining to do."
            .to_string(),
    };

    config.extract().context(context_msg)
}
