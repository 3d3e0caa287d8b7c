//! 📡 The Elasticsearch backend: four endpoints, one reqwest client, zero retries.
//!
//! 🎬 *[a cluster sits on port 9200. it has opinions. we send it JSON anyway.]*
//!
//! ```text
//! search        POST   /{index}/_search?scroll={keep_alive}   (scroll param only when opening a cursor)
//! scroll        POST   /_search/scroll     {"scroll": .., "scroll_id": ..}
//! clear_scroll  DELETE /_search/scroll     {"scroll_id": [..]}
//! bulk          POST   /_bulk?refresh=..   application/x-ndjson
//! ```
//!
//! 🧠 Knowledge graph:
//! - Auth: API key beats basic auth. This is not a democracy.
//! - Non-2xx answers are parsed for the engine's `{"error": {"type", "reason"}}` and become
//!   `SearchExecution`. Anything that never got an answer is `Transport`.
//! - An expired scroll answers `search_phase_execution_exception` with the real story in
//!   `root_cause`. We surface the root cause so `is_search_context_missing()` works.
//! - Optional gzip on request bodies, for bulk payloads that are mostly whitespace and hope.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::{Method, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::backends::SearchClient;
use crate::bulk::{BulkRequest, BulkResponse};
use crate::common::{KeepAlive, ScrollToken, SearchResponse};
use crate::errors::EsxError;
use crate::query::SearchRequest;

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// 🔧 Where the cluster lives and how to get past the bouncer.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ElasticsearchConfig {
    /// 📡 Base URL, e.g. `http://localhost:9200`.
    pub url: String,
    /// 🔒 Username. "elastic" is a username. "admin" is a cry for help.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 API key, sent as `Authorization: ApiKey ..`. Wins over basic auth.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 🫁 gzip request bodies.
    #[serde(default)]
    pub compression: bool,
}

impl ElasticsearchConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            api_key: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            compression: false,
        }
    }
}

/// 📡 A thin, stateless client for the four calls the library needs.
#[derive(Debug, Clone)]
pub struct ElasticsearchClient {
    client: reqwest::Client,
    base: Url,
    config: ElasticsearchConfig,
}

// 📦 A request body and its content type, before optional gzip.
struct Payload {
    bytes: Vec<u8>,
    content_type: &'static str,
}

impl ElasticsearchClient {
    /// 🚀 Build the HTTP client and ping the cluster root.
    ///
    /// A bad URL, an unreachable host or rejected credentials fail here,
    /// not fifty thousand documents into a bulk load.
    pub async fn new(config: ElasticsearchConfig) -> Result<Self, EsxError> {
        let base = Url::parse(&config.url).map_err(|err| {
            EsxError::transport("connect", format!("'{}' is not a usable URL: {err}", config.url))
        })?;
        if base.cannot_be_a_base() {
            return Err(EsxError::transport(
                "connect",
                format!("'{}' cannot carry a path, so it cannot reach any endpoint", config.url),
            ));
        }

        // 🔧 10s to shake hands, 30s to answer. Bulk requests can be meaty.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|err| EsxError::transport("connect", format!("the HTTP client refused to be born: {err}")))?;

        let this = Self { client, base, config };
        this.ping().await?;
        Ok(this)
    }

    /// 📡 `GET /`. "Hello? Is this thing on?"
    pub async fn ping(&self) -> Result<(), EsxError> {
        let (status, body) = self.send("ping", Method::GET, self.base.clone(), None).await?;
        if !(200..300).contains(&status) {
            return Err(engine_error("ping", status, &body));
        }
        debug!("✅ cluster at {} answered the ping", self.base);
        Ok(())
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // 🧠 cannot_be_a_base was ruled out in new(), so path_segments_mut is always Ok here
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn json_payload(operation: &'static str, body: &Value) -> Result<Payload, EsxError> {
        let bytes = serde_json::to_vec(body).map_err(|err| EsxError::transport(operation, err))?;
        Ok(Payload {
            bytes,
            content_type: "application/json",
        })
    }

    /// 📡 One round trip. Returns the status and the raw body; judging them is the caller's job.
    async fn send(
        &self,
        operation: &'static str,
        method: Method,
        url: Url,
        payload: Option<Payload>,
    ) -> Result<(u16, Vec<u8>), EsxError> {
        trace!("📡 {} {} ({})", method, url, operation);
        let mut request = self.client.request(method, url);

        // -- 🔒 api_key beats basic auth in this club
        if let Some(api_key) = &self.config.api_key {
            request = request.header("Authorization", format!("ApiKey {api_key}"));
        } else if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }

        if let Some(payload) = payload {
            request = request.header("Content-Type", payload.content_type);
            if self.config.compression {
                let compressed = gzip(&payload.bytes).map_err(|err| EsxError::transport(operation, err))?;
                trace!(
                    "🫁 gzip squeezed {} bytes into {}",
                    payload.bytes.len(),
                    compressed.len()
                );
                request = request.header("Content-Encoding", "gzip").body(compressed);
            } else {
                request = request.body(payload.bytes);
            }
        }

        let response = request.send().await.map_err(|err| EsxError::transport(operation, err))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|err| EsxError::transport(operation, err))?;
        Ok((status, body.to_vec()))
    }

    async fn send_expecting<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        method: Method,
        url: Url,
        payload: Option<Payload>,
    ) -> Result<T, EsxError> {
        let (status, body) = self.send(operation, method, url, payload).await?;
        if !(200..300).contains(&status) {
            return Err(engine_error(operation, status, &body));
        }
        serde_json::from_slice(&body).map_err(|err| {
            EsxError::transport(operation, format!("the engine answered {status} with a body we could not read: {err}"))
        })
    }
}

#[async_trait]
impl SearchClient for ElasticsearchClient {
    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchResponse, EsxError> {
        let mut url = self.endpoint(&[index, "_search"]);
        if let Some(keep_alive) = &request.keep_alive {
            url.query_pairs_mut().append_pair("scroll", keep_alive.as_str());
        }
        let payload = Self::json_payload("search", &request.body)?;
        self.send_expecting("search", Method::POST, url, Some(payload)).await
    }

    async fn scroll(&self, token: &ScrollToken, keep_alive: &KeepAlive) -> Result<SearchResponse, EsxError> {
        let url = self.endpoint(&["_search", "scroll"]);
        let body = json!({ "scroll": keep_alive.as_str(), "scroll_id": token.as_str() });
        let payload = Self::json_payload("scroll", &body)?;
        self.send_expecting("scroll", Method::POST, url, Some(payload)).await
    }

    async fn clear_scroll(&self, tokens: &[ScrollToken]) -> Result<(), EsxError> {
        if tokens.is_empty() {
            return Ok(());
        }
        let url = self.endpoint(&["_search", "scroll"]);
        let ids: Vec<&str> = tokens.iter().map(ScrollToken::as_str).collect();
        let payload = Self::json_payload("clear_scroll", &json!({ "scroll_id": ids }))?;
        let (status, body) = self.send("clear_scroll", Method::DELETE, url, Some(payload)).await?;
        match status {
            200..=299 => Ok(()),
            // 🧹 already gone is as cleared as it gets
            404 => {
                debug!("🧹 clear_scroll: the engine had already forgotten {} cursor(s)", tokens.len());
                Ok(())
            }
            _ => Err(engine_error("clear_scroll", status, &body)),
        }
    }

    async fn bulk(&self, request: &BulkRequest) -> Result<BulkResponse, EsxError> {
        let mut url = self.endpoint(&["_bulk"]);
        let params = request.options.query_params();
        if !params.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in &params {
                query.append_pair(key, value);
            }
        }
        // ⚠️ application/x-ndjson, not application/json. The engine notices.
        let payload = Payload {
            bytes: request.to_ndjson()?.into_bytes(),
            content_type: "application/x-ndjson",
        };
        self.send_expecting("bulk", Method::POST, url, Some(payload)).await
    }
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 4), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorWire,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorWire {
    Detailed(ErrorDetail),
    Plain(String),
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type", default)]
    error_type: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    root_cause: Vec<ErrorDetail>,
}

/// 🚫 Turn a non-2xx answer into a `SearchExecution` error, keeping what the engine said.
fn engine_error(operation: &'static str, status: u16, body: &[u8]) -> EsxError {
    match serde_json::from_slice::<ErrorEnvelope>(body) {
        Ok(ErrorEnvelope {
            error: ErrorWire::Detailed(detail),
        }) => {
            // 🔍 "all shards failed" is the headline, the root cause is the story
            let detail = match detail.root_cause.into_iter().next() {
                Some(root) if detail.error_type == "search_phase_execution_exception" => root,
                _ => ErrorDetail {
                    error_type: detail.error_type,
                    reason: detail.reason,
                    root_cause: Vec::new(),
                },
            };
            EsxError::search_execution(
                operation,
                status,
                detail.error_type,
                detail.reason.unwrap_or_else(|| "no reason given".to_string()),
            )
        }
        Ok(ErrorEnvelope {
            error: ErrorWire::Plain(reason),
        }) => EsxError::search_execution(operation, status, "error", reason),
        Err(_) => {
            let text = String::from_utf8_lossy(body);
            let shown: String = text.chars().take(512).collect();
            EsxError::search_execution(operation, status, "http_status", shown)
        }
    }
}
