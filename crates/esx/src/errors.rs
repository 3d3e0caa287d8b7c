//! 💀 Errors: the taxonomy of everything that can go sideways between us and the cluster.
//!
//! 🎬 *[a scroll token expires. a bulk item gets a 409. somewhere, a caller forgets has_next().]*
//!
//! Every library API returns `Result<T, EsxError>`. The application layer (config, CLI)
//! wraps these in `anyhow` context chains, the same way the rest of the tool does.
//!
//! 🧠 Knowledge graph:
//! - `Transport`: the round trip itself failed (network, gzip, a JSON body we could not read).
//! - `SearchExecution`: the engine answered, and the answer was "no" (expired scroll token,
//!   unknown index, malformed query). Carries the engine's own error type and reason.
//! - `IllegalState`: a caller broke a contract locally. Never caused by the network.
//! - `BulkFailure`: the bulk round trip worked, some items did not. Carries every failure.
//! - `NoSuchElement`: `next()` past the end of a stream.
//! - `InvalidQuery` / `Mapping`: bad input on the way in, undecodable documents on the way out.
//!
//! Nothing here is retried. Retry policy belongs to whoever is above us. 🦆

use thiserror::Error;

use crate::bulk::BulkFailure;

/// 💀 The one error type the library speaks.
#[derive(Debug, Error)]
pub enum EsxError {
    /// 📡 A single round trip (search, scroll, clear, bulk, ping) did not complete.
    #[error("💀 {operation} never made it there and back: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    /// 🚫 The engine accepted the connection but rejected the request.
    #[error("💀 the engine rejected {operation} with status {status}: [{error_type}] {reason}")]
    SearchExecution {
        operation: &'static str,
        status: u16,
        error_type: String,
        reason: String,
    },

    /// 🐛 Local programming error, e.g. advancing a cursor that has nothing left.
    #[error("💀 illegal state: {0}")]
    IllegalState(String),

    /// 📦 The bulk call succeeded as a whole but one or more items failed.
    #[error(transparent)]
    BulkFailure(#[from] BulkFailure),

    /// 🏁 `next()` was called when `has_next()` would have said no.
    #[error("💀 next() called on a stream with nothing left to give. Ask has_next() first, it's polite.")]
    NoSuchElement,

    /// 🔍 The query cannot be used the way it was asked to be used.
    #[error("💀 invalid query: {0}")]
    InvalidQuery(String),

    /// 🧬 A hit or an entity would not (de)serialize.
    #[error("💀 mapping failed: {0}")]
    Mapping(String),
}

impl EsxError {
    /// 📡 Shorthand for a transport failure during `operation`.
    pub fn transport(operation: &'static str, cause: impl std::fmt::Display) -> Self {
        Self::Transport {
            operation,
            message: cause.to_string(),
        }
    }

    /// 🚫 Shorthand for an engine-side rejection.
    pub fn search_execution(
        operation: &'static str,
        status: u16,
        error_type: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::SearchExecution {
            operation,
            status,
            error_type: error_type.into(),
            reason: reason.into(),
        }
    }

    /// True when the engine no longer knows the scroll context (expired TTL or already cleared).
    pub fn is_search_context_missing(&self) -> bool {
        matches!(
            self,
            Self::SearchExecution { error_type, .. } if error_type == "search_context_missing_exception"
        )
    }

    /// 📦 Borrow the bulk failure details, if that's what this is.
    pub fn as_bulk_failure(&self) -> Option<&BulkFailure> {
        match self {
            Self::BulkFailure(failure) => Some(failure),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_an_expired_scroll_is_recognized_by_its_type() {
        let expired = EsxError::search_execution(
            "scroll",
            404,
            "search_context_missing_exception",
            "No search context found for id [42]",
        );
        assert!(expired.is_search_context_missing());

        let unrelated = EsxError::search_execution("search", 404, "index_not_found_exception", "no such index");
        assert!(!unrelated.is_search_context_missing());
        assert!(!EsxError::transport("scroll", "connection reset").is_search_context_missing());
    }

    #[test]
    fn the_one_where_the_message_keeps_the_engine_diagnostics() {
        let err = EsxError::search_execution("search", 400, "parsing_exception", "unknown query [matchh]");
        let rendered = err.to_string();
        assert!(rendered.contains("400"));
        assert!(rendered.contains("parsing_exception"));
        assert!(rendered.contains("unknown query [matchh]"));
    }
}
