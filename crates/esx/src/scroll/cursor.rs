//! 🎟️ ScrollCursor: the single owner of one server-side scroll token.

use tracing::{debug, trace};

use crate::common::{Batch, ScrollToken};
use crate::errors::EsxError;
use crate::scroll::page_fetcher::PageFetcher;

/// 🎟️ Holds the current token and knows how to advance or release it.
///
/// The token is replaced on every `advance`. It is dropped without a clear call when
/// the engine stops sending one or a batch comes back empty: both mean the engine
/// already let go of the context.
#[derive(Debug)]
pub struct ScrollCursor<T> {
    fetcher: PageFetcher<T>,
    token: Option<ScrollToken>,
}

impl<T> ScrollCursor<T> {
    /// A cursor that holds nothing yet.
    pub fn new(fetcher: PageFetcher<T>) -> Self {
        Self { fetcher, token: None }
    }

    /// Take ownership of the opening batch's token. An empty opening batch owns nothing.
    pub fn open(&mut self, first: &Batch<T>) {
        self.token = if first.is_empty() { None } else { first.token.clone() };
        trace!("🎟️ cursor opened, holding a token: {}", self.token.is_some());
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    pub fn fetcher(&self) -> &PageFetcher<T> {
        &self.fetcher
    }

    /// ➡️ Fetch the next batch.
    ///
    /// `IllegalState` without a token: the caller should have noticed exhaustion.
    /// On a fetch error the token is kept, so `release` can still clear it.
    pub async fn advance(&mut self) -> Result<Batch<T>, EsxError> {
        let Some(token) = &self.token else {
            return Err(EsxError::IllegalState(
                "advance() on a scroll cursor with no token left, check for exhaustion first".into(),
            ));
        };
        let batch = self.fetcher.fetch_next(token).await?;
        self.token = if batch.is_empty() { None } else { batch.token.clone() };
        if self.token.is_none() {
            debug!("🏁 scroll on '{}' reached its end", self.fetcher.index());
        }
        Ok(batch)
    }

    /// 🧹 Best-effort release, idempotent.
    ///
    /// The token is discarded whatever the clear call says. The clear's error is
    /// returned for the caller to log and then ignore: the engine drops the context
    /// on its own when the keep-alive runs out.
    pub async fn release(&mut self) -> Result<(), EsxError> {
        match self.token.take() {
            Some(token) => self.fetcher.clear(token).await,
            None => Ok(()),
        }
    }
}
