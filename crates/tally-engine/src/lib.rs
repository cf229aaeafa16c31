//! Backfill crawler and counter aggregation for per-channel message counts.
//!
//! Two writers feed the same counters: the [`Crawler`] walks each channel's
//! history backwards one page per cycle, and the [`EventIngestor`] applies
//! live create/edit/delete notifications. Both record messages through
//! [`CounterCache`], which counts each message id at most once.

pub mod counter_cache;
pub mod crawler;
pub mod cursor_cache;
pub mod error;
pub mod ingestor;
pub mod locks;
pub mod source;

use std::sync::Arc;

use tally_db::Database;

pub use counter_cache::CounterCache;
pub use crawler::{ChannelReport, Crawler, CrawlerConfig, CycleReport};
pub use cursor_cache::CursorCache;
pub use error::{EngineError, FetchError, Result};
pub use ingestor::{EventIngestor, EventOutcome};
pub use source::{ChannelDirectory, HistoryFetcher};

/// Run a blocking store call off the async runtime.
pub(crate) async fn blocking<F, T>(db: &Arc<Database>, f: F) -> Result<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    Ok(tokio::task::spawn_blocking(move || f(&db)).await??)
}
