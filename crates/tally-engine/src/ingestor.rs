use std::sync::Arc;

use tally_db::{Database, RecordOutcome};
use tally_types::events::LiveEvent;
use tally_types::models::{Message, MessageId};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::counter_cache::CounterCache;
use crate::cursor_cache::CursorCache;
use crate::locks::MessageLocks;
use crate::{Result, blocking};

/// What applying a live event changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// New message counted; `counter` is the author's channel total.
    Counted { counter: u64 },
    /// Replay or overlap with backfill. Nothing changed.
    Duplicate,
    /// Existing record rewritten in place.
    Updated,
    /// Records removed. Counters stay as they were.
    Deleted { removed: usize },
}

impl From<RecordOutcome> for EventOutcome {
    fn from(outcome: RecordOutcome) -> Self {
        match outcome {
            RecordOutcome::Counted { counter } => Self::Counted { counter },
            RecordOutcome::Duplicate => Self::Duplicate,
        }
    }
}

/// Applies live create/edit/delete notifications.
///
/// Handlers for different messages run concurrently; handlers touching the
/// same message id are serialized. Deleting a message never lowers a count:
/// counters mean "messages ever sent".
#[derive(Clone)]
pub struct EventIngestor {
    db: Arc<Database>,
    cursors: CursorCache,
    counters: CounterCache,
    locks: MessageLocks,
}

impl EventIngestor {
    pub fn new(db: Arc<Database>, cursors: CursorCache, counters: CounterCache) -> Self {
        Self {
            db,
            cursors,
            counters,
            locks: MessageLocks::new(),
        }
    }

    pub async fn apply(&self, event: LiveEvent) -> Result<EventOutcome> {
        match event {
            LiveEvent::MessageCreate(message) => {
                let _guard = self.locks.lock(message.id).await;
                self.create(&message).await
            }
            LiveEvent::MessageUpdate(message) => {
                let _guard = self.locks.lock(message.id).await;
                self.update(&message).await
            }
            LiveEvent::MessageDelete { message_id, .. } => self.delete(&[message_id]).await,
            LiveEvent::MessageBulkDelete { message_ids, .. } => self.delete(&message_ids).await,
        }
    }

    /// Apply an event, logging and dropping any failure.
    pub async fn handle(&self, event: LiveEvent) {
        let kind = event.kind();
        let channel_id = event.channel_id();
        match self.apply(event).await {
            Ok(outcome) => debug!(kind, %channel_id, ?outcome, "Applied live event"),
            Err(e) => warn!(kind, %channel_id, "Dropping live event: {}", e),
        }
    }

    /// Consume events from `rx`, one task per event, until the sender side
    /// closes or `cancel` fires. Events already queued are still applied.
    pub fn spawn(
        self,
        mut rx: mpsc::Receiver<LiveEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut handlers = JoinSet::new();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => {
                            let ingestor = self.clone();
                            handlers.spawn(async move { ingestor.handle(event).await });
                        }
                        None => break,
                    },
                    Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                        if let Err(e) = joined {
                            warn!("Live event handler panicked: {}", e);
                        }
                    }
                }
            }

            rx.close();
            while let Some(event) = rx.recv().await {
                let ingestor = self.clone();
                handlers.spawn(async move { ingestor.handle(event).await });
            }
            info!(pending = handlers.len(), "Event ingestor draining");
            while let Some(joined) = handlers.join_next().await {
                if let Err(e) = joined {
                    warn!("Live event handler panicked: {}", e);
                }
            }
        })
    }

    async fn create(&self, message: &Message) -> Result<EventOutcome> {
        // A freshly active channel joins the backfill like any other
        self.cursors.register(message.channel_id).await?;
        Ok(self.counters.record(message).await?.into())
    }

    async fn update(&self, message: &Message) -> Result<EventOutcome> {
        let msg = message.clone();
        let updated = blocking(&self.db, move |db| db.update_message(&msg)).await?;
        if updated {
            return Ok(EventOutcome::Updated);
        }

        // Edit arrived before (or without) its create
        debug!(message_id = %message.id, "Edit for unknown message, recording it");
        self.create(message).await
    }

    async fn delete(&self, message_ids: &[MessageId]) -> Result<EventOutcome> {
        let mut removed = 0;
        for &message_id in message_ids {
            let _guard = self.locks.lock(message_id).await;
            if blocking(&self.db, move |db| db.delete_message(message_id)).await? {
                removed += 1;
            }
        }
        Ok(EventOutcome::Deleted { removed })
    }
}
