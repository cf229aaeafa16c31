use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tally_types::models::MessageId;
use tokio::sync::OwnedMutexGuard;

/// Prune dead entries once the map grows past this.
const PRUNE_THRESHOLD: usize = 1024;

/// Per-message mutual exclusion for live event handlers.
///
/// Locks live only while someone holds or waits on them; the map keeps weak
/// references so finished messages do not accumulate.
#[derive(Clone, Default)]
pub struct MessageLocks {
    inner: Arc<Mutex<HashMap<MessageId, Weak<tokio::sync::Mutex<()>>>>>,
}

impl MessageLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, message_id: MessageId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

            if locks.len() > PRUNE_THRESHOLD {
                locks.retain(|_, weak| weak.strong_count() > 0);
            }

            match locks.get(&message_id).and_then(Weak::upgrade) {
                Some(existing) => existing,
                None => {
                    let lock = Arc::new(tokio::sync::Mutex::new(()));
                    locks.insert(message_id, Arc::downgrade(&lock));
                    lock
                }
            }
        };

        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
