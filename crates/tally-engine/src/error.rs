use tally_types::models::{ChannelId, UserId};
use thiserror::Error;

/// Failures reported by the history source and channel directory.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network trouble or rate limiting. Retried next cycle.
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// The channel's history is not readable right now.
    #[error("history of channel {0} is not readable")]
    Forbidden(ChannelId),

    /// The source answered with something we could not parse.
    #[error("malformed source response: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The durable store failed. Fatal to the current operation only.
    #[error("store unavailable: {0}")]
    Store(#[from] anyhow::Error),

    /// A blocking store call panicked or was cancelled.
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// None of the candidate channels has a positive count for the user.
    #[error("no activity recorded for user {0}")]
    NoActivity(UserId),
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_errors_convert_transparently() {
        let err: EngineError = FetchError::Forbidden(ChannelId(3)).into();
        assert_eq!(err.to_string(), "history of channel 3 is not readable");
        assert!(!FetchError::Decode("bad".into()).is_transient());
        assert!(FetchError::Transient("429".into()).is_transient());
    }

    #[test]
    fn store_errors_name_the_store() {
        let err: EngineError = anyhow::anyhow!("disk full").into();
        assert!(err.to_string().starts_with("store unavailable"));
    }
}
