use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sent-link store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sent-link store is corrupt: {0}")]
    Corrupt(String),
}

/// Durable presence flags keyed by `(checkout session, normalized email)`.
///
/// This is the only state the reconciler persists across page views. Entries
/// are write-once and never deleted; a flag means "an automatic sign-in link
/// has already gone out for this pair". Concurrent writers may race past the
/// `has` check and both send; a duplicate email is an accepted nuisance, so
/// no cross-process locking is attempted.
#[async_trait]
pub trait SentLinkRepository: Send + Sync {
    async fn has(&self, session_id: &str, email: &str) -> Result<bool, StoreError>;
    async fn record(&self, session_id: &str, email: &str) -> Result<(), StoreError>;
}

pub(crate) fn flag_key(session_id: &str, email: &str) -> String {
    format!("{}:{}", session_id, email)
}
