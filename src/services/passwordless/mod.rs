use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum MagicLinkError {
    #[error("magic link request failed: {0}")]
    Http(String),
    #[error("auth provider responded with status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("invalid email address: {0}")]
    InvalidEmail(String),
}

#[async_trait]
pub trait MagicLinkSender: Send + Sync {
    /// Emails a one-time sign-in link that lands the user on `redirect_url`.
    async fn send_magic_link(&self, email: &str, redirect_url: &str)
        -> Result<(), MagicLinkError>;
}

mod live;
mod mock;

pub use live::LivePasswordlessClient;
#[allow(unused_imports)]
pub use mock::MockMagicLinkSender;
