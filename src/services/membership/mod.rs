use async_trait::async_trait;
use uuid::Uuid;

use crate::models::account::Account;

#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error("membership api request failed: {0}")]
    Http(String),
    #[error("membership api responded with status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("membership api returned an invalid response: {0}")]
    Malformed(String),
}

/// Classified result of one confirmation request.
///
/// These three shapes are control flow, not errors; anything else the
/// endpoint produces surfaces as a [`MembershipError`] and is retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The backend has reconciled the payment and upgraded the account.
    Confirmed,
    /// Payment received but the membership record is not consistent yet.
    Pending,
    /// A membership exists but there is no signed-in session (HTTP 401).
    AuthRequired,
}

#[async_trait]
pub trait MembershipService: Send + Sync {
    async fn fetch_account(&self, user_id: Uuid) -> Result<Account, MembershipError>;

    async fn confirm_checkout(&self, session_id: &str)
        -> Result<ConfirmOutcome, MembershipError>;

    /// Email the checkout session was completed with, if the payment provider
    /// captured one.
    async fn lookup_session_email(
        &self,
        session_id: &str,
    ) -> Result<Option<String>, MembershipError>;
}

mod live;
mod mock;

pub use live::LiveMembershipClient;
#[allow(unused_imports)]
pub use mock::MockMembershipService;
