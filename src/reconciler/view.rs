use super::transition::{FlowState, Phase};

/// What the page shows for a given flow state. Exactly one surface at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState {
    /// Flow never armed; nothing to render.
    Hidden,
    /// Inline "activating your membership…" banner.
    ActivatingBanner,
    ErrorBanner { message: String },
    /// Full-screen overlay asking the user to open their email.
    EmailOverlay { email: String, cooldown_seconds: u32 },
    /// Reconciled; render the page as normal.
    Content,
}

impl ViewState {
    /// Only the overlay suppresses page scroll while it is up.
    pub fn blocks_scroll(&self) -> bool {
        matches!(self, ViewState::EmailOverlay { .. })
    }
}

pub fn bind(flow: &FlowState) -> ViewState {
    match &flow.phase {
        Phase::Idle => ViewState::Hidden,
        Phase::Polling => ViewState::ActivatingBanner,
        Phase::Error { message } => ViewState::ErrorBanner {
            message: message.clone(),
        },
        Phase::AwaitingEmail { email } => ViewState::EmailOverlay {
            email: email.clone(),
            cooldown_seconds: flow.cooldown_seconds,
        },
        Phase::Confirmed => ViewState::Content,
    }
}
