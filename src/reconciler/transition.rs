//! Pure state machine for the checkout-confirmation flow.
//!
//! The IO layer maps network responses and timer expiries onto [`Event`]s and
//! folds them through [`FlowState::apply`]. Applying an event never performs
//! IO, so every transition is testable by injecting event values directly.

/// Lifecycle of one reconciliation pass.
///
/// `AwaitingEmail` carries the address a sign-in link was (or had already
/// been) dispatched to, so phase and pending email can never disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Polling,
    AwaitingEmail { email: String },
    Confirmed,
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Flow entry. `already_paid` is the membership store's word that the
    /// account is upgraded, which makes any polling redundant.
    Begin { already_paid: bool },
    /// A confirmation request is about to be issued (possibly a retry after
    /// an error).
    AttemptStarted,
    ConfirmedSeen,
    AttemptErrored { message: String },
    EscalationSucceeded { email: String },
    EscalationFailed { message: String },
    CooldownTick,
    ResendStarted,
}

pub const GENERIC_CONFIRM_ERROR: &str =
    "We couldn't confirm your payment. Please refresh or contact support.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowState {
    /// Checkout session from the redirect URL; immutable once read.
    pub session_id: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub cooldown_seconds: u32,
    pub resend_cooldown: u32,
    pub last_error: Option<String>,
    pub phase: Phase,
}

impl FlowState {
    pub fn new(session_id: Option<String>, max_attempts: u32, resend_cooldown: u32) -> Self {
        Self {
            session_id,
            attempts: 0,
            max_attempts,
            cooldown_seconds: 0,
            resend_cooldown,
            last_error: None,
            phase: Phase::Idle,
        }
    }

    fn exhausted_message(&self) -> String {
        self.last_error
            .clone()
            .unwrap_or_else(|| GENERIC_CONFIRM_ERROR.to_string())
    }

    /// Folds one event into the state. Events that do not apply to the
    /// current phase are ignored, which keeps late or duplicate deliveries
    /// harmless.
    pub fn apply(mut self, event: Event) -> Self {
        match event {
            Event::Begin { already_paid } => {
                if !matches!(self.phase, Phase::Idle) {
                    return self;
                }
                if already_paid {
                    self.phase = Phase::Confirmed;
                } else if self.session_id.is_some() {
                    self.phase = Phase::Polling;
                }
                self
            }
            Event::AttemptStarted => {
                // Error here is the transient kind; a retry re-enters Polling
                // until the attempt budget runs out.
                if !matches!(self.phase, Phase::Polling | Phase::Error { .. }) {
                    return self;
                }
                self.attempts += 1;
                if self.attempts > self.max_attempts {
                    self.phase = Phase::Error {
                        message: self.exhausted_message(),
                    };
                } else {
                    self.phase = Phase::Polling;
                }
                self
            }
            Event::ConfirmedSeen => {
                if matches!(self.phase, Phase::Polling) {
                    self.phase = Phase::Confirmed;
                }
                self
            }
            Event::AttemptErrored { message } => {
                if matches!(self.phase, Phase::Polling) {
                    self.last_error = Some(message.clone());
                    self.phase = Phase::Error { message };
                }
                self
            }
            Event::EscalationSucceeded { email } => {
                if matches!(self.phase, Phase::Polling) {
                    self.phase = Phase::AwaitingEmail { email };
                    self.cooldown_seconds = self.resend_cooldown;
                }
                self
            }
            Event::EscalationFailed { message } => {
                if matches!(self.phase, Phase::Polling) {
                    self.phase = Phase::Error { message };
                }
                self
            }
            Event::CooldownTick => {
                self.cooldown_seconds = self.cooldown_seconds.saturating_sub(1);
                self
            }
            Event::ResendStarted => {
                if matches!(self.phase, Phase::AwaitingEmail { .. }) && self.cooldown_seconds == 0 {
                    self.cooldown_seconds = self.resend_cooldown;
                }
                self
            }
        }
    }
}
