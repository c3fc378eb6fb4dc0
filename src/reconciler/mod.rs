//! Subscription activation reconciler.
//!
//! After the payment provider redirects back with a checkout-session id, this
//! engine asks the backend whether the account upgrade has landed. It retries
//! transient failures on a fixed delay up to an attempt budget, and falls back
//! to emailing a one-time sign-in link when the backend reports that a
//! membership exists but nobody is signed in (or that reconciliation is still
//! pending on its side).
//!
//! All state transitions go through the pure machine in [`transition`]; this
//! module owns the IO, the timers, and the cancellation discipline.

pub mod redirect;
pub mod tier_override;
pub mod transition;
pub mod view;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::services::membership::ConfirmOutcome;
use crate::state::AppState;
use crate::utils;
use transition::{Event, FlowState, Phase};
use view::ViewState;

#[derive(Debug, thiserror::Error)]
enum EscalateError {
    #[error("could not look up the checkout session: {0}")]
    LookupFailed(String),
    #[error("no email address is associated with this checkout session")]
    NoEmailAvailable,
    #[error("failed to send the sign-in link: {0}")]
    SendFailed(String),
    #[error("reconciliation was cancelled")]
    Cancelled,
}

/// Drives one reconciliation pass for one page view.
///
/// Cheap to clone; clones share the same flow state, page URL, and
/// cancellation token. Cancelling the token is the page-teardown signal:
/// after it fires, no timer or late response mutates state again.
#[derive(Clone)]
pub struct Reconciler {
    ctx: AppState,
    cancel: CancellationToken,
    flow: Arc<Mutex<FlowState>>,
    page_url: Arc<Mutex<Url>>,
}

impl Reconciler {
    pub fn new(ctx: AppState, page_url: Url, cancel: CancellationToken) -> Self {
        let params = redirect::extract(&page_url);
        // the flow only arms when the redirect carried the pending marker
        let session_id = if params.pending { params.session_id } else { None };
        let flow = FlowState::new(
            session_id,
            ctx.config.max_confirm_attempts,
            ctx.config.resend_cooldown_seconds,
        );
        Self {
            ctx,
            cancel,
            flow: Arc::new(Mutex::new(flow)),
            page_url: Arc::new(Mutex::new(page_url)),
        }
    }

    pub fn snapshot(&self) -> FlowState {
        self.flow.lock().unwrap().clone()
    }

    pub fn page_url(&self) -> Url {
        self.page_url.lock().unwrap().clone()
    }

    pub fn view(&self) -> ViewState {
        view::bind(&self.snapshot())
    }

    /// Applies an event unless the page has been torn down. Returns whether
    /// the event was applied.
    fn apply(&self, event: Event) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let mut flow = self.flow.lock().unwrap();
        *flow = flow.clone().apply(event);
        true
    }

    fn strip_redirect_params(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        let mut url = self.page_url.lock().unwrap();
        *url = redirect::strip(&url);
    }

    /// Runs the confirmation flow to a settled phase. A second call within
    /// the same page view is a no-op: the machine never re-enters polling.
    pub async fn run(&self, already_paid: bool) {
        if !matches!(self.snapshot().phase, Phase::Idle) {
            return;
        }
        if !self.apply(Event::Begin { already_paid }) {
            return;
        }

        let after_begin = self.snapshot();
        let session_id = match after_begin.phase {
            Phase::Confirmed => {
                // known-paid short circuit: nothing to confirm, just make
                // sure a reload does not re-trigger the flow
                self.strip_redirect_params();
                info!("membership already active; skipping confirmation polling");
                return;
            }
            Phase::Polling => match after_begin.session_id {
                Some(id) => id,
                None => return,
            },
            _ => return,
        };

        let retry_delay = self.ctx.config.confirm_retry_delay;
        loop {
            if !self.apply(Event::AttemptStarted) {
                return;
            }
            let flow = self.snapshot();
            if let Phase::Error { .. } = flow.phase {
                warn!(
                    attempts = flow.attempts - 1,
                    session_id = %session_id,
                    "confirmation attempt budget exhausted"
                );
                return;
            }

            let result = self.ctx.membership.confirm_checkout(&session_id).await;
            if self.cancel.is_cancelled() {
                // a late response must not touch state after teardown
                return;
            }

            match result {
                Ok(ConfirmOutcome::Confirmed) => {
                    if self.apply(Event::ConfirmedSeen) {
                        self.strip_redirect_params();
                        info!(session_id = %session_id, "checkout confirmed; membership active");
                    }
                    return;
                }
                Ok(outcome @ (ConfirmOutcome::AuthRequired | ConfirmOutcome::Pending)) => {
                    // both the signed-out case and backend-side lag settle
                    // into the email fallback instead of spinning here
                    info!(
                        ?outcome,
                        session_id = %session_id,
                        "confirmation needs a signed-in session; falling back to email link"
                    );
                    self.escalate(&session_id).await;
                    return;
                }
                Err(err) => {
                    let message = err.to_string();
                    if !self.apply(Event::AttemptErrored {
                        message: message.clone(),
                    }) {
                        return;
                    }
                    let flow = self.snapshot();
                    if flow.attempts >= flow.max_attempts {
                        warn!(
                            attempts = flow.attempts,
                            session_id = %session_id,
                            error = %message,
                            "giving up on checkout confirmation"
                        );
                        return;
                    }
                    warn!(
                        attempt = flow.attempts,
                        session_id = %session_id,
                        error = %message,
                        "confirmation attempt failed; retrying"
                    );
                    if !self.wait_for_retry(retry_delay).await {
                        return;
                    }
                }
            }
        }
    }

    /// Arranges a one-time sign-in link for the email bound to the checkout
    /// session. At most one automatic send ever happens per
    /// `(session, email)` pair; the durable flag store enforces that across
    /// page reloads.
    async fn escalate(&self, session_id: &str) {
        match self.escalate_inner(session_id).await {
            Ok(email) => {
                if self.apply(Event::EscalationSucceeded {
                    email: email.clone(),
                }) {
                    info!(email = %email, "waiting for the user to confirm via email");
                }
            }
            Err(EscalateError::Cancelled) => {}
            Err(err) => {
                warn!(error = %err, session_id = %session_id, "email escalation failed");
                let _ = self.apply(Event::EscalationFailed {
                    message: err.to_string(),
                });
            }
        }
    }

    async fn escalate_inner(&self, session_id: &str) -> Result<String, EscalateError> {
        let email = self
            .ctx
            .membership
            .lookup_session_email(session_id)
            .await
            .map_err(|err| EscalateError::LookupFailed(err.to_string()))?
            .ok_or(EscalateError::NoEmailAvailable)?;
        let email = utils::email::normalize(&email);

        let already_sent = match self.ctx.sent_links.has(session_id, &email).await {
            Ok(flag) => flag,
            Err(err) => {
                // a broken flag store should not strand the user; worst case
                // is one duplicate email
                warn!(error = %err, "sent-link store read failed; assuming no prior send");
                false
            }
        };

        if already_sent {
            info!(email = %email, "sign-in link already sent for this checkout; not sending another");
        } else {
            if self.cancel.is_cancelled() {
                return Err(EscalateError::Cancelled);
            }
            let redirect_url = self.ctx.config.activation_redirect_url();
            self.ctx
                .magic_link
                .send_magic_link(&email, &redirect_url)
                .await
                .map_err(|err| EscalateError::SendFailed(err.to_string()))?;
            // recorded only after a successful send, so a failed send can be
            // retried on the next visit
            if let Err(err) = self.ctx.sent_links.record(session_id, &email).await {
                warn!(error = %err, "failed to persist sent-link flag; a reload may email again");
            }
        }

        Ok(email)
    }

    /// Manual resend, gated by the cooldown. Explicit user intent bypasses
    /// the dedup record, and the cooldown re-arms whether or not the send
    /// succeeds. Returns whether a send was attempted.
    pub async fn resend(&self) -> bool {
        let email = {
            let flow = self.flow.lock().unwrap();
            match &flow.phase {
                Phase::AwaitingEmail { email } if flow.cooldown_seconds == 0 => email.clone(),
                _ => return false,
            }
        };
        if !self.apply(Event::ResendStarted) {
            return false;
        }

        let redirect_url = self.ctx.config.activation_redirect_url();
        if let Err(err) = self
            .ctx
            .magic_link
            .send_magic_link(&email, &redirect_url)
            .await
        {
            warn!(error = %err, email = %email, "manual resend failed; cooldown still applies");
        } else {
            info!(email = %email, "sign-in link re-sent");
        }
        true
    }

    /// Decrements the resend cooldown once per second until the page is torn
    /// down.
    pub fn spawn_cooldown_ticker(&self) -> JoinHandle<()> {
        self.spawn_cooldown_ticker_with(Duration::from_secs(1))
    }

    fn spawn_cooldown_ticker_with(&self, tick: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    _ = tokio::time::sleep(tick) => {
                        if !this.apply(Event::CooldownTick) {
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn wait_for_retry(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.cancel.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use crate::config::Config;
    use crate::services::membership::{ConfirmOutcome, MembershipError, MockMembershipService};
    use crate::services::passwordless::MockMagicLinkSender;
    use crate::store::mock_store::MockSentLinkStore;

    fn test_config() -> Config {
        Config {
            api_base_url: "http://127.0.0.1:0".to_string(),
            auth_base_url: "http://127.0.0.1:0".to_string(),
            auth_api_key: String::new(),
            site_origin: "https://example.test".to_string(),
            sent_link_state_path: std::env::temp_dir().join("tiersync-unused.json"),
            max_confirm_attempts: 20,
            confirm_retry_delay: Duration::from_millis(2),
            resend_cooldown_seconds: 30,
        }
    }

    struct Harness {
        membership: Arc<MockMembershipService>,
        sender: Arc<MockMagicLinkSender>,
        store: Arc<MockSentLinkStore>,
        state: AppState,
    }

    fn harness_with(config: Config) -> Harness {
        let membership = Arc::new(MockMembershipService::new());
        let sender = Arc::new(MockMagicLinkSender::new());
        let store = Arc::new(MockSentLinkStore::new());
        let state = AppState {
            membership: membership.clone(),
            magic_link: sender.clone(),
            sent_links: store.clone(),
            config: Arc::new(config),
        };
        Harness {
            membership,
            sender,
            store,
            state,
        }
    }

    fn harness() -> Harness {
        harness_with(test_config())
    }

    fn redirect_url() -> Url {
        Url::parse("https://example.test/welcome?cs=cs_test_1&pending=1&tab=rewards")
            .expect("test url")
    }

    fn reconciler(h: &Harness) -> Reconciler {
        Reconciler::new(h.state.clone(), redirect_url(), CancellationToken::new())
    }

    #[tokio::test]
    async fn already_paid_short_circuits_without_requests() {
        let h = harness();
        let rec = reconciler(&h);

        rec.run(true).await;

        assert_eq!(h.membership.confirm_call_count(), 0);
        assert_eq!(rec.snapshot().phase, Phase::Confirmed);
        assert_eq!(
            rec.page_url().as_str(),
            "https://example.test/welcome?tab=rewards"
        );
    }

    #[tokio::test]
    async fn confirmed_response_settles_and_cleans_the_url() {
        let h = harness();
        h.membership
            .script_confirm([Ok(ConfirmOutcome::Confirmed)]);
        let rec = reconciler(&h);

        rec.run(false).await;

        assert_eq!(h.membership.confirm_call_count(), 1);
        assert_eq!(rec.snapshot().phase, Phase::Confirmed);
        assert_eq!(
            rec.page_url().as_str(),
            "https://example.test/welcome?tab=rewards"
        );
        assert_eq!(rec.view(), ViewState::Content);
    }

    #[tokio::test]
    async fn without_pending_marker_the_flow_never_arms() {
        let h = harness();
        let url = Url::parse("https://example.test/welcome?cs=cs_test_1").expect("test url");
        let rec = Reconciler::new(h.state.clone(), url, CancellationToken::new());

        rec.run(false).await;

        assert_eq!(h.membership.confirm_call_count(), 0);
        assert_eq!(rec.snapshot().phase, Phase::Idle);
        assert_eq!(rec.view(), ViewState::Hidden);
    }

    #[tokio::test]
    async fn transient_errors_retry_up_to_the_attempt_budget() {
        let h = harness();
        // empty script: every confirmation behaves like a malformed response
        let rec = reconciler(&h);

        rec.run(false).await;

        assert_eq!(h.membership.confirm_call_count(), 20);
        let flow = rec.snapshot();
        assert_eq!(flow.attempts, 20);
        assert!(matches!(flow.phase, Phase::Error { .. }));
        assert!(matches!(rec.view(), ViewState::ErrorBanner { .. }));
        // no escalation on transient failure
        assert_eq!(h.sender.sent_count(), 0);
    }

    #[tokio::test]
    async fn recovery_after_transient_errors_still_confirms() {
        let h = harness();
        h.membership.script_confirm([
            Err(MembershipError::Http("connection reset".to_string())),
            Err(MembershipError::Api {
                status: 502,
                message: "bad gateway".to_string(),
            }),
            Ok(ConfirmOutcome::Confirmed),
        ]);
        let rec = reconciler(&h);

        rec.run(false).await;

        assert_eq!(h.membership.confirm_call_count(), 3);
        assert_eq!(rec.snapshot().phase, Phase::Confirmed);
    }

    #[tokio::test]
    async fn auth_required_escalates_exactly_once_and_stops_polling() {
        let h = harness();
        h.membership
            .script_confirm([Ok(ConfirmOutcome::AuthRequired)]);
        *h.membership.session_email.lock().unwrap() = Some(" Buyer@Example.COM ".to_string());
        let rec = reconciler(&h);

        rec.run(false).await;

        assert_eq!(h.membership.confirm_call_count(), 1);
        assert_eq!(h.membership.lookup_calls.lock().unwrap().len(), 1);
        assert_eq!(
            h.sender.sent.lock().unwrap().as_slice(),
            &[(
                "buyer@example.com".to_string(),
                "https://example.test/welcome".to_string()
            )]
        );
        assert_eq!(
            h.store.recorded.lock().unwrap().as_slice(),
            &["cs_test_1:buyer@example.com".to_string()]
        );

        let flow = rec.snapshot();
        assert_eq!(
            flow.phase,
            Phase::AwaitingEmail {
                email: "buyer@example.com".to_string()
            }
        );
        assert_eq!(flow.cooldown_seconds, 30);
        assert!(rec.view().blocks_scroll());
    }

    #[tokio::test]
    async fn pending_response_takes_the_same_fallback_as_auth_required() {
        let h = harness();
        h.membership.script_confirm([Ok(ConfirmOutcome::Pending)]);
        *h.membership.session_email.lock().unwrap() = Some("buyer@example.com".to_string());
        let rec = reconciler(&h);

        rec.run(false).await;

        // no indefinite spinning on a pending backend
        assert_eq!(h.membership.confirm_call_count(), 1);
        assert_eq!(h.sender.sent_count(), 1);
        assert!(matches!(
            rec.snapshot().phase,
            Phase::AwaitingEmail { .. }
        ));
    }

    #[tokio::test]
    async fn automatic_send_is_deduplicated_across_page_views() {
        let h = harness();
        h.membership
            .script_confirm([Ok(ConfirmOutcome::AuthRequired)]);
        *h.membership.session_email.lock().unwrap() = Some("buyer@example.com".to_string());

        let first = reconciler(&h);
        first.run(false).await;
        assert_eq!(h.sender.sent_count(), 1);

        // same redirect URL visited again: the persisted flag suppresses a
        // second automatic send, but the overlay still comes up
        h.membership
            .script_confirm([Ok(ConfirmOutcome::AuthRequired)]);
        let second = reconciler(&h);
        second.run(false).await;

        assert_eq!(h.sender.sent_count(), 1);
        assert_eq!(h.store.recorded.lock().unwrap().len(), 1);
        assert!(matches!(
            second.snapshot().phase,
            Phase::AwaitingEmail { .. }
        ));
    }

    #[tokio::test]
    async fn session_lookup_failure_surfaces_an_error_without_sending() {
        let mut h = harness();
        let membership = Arc::new(MockMembershipService {
            fail_session_lookup: true,
            ..Default::default()
        });
        h.state.membership = membership.clone();
        membership.script_confirm([Ok(ConfirmOutcome::AuthRequired)]);
        let rec = Reconciler::new(h.state.clone(), redirect_url(), CancellationToken::new());

        rec.run(false).await;

        assert_eq!(h.sender.sent_count(), 0);
        match rec.snapshot().phase {
            Phase::Error { message } => {
                assert!(message.contains("could not look up the checkout session"))
            }
            other => panic!("expected error phase, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_session_email_surfaces_an_error_without_sending() {
        let h = harness();
        h.membership
            .script_confirm([Ok(ConfirmOutcome::AuthRequired)]);
        // session_email stays None
        let rec = reconciler(&h);

        rec.run(false).await;

        assert_eq!(h.sender.sent_count(), 0);
        match rec.snapshot().phase {
            Phase::Error { message } => {
                assert!(message.contains("no email address"))
            }
            other => panic!("expected error phase, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn broken_flag_store_still_sends_the_link() {
        let mut h = harness();
        let store = Arc::new(MockSentLinkStore {
            fail_reads: true,
            ..Default::default()
        });
        h.state.sent_links = store.clone();
        h.membership
            .script_confirm([Ok(ConfirmOutcome::AuthRequired)]);
        *h.membership.session_email.lock().unwrap() = Some("buyer@example.com".to_string());
        let rec = Reconciler::new(h.state.clone(), redirect_url(), CancellationToken::new());

        rec.run(false).await;

        assert_eq!(h.sender.sent_count(), 1);
        assert!(matches!(
            rec.snapshot().phase,
            Phase::AwaitingEmail { .. }
        ));
    }

    #[tokio::test]
    async fn resend_is_gated_by_the_cooldown() {
        let h = harness();
        h.membership
            .script_confirm([Ok(ConfirmOutcome::AuthRequired)]);
        *h.membership.session_email.lock().unwrap() = Some("buyer@example.com".to_string());
        let rec = reconciler(&h);
        rec.run(false).await;
        assert_eq!(h.sender.sent_count(), 1);

        // cooldown is running: no network call at all
        assert!(!rec.resend().await);
        assert_eq!(h.sender.sent_count(), 1);

        for _ in 0..30 {
            rec.apply(Event::CooldownTick);
        }
        assert_eq!(rec.snapshot().cooldown_seconds, 0);

        // explicit user intent bypasses the dedup record
        assert!(rec.resend().await);
        assert_eq!(h.sender.sent_count(), 2);
        assert_eq!(rec.snapshot().cooldown_seconds, 30);
    }

    #[tokio::test]
    async fn failed_resend_does_not_refund_the_cooldown() {
        let h = harness();
        h.membership
            .script_confirm([Ok(ConfirmOutcome::AuthRequired)]);
        *h.membership.session_email.lock().unwrap() = Some("buyer@example.com".to_string());
        let rec = reconciler(&h);
        rec.run(false).await;

        for _ in 0..30 {
            rec.apply(Event::CooldownTick);
        }
        h.sender.fail_send.store(true, Ordering::SeqCst);

        assert!(rec.resend().await);
        // failed sends are not recorded, and the cooldown re-armed anyway
        assert_eq!(h.sender.sent_count(), 1);
        assert_eq!(rec.snapshot().cooldown_seconds, 30);
    }

    #[tokio::test]
    async fn resend_is_a_no_op_outside_awaiting_email() {
        let h = harness();
        h.membership
            .script_confirm([Ok(ConfirmOutcome::Confirmed)]);
        let rec = reconciler(&h);
        rec.run(false).await;

        assert!(!rec.resend().await);
        assert_eq!(h.sender.sent_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_during_the_retry_delay_freezes_state() {
        let mut config = test_config();
        config.confirm_retry_delay = Duration::from_millis(200);
        let h = harness_with(config);
        // empty script: the first attempt fails and schedules a retry
        let cancel = CancellationToken::new();
        let rec = Reconciler::new(h.state.clone(), redirect_url(), cancel.clone());

        let runner = {
            let rec = rec.clone();
            tokio::spawn(async move { rec.run(false).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let frozen = rec.snapshot();
        runner.await.expect("runner");

        assert_eq!(h.membership.confirm_call_count(), 1);
        assert_eq!(rec.snapshot(), frozen);
        assert_eq!(frozen.attempts, 1);
    }

    #[tokio::test]
    async fn cancelled_token_blocks_any_further_mutation() {
        let h = harness();
        let cancel = CancellationToken::new();
        let rec = Reconciler::new(h.state.clone(), redirect_url(), cancel.clone());
        cancel.cancel();

        rec.run(false).await;
        assert!(!rec.resend().await);

        assert_eq!(h.membership.confirm_call_count(), 0);
        assert_eq!(rec.snapshot().phase, Phase::Idle);
        assert_eq!(
            rec.page_url().as_str(),
            "https://example.test/welcome?cs=cs_test_1&pending=1&tab=rewards"
        );
    }

    #[tokio::test]
    async fn confirmed_is_terminal_within_the_page_view() {
        let h = harness();
        h.membership.script_confirm([
            Ok(ConfirmOutcome::Confirmed),
            Ok(ConfirmOutcome::Confirmed),
        ]);
        let rec = reconciler(&h);

        rec.run(false).await;
        assert_eq!(h.membership.confirm_call_count(), 1);

        // a second trigger in the same view must not poll again
        rec.run(false).await;
        assert_eq!(h.membership.confirm_call_count(), 1);
    }

    #[tokio::test]
    async fn cooldown_ticker_counts_down_and_dies_with_the_token() {
        let h = harness();
        h.membership
            .script_confirm([Ok(ConfirmOutcome::AuthRequired)]);
        *h.membership.session_email.lock().unwrap() = Some("buyer@example.com".to_string());
        let cancel = CancellationToken::new();
        let rec = Reconciler::new(h.state.clone(), redirect_url(), cancel.clone());
        rec.run(false).await;
        assert_eq!(rec.snapshot().cooldown_seconds, 30);

        let ticker = rec.spawn_cooldown_ticker_with(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(60)).await;
        let after_ticking = rec.snapshot().cooldown_seconds;
        assert!(after_ticking < 30, "ticker never fired");

        cancel.cancel();
        ticker.await.expect("ticker task");
        let frozen = rec.snapshot().cooldown_seconds;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(rec.snapshot().cooldown_seconds, frozen);
    }
}
