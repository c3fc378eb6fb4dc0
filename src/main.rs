mod config;
mod models;
mod reconciler;
mod services;
mod state;
mod store;
mod utils;

use std::sync::Arc;

use anyhow::Context;
use reqwest::Client;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;
use uuid::Uuid;

use config::Config;
use models::account::Account;
use reconciler::tier_override::TierOverride;
use reconciler::transition::Phase;
use reconciler::view::ViewState;
use reconciler::Reconciler;
use services::membership::LiveMembershipClient;
use services::passwordless::LivePasswordlessClient;
use state::AppState;
use store::json_sent_link_repository::JsonSentLinkRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut args = std::env::args().skip(1);
    let raw_url = args
        .next()
        .context("usage: tiersync <redirect-url> [user-id]")?;
    let user_id = args
        .next()
        .map(|raw| Uuid::parse_str(&raw))
        .transpose()
        .context("user-id must be a UUID")?;
    let page_url = Url::parse(&raw_url).context("redirect-url must be an absolute URL")?;

    let config = Arc::new(Config::from_env());
    let http_client = Client::new();
    let app_state = AppState {
        membership: Arc::new(LiveMembershipClient::new(
            http_client.clone(),
            config.api_base_url.clone(),
        )),
        magic_link: Arc::new(LivePasswordlessClient::new(
            http_client,
            config.auth_base_url.clone(),
            config.auth_api_key.clone(),
        )),
        sent_links: Arc::new(JsonSentLinkRepository::new(
            config.sent_link_state_path.clone(),
        )),
        config: config.clone(),
    };

    // the membership store's current word on the account, when we know who
    // the visitor is
    let mut account: Option<Account> = None;
    if let Some(uid) = user_id {
        match app_state.membership.fetch_account(uid).await {
            Ok(fetched) => account = Some(fetched),
            Err(err) => {
                warn!(error = %err, user_id = %uid, "membership read failed; treating account as unpaid")
            }
        }
    }
    let already_paid = account.as_ref().map(Account::is_paid).unwrap_or(false);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received; tearing down the flow");
                cancel.cancel();
            }
        });
    }

    let rec = Reconciler::new(app_state.clone(), page_url, cancel.clone());
    rec.run(already_paid).await;

    // once confirmed, re-read the account so the display doesn't flash the
    // free tier while the membership store catches up
    let mut overrides = TierOverride::default();
    if matches!(rec.snapshot().phase, Phase::Confirmed) {
        if let Some(uid) = user_id {
            match app_state.membership.fetch_account(uid).await {
                Ok(fetched) => {
                    overrides.note_paid(fetched.tier);
                    account = Some(fetched);
                }
                Err(err) => warn!(error = %err, "post-confirmation membership read failed"),
            }
        }
    }

    if let Some(acct) = &account {
        let tier = overrides.resolve(acct);
        info!(
            tier = tier.as_str(),
            status = ?acct.status,
            points_boost = tier.points_boost(),
            "membership"
        );
        if let Some(period_end) = acct.current_period_end {
            info!(renews = %utils::format::period_end_label(period_end), "current period");
        }
    }

    let errored = render(&rec, cancel).await;
    println!("url: {}", rec.page_url());
    if errored {
        std::process::exit(1);
    }
    Ok(())
}

/// Prints the view the page would show; for the email overlay, keeps the
/// cooldown ticking and accepts `resend` / `quit` on stdin. Returns whether
/// the flow ended in an error.
async fn render(rec: &Reconciler, cancel: CancellationToken) -> bool {
    match rec.view() {
        ViewState::Hidden => false,
        ViewState::Content => {
            println!("Your membership is active.");
            false
        }
        ViewState::ActivatingBanner => {
            // only reachable if the run was cancelled mid-flight
            println!("Activating your membership…");
            false
        }
        ViewState::ErrorBanner { message } => {
            println!("{}", message);
            true
        }
        ViewState::EmailOverlay { email, .. } => {
            println!(
                "Check {} for a sign-in link to finish activating your membership.",
                email
            );
            println!("Type `resend` to send another link, or `quit` to exit.");
            let ticker = rec.spawn_cooldown_ticker();
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => break,
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(input)) => match input.trim() {
                        "resend" => {
                            if rec.resend().await {
                                println!("Another link is on its way.");
                            } else {
                                let remaining = rec.snapshot().cooldown_seconds;
                                println!("Please wait {}s before resending.", remaining);
                            }
                        }
                        "quit" => break,
                        _ => {}
                    },
                    Ok(None) | Err(_) => break,
                }
            }
            cancel.cancel();
            let _ = ticker.await;
            false
        }
    }
}
