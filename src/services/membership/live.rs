#![allow(dead_code)]
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{ConfirmOutcome, MembershipError, MembershipService};
use crate::models::account::{Account, SubscriptionStatus, Tier};

pub struct LiveMembershipClient {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct AccountBody {
    tier: Option<String>,
    status: Option<String>,
    /// Unix timestamp (seconds), same convention the billing provider uses.
    current_period_end: Option<i64>,
}

#[derive(Deserialize, Default)]
struct ConfirmBody {
    #[serde(default)]
    ok: Option<bool>,
    #[serde(default)]
    pending: Option<bool>,
}

#[derive(Deserialize)]
struct SessionBody {
    email: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

impl LiveMembershipClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn api_error(status: StatusCode, body: &str) -> MembershipError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.error)
        .map(|msg| msg.trim().to_string())
        .filter(|msg| !msg.is_empty())
        .unwrap_or_else(|| "membership api request failed".to_string());
    MembershipError::Api {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl MembershipService for LiveMembershipClient {
    async fn fetch_account(&self, user_id: Uuid) -> Result<Account, MembershipError> {
        let response = self
            .client
            .get(self.url("/api/account"))
            .query(&[("user", user_id.to_string())])
            .send()
            .await
            .map_err(|err| MembershipError::Http(err.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        let parsed: AccountBody = serde_json::from_str(&body)
            .map_err(|err| MembershipError::Malformed(err.to_string()))?;
        Ok(Account {
            tier: Tier::from_raw(parsed.tier.as_deref()),
            status: SubscriptionStatus::from_raw(parsed.status.as_deref()),
            current_period_end: parsed
                .current_period_end
                .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok()),
        })
    }

    async fn confirm_checkout(
        &self,
        session_id: &str,
    ) -> Result<ConfirmOutcome, MembershipError> {
        let response = self
            .client
            .get(self.url("/api/confirm-checkout"))
            .query(&[("cs", session_id)])
            .send()
            .await
            .map_err(|err| MembershipError::Http(err.to_string()))?;

        let status = response.status();
        // 401 means "membership exists, nobody is signed in" and is a
        // recognized branch of the flow rather than a failure.
        if status == StatusCode::UNAUTHORIZED {
            return Ok(ConfirmOutcome::AuthRequired);
        }

        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        let parsed: ConfirmBody = serde_json::from_str(&body)
            .map_err(|err| MembershipError::Malformed(err.to_string()))?;
        if parsed.ok == Some(true) {
            return Ok(ConfirmOutcome::Confirmed);
        }
        if parsed.pending == Some(true) {
            return Ok(ConfirmOutcome::Pending);
        }
        Err(MembershipError::Malformed(
            "confirmation response carried neither ok nor pending".to_string(),
        ))
    }

    async fn lookup_session_email(
        &self,
        session_id: &str,
    ) -> Result<Option<String>, MembershipError> {
        let response = self
            .client
            .get(self.url("/api/checkout/session"))
            .query(&[("session_id", session_id)])
            .send()
            .await
            .map_err(|err| MembershipError::Http(err.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        let parsed: SessionBody = serde_json::from_str(&body)
            .map_err(|err| MembershipError::Malformed(err.to_string()))?;
        Ok(parsed
            .email
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty()))
    }
}
