#![allow(dead_code)]
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{MagicLinkError, MagicLinkSender};

pub struct LivePasswordlessClient {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "error_description", alias = "message")]
    error: Option<String>,
}

impl LivePasswordlessClient {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl MagicLinkSender for LivePasswordlessClient {
    async fn send_magic_link(
        &self,
        email: &str,
        redirect_url: &str,
    ) -> Result<(), MagicLinkError> {
        if !email.contains('@') {
            return Err(MagicLinkError::InvalidEmail(email.to_string()));
        }

        let mut request = self
            .client
            .post(format!("{}/magiclink", self.base_url))
            .json(&json!({ "email": email, "redirect_to": redirect_url }));
        if !self.api_key.is_empty() {
            request = request.header("apikey", &self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| MagicLinkError::Http(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|parsed| parsed.error)
            .map(|msg| msg.trim().to_string())
            .filter(|msg| !msg.is_empty())
            .unwrap_or_else(|| "magic link request failed".to_string());
        Err(MagicLinkError::Api {
            status: status.as_u16(),
            message,
        })
    }
}
