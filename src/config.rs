use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub struct Config {
    /// Membership backend origin (account, confirmation, session lookup).
    pub api_base_url: String,
    /// Passwordless auth provider origin.
    pub auth_base_url: String,
    pub auth_api_key: String,
    /// Site origin the sign-in link should land the user on.
    pub site_origin: String,
    pub sent_link_state_path: PathBuf,
    pub max_confirm_attempts: u32,
    pub confirm_retry_delay: Duration,
    pub resend_cooldown_seconds: u32,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok(); // Load .env file

        let api_base_url = env::var("API_BASE_URL").expect("API_BASE_URL must be set");
        let auth_base_url = env::var("AUTH_BASE_URL").expect("AUTH_BASE_URL must be set");
        let auth_api_key = env::var("AUTH_API_KEY").unwrap_or_default();
        let site_origin = env::var("SITE_ORIGIN").expect("SITE_ORIGIN must be set");

        let sent_link_state_path = env::var("SENT_LINK_STATE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".tiersync/sent_links.json"));

        let max_confirm_attempts = env::var("CONFIRM_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(20);
        let confirm_retry_delay = env::var("CONFIRM_RETRY_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or_else(|| Duration::from_secs(3));
        let resend_cooldown_seconds = env::var("RESEND_COOLDOWN_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(30);

        Config {
            api_base_url,
            auth_base_url,
            auth_api_key,
            site_origin,
            sent_link_state_path,
            max_confirm_attempts,
            confirm_retry_delay,
            resend_cooldown_seconds,
        }
    }

    /// Where the sign-in link drops the user once they click it.
    pub fn activation_redirect_url(&self) -> String {
        format!("{}/welcome", self.site_origin.trim_end_matches('/'))
    }
}
