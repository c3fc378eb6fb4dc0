#![allow(dead_code)]
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{MagicLinkError, MagicLinkSender};

/// Recording sender for tests. Successful sends are captured as
/// `(email, redirect_url)` pairs; flipping `fail_send` makes every send fail
/// without recording.
#[derive(Debug, Default)]
pub struct MockMagicLinkSender {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail_send: AtomicBool,
}

impl MockMagicLinkSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl MagicLinkSender for MockMagicLinkSender {
    async fn send_magic_link(
        &self,
        email: &str,
        redirect_url: &str,
    ) -> Result<(), MagicLinkError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(MagicLinkError::Api {
                status: 500,
                message: "mock send failure".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((email.to_string(), redirect_url.to_string()));
        Ok(())
    }
}
