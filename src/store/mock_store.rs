#![allow(dead_code)]
use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use super::sent_link_repository::{flag_key, SentLinkRepository, StoreError};

/// In-memory flag store for tests; records every `record` call.
#[derive(Debug, Default)]
pub struct MockSentLinkStore {
    pub flags: Mutex<HashSet<String>>,
    pub recorded: Mutex<Vec<String>>,
    pub fail_reads: bool,
}

impl MockSentLinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, session_id: &str, email: &str) {
        self.flags
            .lock()
            .unwrap()
            .insert(flag_key(session_id, email));
    }
}

#[async_trait]
impl SentLinkRepository for MockSentLinkStore {
    async fn has(&self, session_id: &str, email: &str) -> Result<bool, StoreError> {
        if self.fail_reads {
            return Err(StoreError::Corrupt("mock read failure".to_string()));
        }
        Ok(self
            .flags
            .lock()
            .unwrap()
            .contains(&flag_key(session_id, email)))
    }

    async fn record(&self, session_id: &str, email: &str) -> Result<(), StoreError> {
        let key = flag_key(session_id, email);
        self.flags.lock().unwrap().insert(key.clone());
        self.recorded.lock().unwrap().push(key);
        Ok(())
    }
}
