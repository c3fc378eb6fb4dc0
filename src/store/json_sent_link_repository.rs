use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;

use super::sent_link_repository::{flag_key, SentLinkRepository, StoreError};

/// File-backed flag store: one JSON object mapping dedup keys to `true`,
/// living in the user's profile directory. A missing file reads as empty.
pub struct JsonSentLinkRepository {
    path: PathBuf,
    // serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl JsonSentLinkRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<BTreeMap<String, bool>, StoreError> {
        match fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|err| StoreError::Corrupt(err.to_string())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl SentLinkRepository for JsonSentLinkRepository {
    async fn has(&self, session_id: &str, email: &str) -> Result<bool, StoreError> {
        let flags = self.load().await?;
        Ok(flags
            .get(&flag_key(session_id, email))
            .copied()
            .unwrap_or(false))
    }

    async fn record(&self, session_id: &str, email: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut flags = self.load().await?;
        flags.insert(flag_key(session_id, email), true);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(&flags)
            .map_err(|err| StoreError::Corrupt(err.to_string()))?;
        fs::write(&self.path, bytes).await?;
        Ok(())
    }
}
