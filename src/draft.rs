//! Draft Storage Abstraction
//!
//! A draft is a whole-snapshot copy of a session's slot set plus its current
//! page, keyed by session key. Every save overwrites the prior snapshot; there
//! is no field-level merge. Snapshots carry a SHA-256 content hash so that
//! saving identical content twice skips the second write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

use crate::slot::Slot;
use crate::types::SlotId;

/// Error type for draft storage operations
#[derive(Debug, thiserror::Error)]
pub enum DraftStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid session key: {0}")]
    InvalidKey(String),
}

/// Persisted snapshot of a form session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub session_key: String,
    pub form_id: String,
    pub current_page: usize,
    pub slots: BTreeMap<SlotId, Slot>,
    /// Hex SHA-256 over `current_page` and `slots`
    pub content_hash: String,
    pub saved_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct HashedContent<'a> {
    current_page: usize,
    slots: &'a BTreeMap<SlotId, Slot>,
}

impl Draft {
    pub fn new(
        session_key: impl Into<String>,
        form_id: impl Into<String>,
        current_page: usize,
        slots: BTreeMap<SlotId, Slot>,
    ) -> Result<Self, DraftStoreError> {
        let content_hash = content_hash(current_page, &slots)?;
        Ok(Self {
            session_key: session_key.into(),
            form_id: form_id.into(),
            current_page,
            slots,
            content_hash,
            saved_at: Utc::now(),
        })
    }
}

/// Content address of a snapshot. Map keys serialize in sorted order, so the
/// JSON is canonical without further normalization.
pub fn content_hash(
    current_page: usize,
    slots: &BTreeMap<SlotId, Slot>,
) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(&HashedContent {
        current_page,
        slots,
    })?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Key-value persistence of drafts
#[async_trait]
pub trait DraftStore: Send + Sync {
    /// Store the snapshot, replacing any previous one for the same key.
    /// Returns `false` when the stored snapshot already has identical content.
    async fn save(&self, draft: &Draft) -> Result<bool, DraftStoreError>;

    async fn load(&self, session_key: &str) -> Result<Option<Draft>, DraftStoreError>;

    /// Remove the draft; deleting a missing key is not an error
    async fn delete(&self, session_key: &str) -> Result<(), DraftStoreError>;
}

/// In-memory draft store
#[derive(Debug, Default)]
pub struct MemoryDraftStore {
    drafts: RwLock<HashMap<String, Draft>>,
}

impl MemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.drafts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DraftStore for MemoryDraftStore {
    async fn save(&self, draft: &Draft) -> Result<bool, DraftStoreError> {
        let mut drafts = self.drafts.write().await;
        if let Some(existing) = drafts.get(&draft.session_key) {
            if existing.content_hash == draft.content_hash {
                debug!(key = %draft.session_key, "draft unchanged, skipping write");
                return Ok(false);
            }
        }
        drafts.insert(draft.session_key.clone(), draft.clone());
        Ok(true)
    }

    async fn load(&self, session_key: &str) -> Result<Option<Draft>, DraftStoreError> {
        Ok(self.drafts.read().await.get(session_key).cloned())
    }

    async fn delete(&self, session_key: &str) -> Result<(), DraftStoreError> {
        self.drafts.write().await.remove(session_key);
        Ok(())
    }
}

/// One JSON file per session key under a base directory
pub struct FileDraftStore {
    base_path: PathBuf,
}

impl FileDraftStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn path_for_key(&self, session_key: &str) -> Result<PathBuf, DraftStoreError> {
        let valid = !session_key.is_empty()
            && session_key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            && !session_key.starts_with('.');
        if !valid {
            return Err(DraftStoreError::InvalidKey(session_key.to_string()));
        }
        Ok(self.base_path.join(format!("{}.json", session_key)))
    }
}

#[async_trait]
impl DraftStore for FileDraftStore {
    async fn save(&self, draft: &Draft) -> Result<bool, DraftStoreError> {
        let path = self.path_for_key(&draft.session_key)?;

        if let Some(existing) = self.load(&draft.session_key).await? {
            if existing.content_hash == draft.content_hash {
                debug!(key = %draft.session_key, "draft unchanged, skipping write");
                return Ok(false);
            }
        }

        tokio::fs::create_dir_all(&self.base_path).await?;

        // Write then rename so a reader never sees a half-written snapshot
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(draft)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "draft written");
        Ok(true)
    }

    async fn load(&self, session_key: &str) -> Result<Option<Draft>, DraftStoreError> {
        let path = self.path_for_key(session_key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, session_key: &str) -> Result<(), DraftStoreError> {
        let path = self.path_for_key(session_key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
