//! Conversation drafts: the sled-backed stand-in for browser local storage.
//! One JSON document per key; the gateway namespaces keys per user.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{ChatMessage, PartialAssessment};

pub const DRAFT_STORAGE_KEY: &str = "conversation-draft";

/// In-progress conversational state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, rename = "extractedData")]
    pub extracted_data: PartialAssessment,
}

#[derive(Clone)]
pub struct DraftStore {
    db: sled::Db,
}

impl DraftStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Draft key for a signed-in user.
    pub fn user_key(user_id: &str) -> String {
        format!("{}/{}", DRAFT_STORAGE_KEY, user_id)
    }

    pub fn save(&self, key: &str, draft: &Draft) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(draft)?;
        self.db.insert(key.as_bytes(), bytes)?;
        self.db.flush()?;
        Ok(())
    }

    /// Stored JSON exactly as written.
    pub fn load_raw(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    /// Parsed draft. A document that no longer parses is treated as absent.
    pub fn load(&self, key: &str) -> Result<Option<Draft>, StoreError> {
        let Some(raw) = self.load_raw(key)? else {
            return Ok(None);
        };
        match serde_json::from_slice::<Draft>(&raw) {
            Ok(d) => Ok(Some(d)),
            Err(e) => {
                tracing::warn!(target: "cardiosense::draft", key, error = %e, "ignoring unreadable draft");
                Ok(None)
            }
        }
    }

    /// Remove the draft. Returns whether one was present.
    pub fn clear(&self, key: &str) -> Result<bool, StoreError> {
        let removed = self.db.remove(key.as_bytes())?.is_some();
        self.db.flush()?;
        Ok(removed)
    }
}
