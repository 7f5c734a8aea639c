use thiserror::Error;

use super::sync_batch::SyncBatch;

/// Failure of the JSON codec
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed JSON batch: {message}")]
pub struct JsonError {
    pub message: String,
}

impl SyncBatch {
    pub fn to_json(&self) -> Result<String, JsonError> {
        serde_json::to_string(self).map_err(|error| JsonError {
            message: error.to_string(),
        })
    }

    pub fn from_json(text: &str) -> Result<Self, JsonError> {
        serde_json::from_str(text).map_err(|error| JsonError {
            message: error.to_string(),
        })
    }
}
