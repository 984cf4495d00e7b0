use serde_json::Value;

/// String-keyed JSON persistence.
///
/// `clear` only removes keys owned by this application (see
/// [`crate::constants::STORAGE_PREFIX`]); anything else in the store is left
/// alone.
#[mockall::automock]
pub trait KeyValueStore: std::fmt::Debug + Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn set(&self, key: &str, value: &Value) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable: {msg}")]
    Io { msg: String },
    #[error("stored data is not valid JSON: {msg}")]
    Corrupt { msg: String },
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io {
            msg: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt {
            msg: err.to_string(),
        }
    }
}
