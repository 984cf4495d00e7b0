use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    core::{
        domain::Difficulty,
        traits::store::{KeyValueStore, StoreError},
    },
    storage::keys,
};

/// Typed access to the user's saved settings.
#[derive(Debug, Clone)]
pub struct Preferences {
    store: Arc<dyn KeyValueStore>,
}

impl Preferences {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn api_key(&self) -> Option<String> {
        self.read::<String>(keys::API_KEY)
            .filter(|key| !key.is_empty())
    }

    pub fn set_api_key(&self, api_key: &str) -> Result<(), StoreError> {
        self.write(keys::API_KEY, api_key)
    }

    pub fn clear_api_key(&self) -> Result<(), StoreError> {
        self.store.remove(keys::API_KEY)
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key().is_some()
    }

    pub fn last_topic(&self) -> Option<String> {
        self.read(keys::LAST_TOPIC)
    }

    pub fn set_last_topic(&self, topic: &str) -> Result<(), StoreError> {
        self.write(keys::LAST_TOPIC, topic)
    }

    pub fn last_category(&self) -> Option<String> {
        self.read(keys::LAST_CATEGORY)
    }

    pub fn set_last_category(&self, category: &str) -> Result<(), StoreError> {
        self.write(keys::LAST_CATEGORY, category)
    }

    pub fn last_difficulty(&self) -> Difficulty {
        self.read(keys::LAST_DIFFICULTY).unwrap_or_default()
    }

    pub fn set_last_difficulty(&self, difficulty: Difficulty) -> Result<(), StoreError> {
        self.write(keys::LAST_DIFFICULTY, difficulty)
    }

    /// Forgets everything this application stored.
    pub fn reset(&self) -> Result<(), StoreError> {
        self.store.clear()
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = match self.store.get(key) {
            Ok(value) => value?,
            Err(e) => {
                tracing::error!("Error reading {} from storage: {}", key, e);
                return None;
            }
        };

        match serde_json::from_value(value) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring unexpected value stored under {}: {}", key, e);
                None
            }
        }
    }

    fn write<T: Serialize>(&self, key: &str, value: T) -> Result<(), StoreError> {
        let value: Value = serde_json::to_value(value)?;
        self.store.set(key, &value)
    }
}
