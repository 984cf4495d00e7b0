pub mod file;
pub mod memory;
pub mod preferences;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use preferences::Preferences;

pub mod keys {
    pub const API_KEY: &str = "challenge_trainer_api_key";
    pub const LAST_TOPIC: &str = "challenge_trainer_last_topic";
    pub const LAST_DIFFICULTY: &str = "challenge_trainer_last_difficulty";
    pub const LAST_CATEGORY: &str = "challenge_trainer_last_category";
}

fn is_owned(key: &str) -> bool {
    key.starts_with(crate::constants::STORAGE_PREFIX)
}
