mod config;
pub mod database;
mod memory;
mod tabs;

pub use config::{Config, LogConfig, SessionDefaults};
pub use database::{Database, Stats};
pub use memory::MemoryStore;
pub use tabs::{Tab, TabGroup, TabId, TabStorage};

use std::path::PathBuf;

use crate::error::StorageError;

/// String key-value storage shared by every tab of one browser profile.
///
/// There is no compare-and-swap: writers race, and last-writer-wins on the
/// record's `lastTick` is the only concurrency control built on top.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// Returns the data directory.
///
/// `DEEPFOCUS_DATA_DIR` wins; otherwise `~/.config/deepfocus[-dev]/` based on
/// `DEEPFOCUS_ENV`.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    let dir = match std::env::var_os("DEEPFOCUS_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env =
                std::env::var("DEEPFOCUS_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("deepfocus-dev")
            } else {
                base_dir.join("deepfocus")
            }
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
