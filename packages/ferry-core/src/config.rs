//! Engine settings.
//!
//! A single JSON file supplies the handful of knobs the engine needs from
//! its embedder; today that is only the storage directory destination
//! streams are created under.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Settings consumed by the transfer registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory under which destination files are created.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))
    }
}
