//! Persisted operator preferences.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Preferences carried between runs, stored as TOML under the user config
/// directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Preferences {
    /// Remote preselected in the selection menu.
    pub default_remote: Option<String>,
}

impl Preferences {
    /// Load preferences, falling back to defaults when the file is missing
    /// or unreadable (a corrupt prefs file should never block a run).
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };
        match toml::from_str(&content) {
            Ok(prefs) => prefs,
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "ignoring unparsable preferences");
                Self::default()
            }
        }
    }

    /// Persist preferences, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("failed to serialize preferences")?;
        std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
    }
}

/// Location of the preferences file.
pub fn preferences_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".config/icloud-auth/prefs.toml")
}
