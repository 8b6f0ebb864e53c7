/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Startup preferences, read from a TOML file under the platform config
//! directory. Missing or unreadable preferences fall back to defaults.

use std::path::{Path, PathBuf};

use log::warn;
use serde::Deserialize;

use crate::rotation::DEFAULT_INTERACTION_ODDS;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Prefs {
    /// Where the settings database lives. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
    /// Base URL of the optional remote settings mirror.
    pub mirror_url: Option<String>,
    /// Key required for mutating admin commands.
    pub admin_key: String,
    /// Odds that a user interaction opens an ad.
    pub interaction_odds: f64,
    /// Tracing env-filter directives, e.g. "galleryshell=debug".
    pub tracing_filter: Option<String>,
}

impl Default for Prefs {
    fn default() -> Self {
        Self {
            data_dir: None,
            mirror_url: None,
            admin_key: "admin123".to_string(),
            interaction_odds: DEFAULT_INTERACTION_ODDS,
            tracing_filter: None,
        }
    }
}

impl Prefs {
    /// Load preferences from the default location.
    pub fn load() -> Self {
        Self::load_from(&default_config_dir().join("prefs.toml"))
    }

    /// Load preferences from a specific file, falling back to defaults when
    /// the file is absent or unreadable.
    pub fn load_from(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match toml::from_str(&raw) {
            Ok(prefs) => prefs,
            Err(e) => {
                warn!("Failed to parse {}, using defaults: {e}", path.display());
                Self::default()
            },
        }
    }
}

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    let mut dir = dirs::config_dir().expect("No config directory available");
    dir.push("galleryshell");
    dir
}

/// Get the default storage directory for the settings database
pub fn default_data_dir() -> PathBuf {
    let mut dir = default_config_dir();
    dir.push("data");
    dir
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_file_yields_defaults() {
        let prefs = Prefs::load_from(Path::new("/nonexistent/prefs.toml"));
        assert_eq!(prefs.admin_key, "admin123");
        assert_eq!(prefs.interaction_odds, DEFAULT_INTERACTION_ODDS);
        assert!(prefs.mirror_url.is_none());
    }

    #[test]
    fn test_garbage_file_yields_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{{{{ not toml").unwrap();
        let prefs = Prefs::load_from(file.path());
        assert_eq!(prefs.admin_key, "admin123");
    }

    #[test]
    fn test_partial_file_overrides_only_named_fields() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(
            b"admin_key = \"hunter2\"\nmirror_url = \"https://mirror.example\"\n",
        )
        .unwrap();
        let prefs = Prefs::load_from(file.path());
        assert_eq!(prefs.admin_key, "hunter2");
        assert_eq!(prefs.mirror_url.as_deref(), Some("https://mirror.example"));
        assert_eq!(prefs.interaction_odds, DEFAULT_INTERACTION_ODDS);
        assert!(prefs.data_dir.is_none());
    }
}
