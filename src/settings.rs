use crate::error::Result;
use crate::store;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// User-tunable playback settings persisted as `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Seconds (scheduler ticks) each image stays on screen.
    #[serde(default)]
    pub delay: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_folder: Option<String>,
    #[serde(default)]
    pub weighted_shuffle: bool,
}

impl PlaybackConfig {
    pub fn with_delay(delay: u64) -> Self {
        Self {
            delay: delay.max(1),
            current_folder: None,
            weighted_shuffle: false,
        }
    }
}

/// Load/save access to [`PlaybackConfig`] with a single writer lock.
///
/// Readers never take the lock; they may observe a settings document that is
/// about to be replaced, which is fine because every write is atomic.
pub struct SettingsStore {
    path: PathBuf,
    uploads: PathBuf,
    default_delay: u64,
    writer: Mutex<()>,
}

impl SettingsStore {
    pub fn new(path: PathBuf, uploads: PathBuf, default_delay: u64) -> Self {
        Self {
            path,
            uploads,
            default_delay: default_delay.max(1),
            writer: Mutex::new(()),
        }
    }

    /// Never fails: missing or unreadable documents yield the defaults.
    pub fn load(&self) -> PlaybackConfig {
        let mut cfg = match store::read_json_optional::<PlaybackConfig>(&self.path) {
            Ok(Some(cfg)) => cfg,
            Ok(None) => PlaybackConfig::with_delay(self.default_delay),
            Err(err) => {
                warn!(error = %err, "settings unreadable; using defaults");
                PlaybackConfig::with_delay(self.default_delay)
            }
        };
        if cfg.delay == 0 {
            cfg.delay = self.default_delay;
        }
        if let Some(folder) = cfg.current_folder.as_deref() {
            if !self.uploads.join(folder).is_dir() {
                warn!(folder, "selected folder no longer exists; clearing selection");
                cfg.current_folder = None;
            }
        }
        cfg
    }

    pub fn save(&self, cfg: &PlaybackConfig) -> Result<()> {
        store::write_json(&self.path, cfg)
    }

    /// Load, mutate and save under the writer lock. A failed save is logged
    /// and the mutated value is still returned to the caller.
    pub fn update<F>(&self, mutate: F) -> PlaybackConfig
    where
        F: FnOnce(&mut PlaybackConfig),
    {
        let _writer = self.writer.lock();
        let mut cfg = self.load();
        mutate(&mut cfg);
        cfg.delay = cfg.delay.max(1);
        match self.save(&cfg) {
            Ok(()) => info!(
                delay = cfg.delay,
                folder = cfg.current_folder.as_deref().unwrap_or("-"),
                weighted = cfg.weighted_shuffle,
                "settings saved"
            ),
            Err(err) => error!(error = %err, "failed to save settings"),
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::{PlaybackConfig, SettingsStore};
    use std::fs;
    use tempfile::tempdir;

    fn store_in(root: &std::path::Path) -> SettingsStore {
        SettingsStore::new(root.join("config.json"), root.join("uploads"), 5)
    }

    #[test]
    fn missing_and_corrupt_documents_fall_back_to_defaults() {
        let tmp = tempdir().expect("tempdir");
        let store = store_in(tmp.path());
        assert_eq!(store.load(), PlaybackConfig::with_delay(5));
        fs::write(tmp.path().join("config.json"), b"{{{").unwrap();
        assert_eq!(store.load(), PlaybackConfig::with_delay(5));
    }

    #[test]
    fn save_and_load_round_trip() {
        let tmp = tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("uploads").join("holiday")).unwrap();
        let store = store_in(tmp.path());
        let cfg = PlaybackConfig {
            delay: 1200,
            current_folder: Some("holiday".to_string()),
            weighted_shuffle: true,
        };
        store.save(&cfg).expect("save");
        assert_eq!(store.load(), cfg);
    }

    #[test]
    fn legacy_document_without_shuffle_flag_parses() {
        let tmp = tempdir().expect("tempdir");
        fs::write(
            tmp.path().join("config.json"),
            br#"{"delay": 60, "current_folder": null}"#,
        )
        .unwrap();
        let cfg = store_in(tmp.path()).load();
        assert_eq!(cfg.delay, 60);
        assert_eq!(cfg.current_folder, None);
        assert!(!cfg.weighted_shuffle);
    }

    #[test]
    fn vanished_folder_is_cleared_and_zero_delay_repaired() {
        let tmp = tempdir().expect("tempdir");
        fs::write(
            tmp.path().join("config.json"),
            br#"{"delay": 0, "current_folder": "gone"}"#,
        )
        .unwrap();
        let cfg = store_in(tmp.path()).load();
        assert_eq!(cfg.delay, 5);
        assert_eq!(cfg.current_folder, None);
    }

    #[test]
    fn update_persists_mutation() {
        let tmp = tempdir().expect("tempdir");
        let store = store_in(tmp.path());
        let updated = store.update(|cfg| cfg.weighted_shuffle = true);
        assert!(updated.weighted_shuffle);
        assert!(store.load().weighted_shuffle);
    }
}
