use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Format, Json},
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use snafu::ResultExt;

use super::state::{
    CreateDirSnafu, RenameTempFileSnafu, SerializeConfigSnafu, SettingsError, SettingsStore,
    WriteFileSnafu,
};

pub const PREFERENCES_FILE_NAME: &str = "preferences.json";
/// Every stored key carries this prefix so the file can be shared with other data.
pub const PREFERENCE_KEY_PREFIX: &str = "lumier_";

type PreferenceEntries = BTreeMap<String, Value>;

/// Best-effort scalar settings that survive restarts.
///
/// Writes never fail the caller: a failed write is logged and the previous
/// value stays in effect. Reads never fail either: anything missing or
/// unparseable yields the caller's fallback.
pub struct PreferenceStore {
    entries: ArcSwap<PreferenceEntries>,
    path: PathBuf,
    write_guard: Mutex<()>,
}

impl PreferenceStore {
    pub fn default_path() -> PathBuf {
        SettingsStore::default_config_dir().join(PREFERENCES_FILE_NAME)
    }

    pub fn new(path: PathBuf) -> Self {
        let entries = Self::load_from_disk(&path);
        Self {
            entries: ArcSwap::from_pointee(entries),
            path,
            write_guard: Mutex::new(()),
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save<T: Serialize>(&self, key: &str, value: T) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(key, %error, "failed to encode preference");
                return;
            }
        };

        // Read-modify-write of the whole file must not interleave between writers.
        let _guard = self
            .write_guard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = PreferenceEntries::clone(&self.entries.load());
        next.insert(namespaced_key(key), value);

        if let Err(error) = self.persist(&next) {
            tracing::warn!(key, %error, "failed to save preference");
            return;
        }

        self.entries.store(Arc::new(next));
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str, fallback: T) -> T {
        let entries = self.entries.load();
        entries
            .get(&namespaced_key(key))
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or(fallback)
    }

    fn load_from_disk(path: &Path) -> PreferenceEntries {
        if !path.exists() {
            return PreferenceEntries::new();
        }

        match Figment::from(Json::file(path)).extract::<PreferenceEntries>() {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(
                    "failed to parse preferences from {:?}: {}. starting empty",
                    path,
                    error
                );
                PreferenceEntries::new()
            }
        }
    }

    fn persist(&self, entries: &PreferenceEntries) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-preferences-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(entries).context(SerializeConfigSnafu {
            stage: "serialize-preferences-json",
        })?;

        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-preferences-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.path).context(RenameTempFileSnafu {
            stage: "rename-temporary-preferences-file",
            from: temp_path,
            to: self.path.clone(),
        })?;

        Ok(())
    }
}

fn namespaced_key(key: &str) -> String {
    format!("{PREFERENCE_KEY_PREFIX}{key}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumier_storage::ImageSize;

    #[test]
    fn saved_value_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PREFERENCES_FILE_NAME);

        let store = PreferenceStore::new(path.clone());
        store.save("size", ImageSize::TwoK);
        store.save("styleId", "NOIR");

        let reloaded = PreferenceStore::new(path);
        assert_eq!(reloaded.get("size", ImageSize::OneK), ImageSize::TwoK);
        assert_eq!(reloaded.get("styleId", "NATURAL".to_string()), "NOIR");
    }

    #[test]
    fn absent_key_yields_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::new(dir.path().join(PREFERENCES_FILE_NAME));

        assert_eq!(store.get("size", ImageSize::OneK), ImageSize::OneK);
        assert_eq!(store.get("styleId", "NATURAL".to_string()), "NATURAL");
    }

    #[test]
    fn later_save_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferenceStore::new(dir.path().join(PREFERENCES_FILE_NAME));

        store.save("size", ImageSize::TwoK);
        store.save("size", ImageSize::FourK);
        assert_eq!(store.get("size", ImageSize::OneK), ImageSize::FourK);
    }

    #[test]
    fn keys_are_namespaced_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PREFERENCES_FILE_NAME);
        PreferenceStore::new(path.clone()).save("styleId", "METRO");

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(raw["lumier_styleId"], "METRO");
        assert!(raw.get("styleId").is_none());
    }

    #[test]
    fn wrongly_typed_or_corrupt_entries_yield_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PREFERENCES_FILE_NAME);
        std::fs::write(&path, r#"{"lumier_size": "8K", "lumier_count": "three"}"#).unwrap();

        let store = PreferenceStore::new(path.clone());
        assert_eq!(store.get("size", ImageSize::OneK), ImageSize::OneK);
        assert_eq!(store.get("count", 3_u32), 3);

        std::fs::write(&path, "definitely not json").unwrap();
        let store = PreferenceStore::new(path);
        assert_eq!(store.get("size", ImageSize::TwoK), ImageSize::TwoK);
    }

    #[test]
    fn failed_write_is_swallowed_and_not_observable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();

        let store = PreferenceStore::new(blocker.join(PREFERENCES_FILE_NAME));
        store.save("size", ImageSize::FourK);

        assert_eq!(store.get("size", ImageSize::OneK), ImageSize::OneK);
    }
}
