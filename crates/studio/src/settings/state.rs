use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use lumier_generation::{
    DEFAULT_GEMINI_ENDPOINT, DEFAULT_GEMINI_IMAGE_MODEL, GEMINI_PROVIDER_ID, ProviderConfig,
};
use lumier_storage::HISTORY_DATABASE_FILE_NAME;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "lumier";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const SETTINGS_ENV_PREFIX: &str = "LUMIER_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudioSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Overrides the platform data directory location of the history database.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl Default for StudioSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            model: default_model(),
            database_path: None,
        }
    }
}

impl StudioSettings {
    pub fn to_provider_config(&self) -> Option<ProviderConfig> {
        if !self.has_api_key() {
            return None;
        }

        Some(ProviderConfig::new(
            &self.provider_id,
            &self.api_key,
            &self.endpoint,
            &self.model,
        ))
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn database_location(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }

    pub fn normalized(mut self) -> Self {
        self.provider_id = non_blank_or(self.provider_id, default_provider_id);
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = non_blank_or(self.endpoint, default_endpoint);
        self.model = non_blank_or(self.model, default_model);
        self.database_path = self
            .database_path
            .filter(|path| !path.as_os_str().is_empty());
        self
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<StudioSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".lumier"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<StudioSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: StudioSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &Path) -> StudioSettings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }

        // Environment variables win over the file, the file wins over defaults.
        let figment = Figment::from(Serialized::defaults(StudioSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(SETTINGS_ENV_PREFIX));

        match figment.extract::<StudioSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                StudioSettings::default()
            }
        }
    }

    fn persist(&self, settings: &StudioSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".lumier"))
        .join(HISTORY_DATABASE_FILE_NAME)
}

fn default_provider_id() -> String {
    GEMINI_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_GEMINI_ENDPOINT.to_string()
}

fn default_model() -> String {
    DEFAULT_GEMINI_IMAGE_MODEL.to_string()
}

fn non_blank_or(value: String, fallback: fn() -> String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults_without_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join(SETTINGS_FILE_NAME));
        let settings = store.settings();

        assert_eq!(settings.provider_id, GEMINI_PROVIDER_ID);
        assert_eq!(settings.model, DEFAULT_GEMINI_IMAGE_MODEL);
        if !settings.has_api_key() {
            assert!(settings.to_provider_config().is_none());
        }
    }

    #[test]
    fn update_persists_normalized_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE_NAME);
        let store = SettingsStore::new(path.clone());

        store
            .update(StudioSettings {
                provider_id: "  ".to_string(),
                api_key: "  secret-key ".to_string(),
                endpoint: String::new(),
                model: " custom-model ".to_string(),
                database_path: Some(PathBuf::new()),
            })
            .unwrap();

        let reloaded = SettingsStore::new(path);
        let settings = reloaded.settings();
        assert_eq!(settings.provider_id, GEMINI_PROVIDER_ID);
        assert_eq!(settings.api_key, "secret-key");
        assert_eq!(settings.endpoint, DEFAULT_GEMINI_ENDPOINT);
        assert_eq!(settings.model, "custom-model");
        assert_eq!(settings.database_path, None);

        let config = settings.to_provider_config().unwrap();
        assert_eq!(config.api_key, "secret-key");
    }

    #[test]
    fn unparseable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();

        let store = SettingsStore::new(path);
        assert_eq!(store.settings().model, DEFAULT_GEMINI_IMAGE_MODEL);
    }

    #[test]
    fn database_path_override_is_used() {
        let settings = StudioSettings {
            database_path: Some(PathBuf::from("/tmp/lumier-test/history.db")),
            ..StudioSettings::default()
        };
        assert_eq!(
            settings.database_location(),
            PathBuf::from("/tmp/lumier-test/history.db")
        );
        assert!(
            StudioSettings::default()
                .database_location()
                .ends_with(HISTORY_DATABASE_FILE_NAME)
        );
    }
}
