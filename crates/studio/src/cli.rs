use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::future::try_join_all;
use lumier_generation::{
    GeneratedImage, GenerationError, MAX_SOURCE_IMAGES, STYLE_PRESETS, SourceImage,
    create_generator,
};
use lumier_storage::{HistoryItemId, ImageSize, LazyHistoryStore, StorageError};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::history::HistoryController;
use crate::settings::preferences::PreferenceStore;
use crate::settings::state::{SettingsError, SettingsStore, StudioSettings};
use crate::studio::FeedStudio;

#[derive(Debug, Parser)]
#[command(
    name = "lumier",
    version,
    about = "Turn product photos into a single social feed image"
)]
pub struct Cli {
    /// Settings file (defaults to settings.json in the platform config directory)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Preferences file (defaults to preferences.json in the platform config directory)
    #[arg(long, global = true)]
    pub preferences: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a feed image from up to six product photos
    Generate {
        /// Output resolution: 1K, 2K or 4K (remembered for later runs)
        #[arg(long, value_parser = parse_image_size)]
        size: Option<ImageSize>,

        /// Style preset id, see `lumier styles` (remembered for later runs)
        #[arg(long)]
        style: Option<String>,

        /// Where to write the PNG (defaults to lumier-feed-<style>.png)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Product photos
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// List past generations, newest first
    History,
    /// Write a past generation to disk and make its size and style current
    Restore {
        id: String,

        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// List the available style presets
    Styles,
    /// Delete every stored generation
    ClearHistory,
    /// Store the API key used for generation
    SetKey { key: String },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("{source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("no API key configured"))]
    MissingApiKey { stage: &'static str },
    #[snafu(display("failed to read image {path:?}: {source}"))]
    ReadImage {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("{source}"))]
    Generation {
        stage: &'static str,
        source: GenerationError,
    },
    #[snafu(display("{source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("no history item with id '{id}'"))]
    UnknownHistoryItem { stage: &'static str, id: String },
    #[snafu(display("failed to write {path:?}: {source}"))]
    WriteOutput {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type CliResult<T> = Result<T, CliError>;

impl CliError {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Settings { stage, .. }
            | Self::MissingApiKey { stage }
            | Self::ReadImage { stage, .. }
            | Self::Generation { stage, .. }
            | Self::Storage { stage, .. }
            | Self::UnknownHistoryItem { stage, .. }
            | Self::WriteOutput { stage, .. } => stage,
        }
    }

    /// Whether the user should be pointed at `lumier set-key`.
    pub fn requires_new_credentials(&self) -> bool {
        match self {
            Self::MissingApiKey { .. } => true,
            Self::Generation { source, .. } => source.requires_new_credentials(),
            _ => false,
        }
    }
}

pub async fn run(cli: Cli) -> CliResult<()> {
    let settings_store = match &cli.settings {
        Some(path) => SettingsStore::new(path.clone()),
        None => SettingsStore::load(),
    };

    let preferences = cli.preferences;
    match cli.command {
        Command::Styles => {
            print_styles();
            Ok(())
        }
        Command::SetKey { key } => set_key(&settings_store, key),
        Command::Generate {
            size,
            style,
            out,
            images,
        } => {
            let studio = open_studio(&settings_store, preferences).await;
            generate(&settings_store, &studio, size, style, out, images).await
        }
        Command::History => {
            let studio = open_studio(&settings_store, preferences).await;
            print_history(&studio);
            Ok(())
        }
        Command::Restore { id, out } => {
            let studio = open_studio(&settings_store, preferences).await;
            restore(&studio, &id, out).await
        }
        Command::ClearHistory => {
            let studio = open_studio(&settings_store, preferences).await;
            studio
                .history()
                .clear_history()
                .await
                .context(StorageSnafu {
                    stage: "clear-history",
                })?;
            println!("history cleared");
            Ok(())
        }
    }
}

async fn open_studio(settings_store: &SettingsStore, preferences: Option<PathBuf>) -> FeedStudio {
    let settings = settings_store.settings();
    let database_location = settings.database_location();
    tracing::debug!(path = %database_location.display(), "using history database");

    let repository = LazyHistoryStore::new(database_location.display().to_string());
    let history = Arc::new(HistoryController::new(Arc::new(repository)));
    history.load_history().await;

    let preferences = match preferences {
        Some(path) => PreferenceStore::new(path),
        None => PreferenceStore::load(),
    };
    FeedStudio::new(Arc::new(preferences), history)
}

async fn generate(
    settings_store: &SettingsStore,
    studio: &FeedStudio,
    size: Option<ImageSize>,
    style: Option<String>,
    out: Option<PathBuf>,
    mut paths: Vec<PathBuf>,
) -> CliResult<()> {
    if paths.len() > MAX_SOURCE_IMAGES {
        tracing::warn!(
            supplied = paths.len(),
            kept = MAX_SOURCE_IMAGES,
            "too many product images, extra files are ignored"
        );
        paths.truncate(MAX_SOURCE_IMAGES);
    }

    if let Some(size) = size {
        studio.select_size(size);
    }
    if let Some(style) = style {
        let selected = studio.select_style(&style);
        if selected != style.trim() {
            tracing::warn!(requested = %style, selected, "unknown style, using default");
        }
    }

    let config = settings_store
        .settings()
        .to_provider_config()
        .context(MissingApiKeySnafu {
            stage: "resolve-provider-config",
        })?;
    let generator = create_generator(config).context(GenerationSnafu {
        stage: "create-generator",
    })?;
    let images = read_source_images(&paths).await?;

    let outcome = studio
        .generate(generator.as_ref(), images)
        .await
        .context(GenerationSnafu {
            stage: "generate-feed",
        })?;

    let out = out.unwrap_or_else(|| PathBuf::from(studio.download_file_name()));
    write_image(&out, &outcome.image).await?;
    println!("{}", out.display());

    if !outcome.history.wait().await {
        eprintln!("warning: the image could not be saved to history");
    }
    Ok(())
}

async fn read_source_images(paths: &[PathBuf]) -> CliResult<Vec<SourceImage>> {
    let reads = paths.iter().map(|path| async move {
        let bytes = tokio::fs::read(path).await.context(ReadImageSnafu {
            stage: "read-source-image",
            path: path.clone(),
        })?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        SourceImage::from_bytes(name, bytes).context(GenerationSnafu {
            stage: "decode-source-image",
        })
    });

    try_join_all(reads).await
}

fn print_history(studio: &FeedStudio) {
    let items = studio.history().items();
    if items.is_empty() {
        println!("no generations yet");
        return;
    }

    for item in items.iter() {
        println!(
            "{}\t{}\t{}\t{}",
            item.id, item.timestamp, item.size, item.style_id
        );
    }
}

async fn restore(studio: &FeedStudio, raw_id: &str, out: Option<PathBuf>) -> CliResult<()> {
    let id = HistoryItemId::parse(raw_id).context(StorageSnafu {
        stage: "parse-restore-id",
    })?;
    let restored = studio
        .restore_by_id(&id)
        .context(UnknownHistoryItemSnafu {
            stage: "restore-lookup",
            id: raw_id.to_string(),
        })?;

    let image = GeneratedImage::from_data_url(&restored.image_url).context(GenerationSnafu {
        stage: "restore-decode",
    })?;
    let out = out.unwrap_or_else(|| PathBuf::from(studio.download_file_name()));
    write_image(&out, &image).await?;

    println!(
        "{} (size {}, style {})",
        out.display(),
        restored.size,
        restored.style_id
    );
    Ok(())
}

fn print_styles() {
    for preset in STYLE_PRESETS {
        println!("{:<10} {:<12} {}", preset.id, preset.label, preset.description);
    }
}

fn set_key(settings_store: &SettingsStore, key: String) -> CliResult<()> {
    let settings = StudioSettings {
        api_key: key,
        ..StudioSettings::clone(&settings_store.settings())
    };
    settings_store.update(settings).context(SettingsSnafu {
        stage: "store-api-key",
    })?;
    println!("API key saved to {}", settings_store.config_path().display());
    Ok(())
}

async fn write_image(path: &Path, image: &GeneratedImage) -> CliResult<()> {
    tokio::fs::write(path, &image.bytes)
        .await
        .context(WriteOutputSnafu {
            stage: "write-output-image",
            path: path.to_path_buf(),
        })
}

fn parse_image_size(raw: &str) -> Result<ImageSize, String> {
    raw.parse::<ImageSize>()
        .map_err(|_| format!("expected one of 1K, 2K, 4K, got '{raw}'"))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn generate_accepts_size_style_and_images() {
        let cli = Cli::try_parse_from([
            "lumier", "generate", "--size", "4k", "--style", "NOIR", "a.png", "b.jpg",
        ])
        .unwrap();

        match cli.command {
            Command::Generate {
                size, style, images, ..
            } => {
                assert_eq!(size, Some(ImageSize::FourK));
                assert_eq!(style.as_deref(), Some("NOIR"));
                assert_eq!(images.len(), 2);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn generate_rejects_unknown_size_and_missing_images() {
        assert!(Cli::try_parse_from(["lumier", "generate", "--size", "8K", "a.png"]).is_err());
        assert!(Cli::try_parse_from(["lumier", "generate"]).is_err());
    }

    #[test]
    fn credential_hint_covers_missing_and_rejected_keys() {
        assert!(
            CliError::MissingApiKey { stage: "test" }.requires_new_credentials()
        );
        assert!(
            CliError::Generation {
                stage: "test",
                source: GenerationError::EntitlementNotFound {
                    stage: "test",
                    body: "Requested entity was not found.".to_string(),
                },
            }
            .requires_new_credentials()
        );
        assert!(
            !CliError::UnknownHistoryItem {
                stage: "test",
                id: "x".to_string(),
            }
            .requires_new_credentials()
        );
    }

    #[tokio::test]
    async fn read_source_images_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.png");

        let error = read_source_images(&[missing.clone()]).await.unwrap_err();
        match error {
            CliError::ReadImage { path, .. } => assert_eq!(path, missing),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn read_source_images_sniffs_formats() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("shoe.png");
        std::fs::write(&png, [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n']).unwrap();

        let images = read_source_images(&[png]).await.unwrap();
        assert_eq!(images[0].name, "shoe.png");
        assert_eq!(images[0].mime_type, "image/png");
    }
}
