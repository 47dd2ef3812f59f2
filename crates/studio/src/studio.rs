use std::sync::Arc;

use arc_swap::ArcSwap;
use lumier_generation::{
    DEFAULT_STYLE_ID, FeedGenerator, FeedRequest, GeneratedImage, GenerationResult, SourceImage,
    resolve_style,
};
use lumier_storage::{HistoryItem, HistoryItemId, ImageSize};

use crate::history::{HistoryController, HistoryWrite, RestoredGeneration};
use crate::settings::preferences::PreferenceStore;

pub const SIZE_PREFERENCE_KEY: &str = "size";
pub const STYLE_PREFERENCE_KEY: &str = "styleId";

/// The output size and style the next generation will use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub size: ImageSize,
    pub style_id: String,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            size: ImageSize::default(),
            style_id: DEFAULT_STYLE_ID.to_string(),
        }
    }
}

pub struct FeedOutcome {
    pub image: GeneratedImage,
    pub history: HistoryWrite,
}

/// One editing session: the current selection, the remembered preferences
/// and the generation history.
pub struct FeedStudio {
    preferences: Arc<PreferenceStore>,
    history: Arc<HistoryController>,
    selection: ArcSwap<Selection>,
}

impl FeedStudio {
    pub fn new(preferences: Arc<PreferenceStore>, history: Arc<HistoryController>) -> Self {
        let size = preferences.get(SIZE_PREFERENCE_KEY, ImageSize::default());
        let stored_style: String =
            preferences.get(STYLE_PREFERENCE_KEY, DEFAULT_STYLE_ID.to_string());
        let style_id = resolve_style(&stored_style).id.to_string();

        Self {
            preferences,
            history,
            selection: ArcSwap::from_pointee(Selection { size, style_id }),
        }
    }

    pub fn history(&self) -> &HistoryController {
        &self.history
    }

    pub fn selection(&self) -> Arc<Selection> {
        self.selection.load_full()
    }

    pub fn select_size(&self, size: ImageSize) {
        self.selection.rcu(|current| Selection {
            size,
            style_id: current.style_id.clone(),
        });
        self.preferences.save(SIZE_PREFERENCE_KEY, size);
    }

    /// Returns the style id actually selected; unknown ids select the default.
    pub fn select_style(&self, style_id: &str) -> &'static str {
        let resolved = resolve_style(style_id).id;
        self.selection.rcu(|current| Selection {
            size: current.size,
            style_id: resolved.to_string(),
        });
        self.preferences.save(STYLE_PREFERENCE_KEY, resolved);
        resolved
    }

    /// Runs one generation with the current selection. History is only
    /// touched when the generator succeeds.
    pub async fn generate(
        &self,
        generator: &dyn FeedGenerator,
        images: Vec<SourceImage>,
    ) -> GenerationResult<FeedOutcome> {
        let selection = self.selection();
        tracing::info!(
            provider = generator.id(),
            model = generator.model(),
            images = images.len(),
            size = %selection.size,
            style_id = %selection.style_id,
            "generating feed image"
        );

        let request = FeedRequest::new(images, selection.size, selection.style_id.clone());
        let image = generator.generate(request).await?;
        let history = self.history.record_generation(
            image.to_data_url(),
            selection.size,
            selection.style_id.clone(),
        );

        Ok(FeedOutcome { image, history })
    }

    /// Puts a past generation back: its size and style become the selection.
    pub fn restore(&self, item: &HistoryItem) -> RestoredGeneration {
        let restored = HistoryController::restore(item);
        self.apply(&restored);
        restored
    }

    pub fn restore_by_id(&self, id: &HistoryItemId) -> Option<RestoredGeneration> {
        let restored = self.history.restore_by_id(id)?;
        self.apply(&restored);
        Some(restored)
    }

    pub fn download_file_name(&self) -> String {
        format!(
            "lumier-feed-{}.png",
            self.selection.load().style_id.to_lowercase()
        )
    }

    fn apply(&self, restored: &RestoredGeneration) {
        self.selection.store(Arc::new(Selection {
            size: restored.size,
            style_id: restored.style_id.clone(),
        }));
        self.preferences.save(SIZE_PREFERENCE_KEY, restored.size);
        self.preferences
            .save(STYLE_PREFERENCE_KEY, restored.style_id.as_str());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use lumier_generation::{BoxFuture, GenerationError};
    use lumier_storage::LazyHistoryStore;

    use super::*;
    use crate::settings::preferences::PREFERENCES_FILE_NAME;

    const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

    struct FakeGenerator {
        fail: bool,
        requests: Mutex<Vec<FeedRequest>>,
    }

    impl FakeGenerator {
        fn succeeding() -> Self {
            Self {
                fail: false,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl FeedGenerator for FakeGenerator {
        fn id(&self) -> &str {
            "fake"
        }

        fn model(&self) -> &str {
            "fake-model"
        }

        fn generate<'a>(
            &'a self,
            request: FeedRequest,
        ) -> BoxFuture<'a, GenerationResult<GeneratedImage>> {
            Box::pin(async move {
                self.requests.lock().unwrap().push(request);
                if self.fail {
                    return Err(GenerationError::NoImageGenerated {
                        stage: "fake-generate",
                    });
                }
                Ok(GeneratedImage::new("image/png", vec![1, 2, 3]))
            })
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        preferences_path: std::path::PathBuf,
        database_location: String,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self {
                preferences_path: dir.path().join(PREFERENCES_FILE_NAME),
                database_location: dir.path().join("history.db").display().to_string(),
                _dir: dir,
            }
        }

        async fn studio(&self) -> FeedStudio {
            let preferences = Arc::new(PreferenceStore::new(self.preferences_path.clone()));
            let repository = LazyHistoryStore::new(self.database_location.clone());
            let history = Arc::new(HistoryController::new(Arc::new(repository)));
            history.load_history().await;
            FeedStudio::new(preferences, history)
        }
    }

    fn source_image() -> SourceImage {
        SourceImage::from_bytes("product.png", PNG_SIGNATURE.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn fresh_session_uses_defaults() {
        let fixture = Fixture::new();
        let studio = fixture.studio().await;

        assert_eq!(*studio.selection(), Selection::default());
        assert_eq!(studio.download_file_name(), "lumier-feed-natural.png");
    }

    #[tokio::test]
    async fn selection_survives_restart() {
        let fixture = Fixture::new();
        let studio = fixture.studio().await;
        studio.select_size(ImageSize::FourK);
        assert_eq!(studio.select_style("NOIR"), "NOIR");

        let restarted = fixture.studio().await;
        let selection = restarted.selection();
        assert_eq!(selection.size, ImageSize::FourK);
        assert_eq!(selection.style_id, "NOIR");
        assert_eq!(restarted.download_file_name(), "lumier-feed-noir.png");
    }

    #[tokio::test]
    async fn unknown_style_selects_default() {
        let fixture = Fixture::new();
        let studio = fixture.studio().await;

        assert_eq!(studio.select_style("NEON"), DEFAULT_STYLE_ID);
        assert_eq!(studio.selection().style_id, DEFAULT_STYLE_ID);
    }

    #[tokio::test]
    async fn successful_generation_is_recorded_with_selection() {
        let fixture = Fixture::new();
        let studio = fixture.studio().await;
        studio.select_size(ImageSize::TwoK);
        studio.select_style("METRO");
        let generator = FakeGenerator::succeeding();

        let outcome = studio
            .generate(&generator, vec![source_image()])
            .await
            .unwrap();
        let item = outcome.history.item.clone();
        assert!(outcome.history.wait().await);

        assert_eq!(item.image_url, outcome.image.to_data_url());
        assert_eq!(item.size, ImageSize::TwoK);
        assert_eq!(item.style_id, "METRO");

        let request = &generator.requests.lock().unwrap()[0];
        assert_eq!(request.size, ImageSize::TwoK);
        assert_eq!(request.style_id, "METRO");
        assert_eq!(request.images.len(), 1);

        let restarted = fixture.studio().await;
        assert_eq!(restarted.history().items()[0].id, item.id);
    }

    #[tokio::test]
    async fn failed_generation_leaves_history_untouched() {
        let fixture = Fixture::new();
        let studio = fixture.studio().await;

        let result = studio
            .generate(&FakeGenerator::failing(), vec![source_image()])
            .await;

        assert!(matches!(
            result,
            Err(GenerationError::NoImageGenerated { .. })
        ));
        assert!(studio.history().items().is_empty());
    }

    #[tokio::test]
    async fn restore_applies_size_and_style() {
        let fixture = Fixture::new();
        let studio = fixture.studio().await;
        studio.select_size(ImageSize::FourK);
        studio.select_style("HERITAGE");
        let outcome = studio
            .generate(&FakeGenerator::succeeding(), vec![source_image()])
            .await
            .unwrap();
        let item_id = outcome.history.item.id.clone();
        assert!(outcome.history.wait().await);

        studio.select_size(ImageSize::OneK);
        studio.select_style("NOIR");
        let restored = studio.restore_by_id(&item_id).unwrap();

        assert_eq!(restored.size, ImageSize::FourK);
        assert_eq!(restored.style_id, "HERITAGE");
        let selection = studio.selection();
        assert_eq!(selection.size, ImageSize::FourK);
        assert_eq!(selection.style_id, "HERITAGE");
        assert!(studio.restore_by_id(&HistoryItemId::new_v7()).is_none());
    }
}
