use std::sync::Arc;

mod gemini_adapter;
mod payload;
mod provider;
pub mod styles;

pub use gemini_adapter::{
    DEFAULT_GEMINI_ENDPOINT, DEFAULT_GEMINI_IMAGE_MODEL, GEMINI_PROVIDER_ID, GeminiFeedGenerator,
};
pub use payload::{GENERATED_IMAGE_MIME_TYPE, GeneratedImage, SourceImage};
pub use provider::{
    BoxFuture, FeedGenerator, FeedRequest, GenerationError, GenerationResult, MAX_SOURCE_IMAGES,
    ProviderConfig,
};
pub use styles::{DEFAULT_STYLE_ID, STYLE_PRESETS, StylePreset, find_style, resolve_style};

pub fn create_generator(mut config: ProviderConfig) -> GenerationResult<Arc<dyn FeedGenerator>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = GEMINI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "gemini" | "google" | "google-gemini" => {
            config.provider_id = GEMINI_PROVIDER_ID.to_string();
            Ok(Arc::new(GeminiFeedGenerator::new(config)?))
        }
        _ => Err(GenerationError::UnsupportedProvider {
            stage: "create-generator",
            provider_id: config.provider_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_provider_defaults_to_gemini() {
        let generator = create_generator(ProviderConfig::new("", "key", "", "")).unwrap();
        assert_eq!(generator.id(), GEMINI_PROVIDER_ID);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        assert!(matches!(
            create_generator(ProviderConfig::new("dall-e", "key", "", "")),
            Err(GenerationError::UnsupportedProvider { .. })
        ));
    }
}
