pub use lumier_storage::BoxFuture;
use lumier_storage::ImageSize;
use snafu::Snafu;

use super::payload::{GeneratedImage, SourceImage};

/// Upper bound on source images per request; extra uploads are dropped upstream.
pub const MAX_SOURCE_IMAGES: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
}

impl ProviderConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
            model: model.into().trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
    pub images: Vec<SourceImage>,
    pub size: ImageSize,
    pub style_id: String,
}

impl FeedRequest {
    pub fn new(images: Vec<SourceImage>, size: ImageSize, style_id: impl Into<String>) -> Self {
        Self {
            images,
            size,
            style_id: style_id.into(),
        }
    }
}

pub type GenerationResult<T> = Result<T, GenerationError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum GenerationError {
    #[snafu(display("missing API key for provider '{provider_id}'"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("at least one product image is required"))]
    EmptyImageSet { stage: &'static str },
    #[snafu(display("{count} product images supplied, at most {max} are allowed"))]
    TooManyImages {
        stage: &'static str,
        count: usize,
        max: usize,
    },
    #[snafu(display("unrecognized image format for '{name}'"))]
    UnsupportedImageFormat {
        stage: &'static str,
        name: String,
        source: image::ImageError,
    },
    #[snafu(display("image generation request failed on `{stage}`: {source}"))]
    HttpRequest {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("image provider returned status {status}: {body}"))]
    ResponseStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("requested entity was not found; the API key may lack access: {body}"))]
    EntitlementNotFound { stage: &'static str, body: String },
    #[snafu(display("failed to parse image provider response: {source}"))]
    ResponsePayload {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("no image generated"))]
    NoImageGenerated { stage: &'static str },
    #[snafu(display("generated image payload is not valid base64: {source}"))]
    DecodeImage {
        stage: &'static str,
        source: base64::DecodeError,
    },
    #[snafu(display("image payload is not a base64 data URL"))]
    MalformedDataUrl { stage: &'static str },
}

impl GenerationError {
    /// Whether the user should be asked for a different API key before retrying.
    pub fn requires_new_credentials(&self) -> bool {
        matches!(
            self,
            Self::MissingApiKey { .. } | Self::EntitlementNotFound { .. }
        )
    }
}

/// Turns product photos into a single composite feed image.
pub trait FeedGenerator: Send + Sync {
    fn id(&self) -> &str;
    fn model(&self) -> &str;
    fn generate<'a>(&'a self, request: FeedRequest) -> BoxFuture<'a, GenerationResult<GeneratedImage>>;
}
