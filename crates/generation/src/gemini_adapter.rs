use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, ensure};

use super::payload::{GENERATED_IMAGE_MIME_TYPE, GeneratedImage};
use super::provider::{
    BoxFuture, EmptyImageSetSnafu, EntitlementNotFoundSnafu, FeedGenerator, FeedRequest,
    GenerationResult, HttpRequestSnafu, MAX_SOURCE_IMAGES, MissingApiKeySnafu,
    NoImageGeneratedSnafu, ProviderConfig, ResponsePayloadSnafu, ResponseStatusSnafu,
    TooManyImagesSnafu,
};
use super::styles::{build_feed_prompt, resolve_style};

pub const GEMINI_PROVIDER_ID: &str = "gemini";
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_IMAGE_MODEL: &str = "gemini-3-pro-image-preview";
const FEED_ASPECT_RATIO: &str = "1:1";
const ENTITY_NOT_FOUND_MARKER: &str = "Requested entity was not found";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: GeminiContent<'a>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum RequestPart<'a> {
    Text(String),
    InlineData(RequestInlineData<'a>),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestInlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    image_config: ImageConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig<'a> {
    image_size: &'a str,
    aspect_ratio: &'a str,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    inline_data: Option<ResponseInlineData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseInlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

/// Gemini `generateContent` client producing one square grid image.
pub struct GeminiFeedGenerator {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl GeminiFeedGenerator {
    pub fn new(mut config: ProviderConfig) -> GenerationResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "gemini-adapter-new",
                provider_id: config.provider_id.clone(),
            }
        );

        if config.endpoint.is_empty() {
            config.endpoint = DEFAULT_GEMINI_ENDPOINT.to_string();
        }
        if config.model.is_empty() {
            config.model = DEFAULT_GEMINI_IMAGE_MODEL.to_string();
        }

        Ok(Self {
            config,
            http: reqwest::Client::new(),
        })
    }

    fn request_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }

    async fn generate_feed(&self, request: FeedRequest) -> GenerationResult<GeneratedImage> {
        validate_image_count(request.images.len())?;

        let style = resolve_style(&request.style_id);
        let prompt = build_feed_prompt(request.images.len(), style);

        // Prompt text leads, product images follow in upload order.
        let mut parts = Vec::with_capacity(request.images.len() + 1);
        parts.push(RequestPart::Text(prompt));
        parts.extend(request.images.iter().map(|image| {
            RequestPart::InlineData(RequestInlineData {
                mime_type: image.mime_type.as_str(),
                data: image.to_base64(),
            })
        }));

        let body = GenerateContentRequest {
            contents: GeminiContent { parts },
            generation_config: GenerationConfig {
                image_config: ImageConfig {
                    image_size: request.size.as_str(),
                    aspect_ratio: FEED_ASPECT_RATIO,
                },
            },
        };

        tracing::info!(
            model = %self.config.model,
            image_count = request.images.len(),
            size = %request.size,
            style_id = style.id,
            "requesting feed generation"
        );

        let response = self
            .http
            .post(self.request_url())
            .header("x-goog-api-key", self.config.api_key.as_str())
            .json(&body)
            .send()
            .await
            .context(HttpRequestSnafu {
                stage: "gemini-send-request",
            })?;
        let status = response.status().as_u16();
        let payload = response.text().await.context(HttpRequestSnafu {
            stage: "gemini-read-response",
        })?;

        check_response_status(status, payload.as_str())?;
        let image = extract_generated_image(&payload)?;

        tracing::info!(bytes = image.bytes.len(), mime_type = %image.mime_type, "feed generated");
        Ok(image)
    }
}

impl FeedGenerator for GeminiFeedGenerator {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn generate<'a>(&'a self, request: FeedRequest) -> BoxFuture<'a, GenerationResult<GeneratedImage>> {
        Box::pin(async move {
            let result = self.generate_feed(request).await;
            if let Err(error) = &result {
                tracing::error!(provider_id = %self.config.provider_id, %error, "feed generation failed");
            }
            result
        })
    }
}

pub(crate) fn validate_image_count(count: usize) -> GenerationResult<()> {
    ensure!(
        count > 0,
        EmptyImageSetSnafu {
            stage: "validate-image-count",
        }
    );
    ensure!(
        count <= MAX_SOURCE_IMAGES,
        TooManyImagesSnafu {
            stage: "validate-image-count",
            count,
            max: MAX_SOURCE_IMAGES,
        }
    );
    Ok(())
}

fn check_response_status(status: u16, body: &str) -> GenerationResult<()> {
    if status == 404 || body.contains(ENTITY_NOT_FOUND_MARKER) {
        return EntitlementNotFoundSnafu {
            stage: "gemini-response-status",
            body: body.to_string(),
        }
        .fail();
    }

    ensure!(
        (200..300).contains(&status),
        ResponseStatusSnafu {
            stage: "gemini-response-status",
            status,
            body: body.to_string(),
        }
    );
    Ok(())
}

fn extract_generated_image(payload: &str) -> GenerationResult<GeneratedImage> {
    let response: GenerateContentResponse =
        serde_json::from_str(payload).context(ResponsePayloadSnafu {
            stage: "gemini-parse-response",
        })?;

    // Only the first candidate counts; its first inline image is the feed.
    let inline_data = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .and_then(|content| {
            content
                .parts
                .into_iter()
                .find_map(|part| part.inline_data)
        })
        .context(NoImageGeneratedSnafu {
            stage: "gemini-extract-image",
        })?;

    let mime_type = inline_data
        .mime_type
        .filter(|mime_type| !mime_type.trim().is_empty())
        .unwrap_or_else(|| GENERATED_IMAGE_MIME_TYPE.to_string());
    GeneratedImage::from_base64(mime_type, &inline_data.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GenerationError;

    #[test]
    fn first_inline_image_is_extracted() {
        let payload = r#"{
            "candidates": [{
                "content": {"parts": [
                    {"text": "Here is your feed"},
                    {"inlineData": {"mimeType": "image/png", "data": "AQID"}},
                    {"inlineData": {"mimeType": "image/png", "data": "BAUG"}}
                ]}
            }]
        }"#;

        let image = extract_generated_image(payload).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.bytes, vec![1, 2, 3]);
    }

    #[test]
    fn text_only_response_yields_no_image() {
        let payload = r#"{"candidates": [{"content": {"parts": [{"text": "sorry"}]}}]}"#;
        assert!(matches!(
            extract_generated_image(payload),
            Err(GenerationError::NoImageGenerated { .. })
        ));
        assert!(matches!(
            extract_generated_image(r#"{"candidates": []}"#),
            Err(GenerationError::NoImageGenerated { .. })
        ));
    }

    #[test]
    fn missing_entity_maps_to_credential_error() {
        let error = check_response_status(404, "{}").unwrap_err();
        assert!(error.requires_new_credentials());

        let error = check_response_status(
            400,
            r#"{"error": {"message": "Requested entity was not found."}}"#,
        )
        .unwrap_err();
        assert!(matches!(error, GenerationError::EntitlementNotFound { .. }));

        let error = check_response_status(500, "boom").unwrap_err();
        assert!(matches!(error, GenerationError::ResponseStatus { status: 500, .. }));
        assert!(!error.requires_new_credentials());
        assert!(check_response_status(200, "{}").is_ok());
    }

    #[test]
    fn image_count_is_bounded() {
        assert!(matches!(
            validate_image_count(0),
            Err(GenerationError::EmptyImageSet { .. })
        ));
        assert!(validate_image_count(MAX_SOURCE_IMAGES).is_ok());
        assert!(matches!(
            validate_image_count(MAX_SOURCE_IMAGES + 1),
            Err(GenerationError::TooManyImages { count: 7, .. })
        ));
    }

    #[test]
    fn adapter_requires_api_key_and_fills_defaults() {
        let missing = GeminiFeedGenerator::new(ProviderConfig::new("gemini", " ", "", ""));
        assert!(matches!(missing, Err(GenerationError::MissingApiKey { .. })));

        let generator = GeminiFeedGenerator::new(ProviderConfig::new("gemini", "key", "", "")).unwrap();
        assert_eq!(generator.model(), DEFAULT_GEMINI_IMAGE_MODEL);
        assert_eq!(
            generator.request_url(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-3-pro-image-preview:generateContent"
        );
    }

    #[test]
    fn request_body_uses_gemini_field_names() {
        let body = GenerateContentRequest {
            contents: GeminiContent {
                parts: vec![
                    RequestPart::Text("prompt".to_string()),
                    RequestPart::InlineData(RequestInlineData {
                        mime_type: "image/jpeg",
                        data: "AAAA".to_string(),
                    }),
                ],
            },
            generation_config: GenerationConfig {
                image_config: ImageConfig {
                    image_size: "2K",
                    aspect_ratio: FEED_ASPECT_RATIO,
                },
            },
        };

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["contents"]["parts"][0]["text"], "prompt");
        assert_eq!(value["contents"]["parts"][1]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(value["generationConfig"]["imageConfig"]["imageSize"], "2K");
        assert_eq!(value["generationConfig"]["imageConfig"]["aspectRatio"], "1:1");
    }
}
