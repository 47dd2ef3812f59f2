use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use snafu::{OptionExt, ResultExt};

use super::provider::{
    DecodeImageSnafu, GenerationResult, MalformedDataUrlSnafu, UnsupportedImageFormatSnafu,
};

pub const GENERATED_IMAGE_MIME_TYPE: &str = "image/png";

/// A product photo supplied by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl SourceImage {
    /// Builds a source image, sniffing the MIME type from the leading bytes.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> GenerationResult<Self> {
        let name = name.into();
        let format = image::guess_format(&bytes).context(UnsupportedImageFormatSnafu {
            stage: "source-image-guess-format",
            name: name.clone(),
        })?;

        Ok(Self {
            name,
            mime_type: format.to_mime_type().to_string(),
            bytes,
        })
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

/// The composite image returned by a generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl GeneratedImage {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn from_base64(mime_type: impl Into<String>, encoded: &str) -> GenerationResult<Self> {
        let bytes = STANDARD.decode(encoded.trim()).context(DecodeImageSnafu {
            stage: "generated-image-decode",
        })?;
        Ok(Self::new(mime_type, bytes))
    }

    /// Self-contained `data:` URL, the form kept in history.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.bytes))
    }

    pub fn from_data_url(data_url: &str) -> GenerationResult<Self> {
        let (header, encoded) = data_url
            .strip_prefix("data:")
            .and_then(|rest| rest.split_once(','))
            .context(MalformedDataUrlSnafu {
                stage: "data-url-split",
            })?;
        let mime_type = header
            .strip_suffix(";base64")
            .context(MalformedDataUrlSnafu {
                stage: "data-url-encoding",
            })?;

        let mime_type = if mime_type.is_empty() {
            GENERATED_IMAGE_MIME_TYPE
        } else {
            mime_type
        };
        Self::from_base64(mime_type, encoded)
    }
}
