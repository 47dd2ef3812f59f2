use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::ensure;

use super::error::{InvalidHistoryItemSnafu, StorageError, StorageResult, UnknownImageSizeSnafu};
use super::ids::HistoryItemId;

/// Prefix every stored image payload must carry; history keeps the encoded
/// image itself, never a remote reference.
pub const DATA_URL_PREFIX: &str = "data:";

/// Output resolution of a generated feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ImageSize {
    #[default]
    #[serde(rename = "1K")]
    OneK,
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "4K")]
    FourK,
}

impl ImageSize {
    pub const ALL: [ImageSize; 3] = [ImageSize::OneK, ImageSize::TwoK, ImageSize::FourK];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneK => "1K",
            Self::TwoK => "2K",
            Self::FourK => "4K",
        }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for ImageSize {
    type Err = StorageError;

    fn from_str(raw: &str) -> StorageResult<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "1K" => Ok(Self::OneK),
            "2K" => Ok(Self::TwoK),
            "4K" => Ok(Self::FourK),
            _ => UnknownImageSizeSnafu {
                stage: "parse-image-size",
                raw: raw.to_string(),
            }
            .fail(),
        }
    }
}

/// One past generation result plus the settings that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: HistoryItemId,
    pub image_url: String,
    /// Creation instant in milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub size: ImageSize,
    pub style_id: String,
}

impl HistoryItem {
    pub fn new(
        id: HistoryItemId,
        image_url: impl Into<String>,
        timestamp: u64,
        size: ImageSize,
        style_id: impl Into<String>,
    ) -> Self {
        Self {
            id,
            image_url: image_url.into(),
            timestamp,
            size,
            style_id: style_id.into(),
        }
    }

    pub(crate) fn validate(&self, stage: &'static str) -> StorageResult<()> {
        ensure!(
            self.image_url
                .get(..DATA_URL_PREFIX.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(DATA_URL_PREFIX)),
            InvalidHistoryItemSnafu {
                stage,
                id: self.id.to_string(),
                details: "image payload must be an inline data URL".to_string(),
            }
        );
        ensure!(
            !self.style_id.trim().is_empty(),
            InvalidHistoryItemSnafu {
                stage,
                id: self.id.to_string(),
                details: "style id is empty".to_string(),
            }
        );

        Ok(())
    }
}

/// Newest first; ties fall back to the id so the order is total.
pub fn compare_recency(left: &HistoryItem, right: &HistoryItem) -> std::cmp::Ordering {
    right
        .timestamp
        .cmp(&left.timestamp)
        .then_with(|| right.id.cmp(&left.id))
}
