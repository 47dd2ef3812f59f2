use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::ensure;
use uuid::Uuid;

use super::error::{InvalidIdSnafu, StorageError, StorageResult};

/// Primary key of a history record.
///
/// Ids minted here are UUIDv7 strings, which sort by creation time. Ids read
/// back from storage are accepted as-is as long as they are not blank.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HistoryItemId(String);

impl HistoryItemId {
    pub fn new_v7() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn parse(raw: &str) -> StorageResult<Self> {
        let trimmed = raw.trim();
        ensure!(
            !trimmed.is_empty(),
            InvalidIdSnafu {
                stage: "parse-history-item-id",
                id_type: "history-item-id",
                raw: raw.to_string(),
            }
        );
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HistoryItemId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<Uuid> for HistoryItemId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

impl From<HistoryItemId> for String {
    fn from(value: HistoryItemId) -> Self {
        value.0
    }
}

impl TryFrom<String> for HistoryItemId {
    type Error = StorageError;

    fn try_from(raw: String) -> StorageResult<Self> {
        Self::parse(&raw)
    }
}

impl FromStr for HistoryItemId {
    type Err = StorageError;

    fn from_str(raw: &str) -> StorageResult<Self> {
        Self::parse(raw)
    }
}
