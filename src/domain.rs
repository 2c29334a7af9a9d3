use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IngestError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemKey(String);

impl ItemKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemKey {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        // Keys name a directory under the data root.
        let is_valid = !normalized.is_empty()
            && normalized != "."
            && !normalized.contains("..")
            && !normalized.contains(['/', '\\']);
        if !is_valid {
            return Err(IngestError::InvalidItemKey(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceUrl(String);

impl SourceUrl {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_name(&self) -> String {
        let without_fragment = self.0.split('#').next().unwrap_or_default();
        let without_query = without_fragment.split('?').next().unwrap_or_default();
        let after_scheme = without_query
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(without_query);
        match after_scheme.split_once('/') {
            Some((_, path)) => match path.rsplit('/').next() {
                Some(segment) if !segment.is_empty() => segment.to_string(),
                _ => "archive".to_string(),
            },
            None => "archive".to_string(),
        }
    }
}

impl fmt::Display for SourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SourceUrl {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let lower = trimmed.to_ascii_lowercase();
        let host = lower
            .strip_prefix("https://")
            .or_else(|| lower.strip_prefix("http://"));
        match host {
            Some(rest) if !rest.is_empty() && !rest.starts_with('/') => {
                Ok(Self(trimmed.to_string()))
            }
            _ => Err(IngestError::InvalidSourceUrl(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    Zip,
    Tar,
    Targz,
    Tgz,
    Unknown,
}

impl ArchiveKind {
    pub fn detect(file_name: &str) -> Self {
        let lower = file_name.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") {
            ArchiveKind::Targz
        } else if lower.ends_with(".tgz") {
            ArchiveKind::Tgz
        } else if lower.ends_with(".zip") {
            ArchiveKind::Zip
        } else if lower.ends_with(".tar") {
            ArchiveKind::Tar
        } else {
            ArchiveKind::Unknown
        }
    }

    pub fn is_tar_family(self) -> bool {
        matches!(self, ArchiveKind::Tar | ArchiveKind::Targz | ArchiveKind::Tgz)
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveKind::Zip => write!(f, "zip"),
            ArchiveKind::Tar => write!(f, "tar"),
            ArchiveKind::Targz => write!(f, "targz"),
            ArchiveKind::Tgz => write!(f, "tgz"),
            ArchiveKind::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveCapability {
    #[default]
    Generic,
    Batch,
}

impl ArchiveCapability {
    const BATCH_MARKER: &'static str = "cifar";

    pub fn infer(file_name: &str) -> Self {
        if file_name.to_ascii_lowercase().contains(Self::BATCH_MARKER) {
            ArchiveCapability::Batch
        } else {
            ArchiveCapability::Generic
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Failed,
    ExtractedZip,
    ExtractedTar,
    Processed,
}

impl StageStatus {
    pub fn is_failed(self) -> bool {
        self == StageStatus::Failed
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Success => write!(f, "success"),
            StageStatus::Failed => write!(f, "failed"),
            StageStatus::ExtractedZip => write!(f, "extracted_zip"),
            StageStatus::ExtractedTar => write!(f, "extracted_tar"),
            StageStatus::Processed => write!(f, "processed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: ItemKey,
    pub source: SourceUrl,
    pub category: String,
    pub capability: ArchiveCapability,
}

impl Item {
    pub fn archive_file_name(&self) -> String {
        self.source.file_name()
    }
}
