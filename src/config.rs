use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::{ArchiveCapability, Item, ItemKey, SourceUrl};
use crate::error::IngestError;
use crate::normalize::{DEFAULT_LIMIT, FitMode, Profile};

pub const DEFAULT_CONFIG: &str = "catalog.json";
pub const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub image_profile: Option<ProfileEntry>,
    #[serde(default, alias = "skus")]
    pub items: Vec<ItemEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ProfileEntry {
    #[serde(default)]
    pub mode: Option<String>,
    pub size: (u32, u32),
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub fit: Option<FitMode>,
    #[serde(default)]
    pub quality: Option<u8>,
    #[serde(default)]
    pub progressive: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ItemEntry {
    pub sku: String,
    pub source_url: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub capability: Option<ArchiveCapability>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub project_name: String,
    pub data_dir: String,
    pub limit: usize,
    pub profile: Profile,
    pub items: Vec<Item>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, IngestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG),
        };

        if path.is_none() && !config_path.exists() {
            return Err(IngestError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| IngestError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| IngestError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, IngestError> {
        let profile = match config.image_profile {
            Some(entry) => resolve_profile(entry)?,
            None => Profile::default(),
        };

        let mut seen = HashSet::new();
        let items = config
            .items
            .into_iter()
            .map(|entry| {
                let key: ItemKey = entry.sku.parse()?;
                if !seen.insert(key.clone()) {
                    return Err(IngestError::DuplicateItemKey(key.to_string()));
                }
                let source: SourceUrl = entry.source_url.parse()?;
                let capability = entry
                    .capability
                    .unwrap_or_else(|| ArchiveCapability::infer(&source.file_name()));
                Ok(Item {
                    key,
                    source,
                    category: entry.category.unwrap_or_default(),
                    capability,
                })
            })
            .collect::<Result<Vec<_>, IngestError>>()?;

        Ok(ResolvedConfig {
            project_name: config
                .project_name
                .unwrap_or_else(|| "archive-ingest".to_string()),
            data_dir: config
                .data_dir
                .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
            limit: config.limit.unwrap_or(DEFAULT_LIMIT),
            profile,
            items,
        })
    }
}

fn resolve_profile(entry: ProfileEntry) -> Result<Profile, IngestError> {
    let defaults = Profile::default();
    let (width, height) = entry.size;
    if width == 0 || height == 0 {
        return Err(IngestError::InvalidProfile(format!(
            "size must be positive, got {width}x{height}"
        )));
    }
    let quality = entry.quality.unwrap_or(defaults.quality);
    if !(1..=100).contains(&quality) {
        return Err(IngestError::InvalidProfile(format!(
            "quality must be within 1..=100, got {quality}"
        )));
    }
    let background = match entry.background {
        Some(value) => value.parse()?,
        None => defaults.background,
    };
    Ok(Profile {
        mode: entry.mode.unwrap_or(defaults.mode),
        width,
        height,
        background,
        fit: entry.fit.unwrap_or(FitMode::Contain),
        quality,
        progressive: entry.progressive.unwrap_or(defaults.progressive),
    })
}
