use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("invalid item key: {0}")]
    InvalidItemKey(String),

    #[error("invalid source url: {0}")]
    InvalidSourceUrl(String),

    #[error("duplicate item key in catalog: {0}")]
    DuplicateItemKey(String),

    #[error("invalid background color: {0}")]
    InvalidColor(String),

    #[error("invalid image profile: {0}")]
    InvalidProfile(String),

    #[error("missing config file catalog.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("source returned status {status}")]
    HttpStatus { status: u16 },

    #[error("downloaded file is empty: {0}")]
    EmptyDownload(String),

    #[error("unsupported archive type: {0}")]
    UnsupportedArchive(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("pickle stream error: {0}")]
    Pickle(String),

    #[error("batch error: {0}")]
    Batch(String),

    #[error("image error: {0}")]
    Image(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
