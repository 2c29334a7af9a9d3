use std::fs;
use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::batch::BatchDecoder;
use crate::domain::{ArchiveCapability, ArchiveKind, StageStatus};
use crate::error::IngestError;
use crate::fs_util;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOutcome {
    pub status: StageStatus,
    pub file_count: usize,
    pub decoded_count: usize,
}

impl ExtractOutcome {
    fn failed() -> Self {
        Self {
            status: StageStatus::Failed,
            file_count: 0,
            decoded_count: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveExtractor {
    decoder: BatchDecoder,
}

impl ArchiveExtractor {
    pub fn extract(
        &self,
        archive: &Path,
        kind: ArchiveKind,
        capability: ArchiveCapability,
        raw_dir: &Path,
    ) -> ExtractOutcome {
        let status = match kind {
            ArchiveKind::Zip => StageStatus::ExtractedZip,
            kind if kind.is_tar_family() => StageStatus::ExtractedTar,
            kind => {
                error!(archive = %archive.display(), %kind, "unsupported archive type");
                return ExtractOutcome::failed();
            }
        };

        if let Err(err) = self.unpack(archive, kind, raw_dir) {
            error!(archive = %archive.display(), error = %err, "extraction failed");
            return ExtractOutcome::failed();
        }

        let file_count = fs_util::count_files(raw_dir);
        info!(archive = %archive.display(), files = file_count, "archive extracted");

        let decoded_count = match capability {
            ArchiveCapability::Batch => {
                let count = self.decoder.decode(raw_dir);
                info!(images = count, "batch images decoded");
                count
            }
            ArchiveCapability::Generic => 0,
        };

        ExtractOutcome {
            status,
            file_count,
            decoded_count,
        }
    }

    fn unpack(&self, archive: &Path, kind: ArchiveKind, raw_dir: &Path) -> Result<(), IngestError> {
        let size = fs::metadata(archive)
            .map_err(|err| IngestError::Archive(format!("{}: {err}", archive.display())))?
            .len();
        if size == 0 {
            return Err(IngestError::Archive(format!(
                "{} is empty",
                archive.display()
            )));
        }

        // Leftovers from an interrupted run would skew the file count.
        if raw_dir.exists() {
            warn!(dir = %raw_dir.display(), "removing stale raw directory");
            fs::remove_dir_all(raw_dir).map_err(|err| IngestError::Filesystem(err.to_string()))?;
        }
        fs::create_dir_all(raw_dir).map_err(|err| IngestError::Filesystem(err.to_string()))?;

        match kind {
            ArchiveKind::Zip => {
                let written = fs_util::extract_zip(archive, raw_dir)?;
                debug!(files = written, "zip members written");
                Ok(())
            }
            _ => fs_util::extract_tar(archive, raw_dir),
        }
    }
}
