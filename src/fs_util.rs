use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use zip::ZipArchive;

use crate::error::IngestError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

// Returns the number of regular files written.
pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<usize, IngestError> {
    let file = File::open(zip_path)
        .map_err(|err| IngestError::Archive(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .map_err(|err| IngestError::Archive(format!("read zip {}: {err}", zip_path.display())))?;
    fs::create_dir_all(target_dir).map_err(|err| IngestError::Filesystem(err.to_string()))?;

    let mut written = 0;
    for index in 0..archive.len() {
        let mut member = archive
            .by_index(index)
            .map_err(|err| IngestError::Archive(format!("zip member {index}: {err}")))?;
        let Some(relative) = member.enclosed_name() else {
            return Err(IngestError::Archive(format!(
                "zip member {} escapes the target directory",
                member.name()
            )));
        };
        if member.is_symlink() {
            return Err(IngestError::Archive(format!(
                "zip member {} is a symlink",
                member.name()
            )));
        }
        let destination = target_dir.join(relative);
        if member.is_dir() {
            fs::create_dir_all(&destination)
                .map_err(|err| IngestError::Filesystem(err.to_string()))?;
            continue;
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|err| IngestError::Filesystem(err.to_string()))?;
        }
        let mut out = File::create(&destination).map_err(|err| {
            IngestError::Filesystem(format!("create {}: {err}", destination.display()))
        })?;
        io::copy(&mut member, &mut out)
            .map_err(|err| IngestError::Archive(format!("inflate {}: {err}", member.name())))?;
        written += 1;
    }
    Ok(written)
}

pub fn extract_tar(tar_path: &Path, target_dir: &Path) -> Result<(), IngestError> {
    let mut magic = [0u8; 2];
    let compressed = {
        let mut probe = File::open(tar_path).map_err(|err| {
            IngestError::Archive(format!("open tar {}: {err}", tar_path.display()))
        })?;
        probe.read_exact(&mut magic).is_ok() && magic == GZIP_MAGIC
    };

    let file = File::open(tar_path)
        .map_err(|err| IngestError::Archive(format!("open tar {}: {err}", tar_path.display())))?;
    let reader: Box<dyn Read> = if compressed {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    fs::create_dir_all(target_dir).map_err(|err| IngestError::Filesystem(err.to_string()))?;
    let mut archive = tar::Archive::new(reader);
    archive
        .unpack(target_dir)
        .map_err(|err| IngestError::Archive(format!("unpack {}: {err}", tar_path.display())))
}

pub fn count_files(root: &Path) -> usize {
    walk_files(root).len()
}

pub fn find_exts(root: &Path, exts: &[&str]) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = walk_files(root)
        .into_iter()
        .filter(|path| {
            path.extension()
                .and_then(|value| value.to_str())
                .map(|value| exts.iter().any(|ext| value.eq_ignore_ascii_case(ext)))
                .unwrap_or(false)
        })
        .collect();
    out.sort();
    out
}

fn walk_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        if let Ok(entries) = fs::read_dir(&path) {
            for entry in entries.flatten() {
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };
                if file_type.is_dir() {
                    stack.push(entry.path());
                } else if file_type.is_file() {
                    out.push(entry.path());
                }
            }
        }
    }
    out
}
