use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::NamedTempFile;

use crate::domain::ItemKey;
use crate::error::IngestError;

#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn report_path(&self) -> Utf8PathBuf {
        self.root.join("report.json")
    }

    pub fn item_dir(&self, key: &ItemKey) -> Utf8PathBuf {
        self.root.join(key.as_str())
    }

    pub fn download_dir(&self, key: &ItemKey) -> Utf8PathBuf {
        self.item_dir(key).join("download")
    }

    pub fn download_path(&self, key: &ItemKey, file_name: &str) -> Utf8PathBuf {
        self.download_dir(key).join(file_name)
    }

    pub fn raw_dir(&self, key: &ItemKey) -> Utf8PathBuf {
        self.item_dir(key).join("raw")
    }

    pub fn processed_dir(&self, key: &ItemKey) -> Utf8PathBuf {
        self.item_dir(key).join("processed")
    }

    pub fn ensure_dir(path: &Utf8Path) -> Result<(), IngestError> {
        fs::create_dir_all(path.as_std_path())
            .map_err(|err| IngestError::Filesystem(format!("create {path}: {err}")))
    }

    pub fn remove_dir(path: &Utf8Path) -> Result<(), IngestError> {
        if path.as_std_path().exists() {
            fs::remove_dir_all(path.as_std_path())
                .map_err(|err| IngestError::Filesystem(format!("remove {path}: {err}")))?;
        }
        Ok(())
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), IngestError> {
        let parent = path
            .parent()
            .ok_or_else(|| IngestError::Filesystem("invalid destination path".to_string()))?;
        let parent = if parent.as_str().is_empty() {
            Utf8Path::new(".")
        } else {
            parent
        };
        Self::ensure_dir(parent)?;
        let mut temp = NamedTempFile::new_in(parent.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = Store::new("data");
        let key: ItemKey = "AAA-0001".parse().unwrap();

        assert_eq!(store.report_path(), Utf8PathBuf::from("data/report.json"));
        assert!(store.download_path(&key, "x.zip").ends_with("AAA-0001/download/x.zip"));
        assert!(store.raw_dir(&key).ends_with("AAA-0001/raw"));
        assert!(store.processed_dir(&key).ends_with("AAA-0001/processed"));
    }

    #[test]
    fn atomic_write_replaces_content() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let path = root.join("nested").join("file.json");

        Store::write_bytes_atomic(&path, b"first").unwrap();
        Store::write_bytes_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read(path.as_std_path()).unwrap(), b"second");
    }

    #[test]
    fn remove_missing_dir_is_ok() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("absent")).unwrap();
        Store::remove_dir(&root).unwrap();
    }
}
