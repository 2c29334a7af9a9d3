use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{ArchiveKind, ItemKey, StageStatus};
use crate::error::IngestError;
use crate::store::Store;

const TIME_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub time: String,
    pub sku: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(rename = "archive type", default)]
    pub archive_type: Option<ArchiveKind>,
    #[serde(default)]
    pub download_status: Option<StageStatus>,
    #[serde(default)]
    pub extract_status: Option<StageStatus>,
    #[serde(default)]
    pub process_status: Option<StageStatus>,
    #[serde(default)]
    pub processed_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_files: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded_images: Option<usize>,
}

impl StatusRecord {
    fn new(key: &ItemKey) -> Self {
        Self {
            time: now(),
            sku: key.as_str().to_string(),
            filename: None,
            size: None,
            archive_type: None,
            download_status: None,
            extract_status: None,
            process_status: None,
            processed_count: None,
            extracted_files: None,
            decoded_images: None,
        }
    }

    fn merge(&mut self, update: StatusUpdate) {
        self.time = now();
        if let Some(filename) = update.filename {
            self.filename = Some(filename);
        }
        if let Some(size) = update.size {
            self.size = Some(size);
        }
        if let Some(kind) = update.archive_type {
            self.archive_type = Some(kind);
        }
        if let Some(status) = update.download_status {
            self.download_status = Some(status);
        }
        if let Some(status) = update.extract_status {
            self.extract_status = Some(status);
        }
        if let Some(status) = update.process_status {
            self.process_status = Some(status);
        }
        if let Some(count) = update.processed_count {
            self.processed_count = Some(count);
        }
        if let Some(count) = update.extracted_files {
            self.extracted_files = Some(count);
        }
        if let Some(count) = update.decoded_images {
            self.decoded_images = Some(count);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub filename: Option<String>,
    pub size: Option<u64>,
    pub archive_type: Option<ArchiveKind>,
    pub download_status: Option<StageStatus>,
    pub extract_status: Option<StageStatus>,
    pub process_status: Option<StageStatus>,
    pub processed_count: Option<usize>,
    pub extracted_files: Option<usize>,
    pub decoded_images: Option<usize>,
}

// Updates load, merge and rewrite the whole file: one writer per file.
#[derive(Debug, Clone)]
pub struct StatusStore {
    path: Utf8PathBuf,
}

impl StatusStore {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn reset(&self) -> Result<(), IngestError> {
        self.write(&[])
    }

    pub fn load(&self) -> Vec<StatusRecord> {
        let content = match fs::read_to_string(self.path.as_std_path()) {
            Ok(content) => content,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str(&content) {
            Ok(records) => records,
            Err(err) => {
                warn!(path = %self.path, error = %err, "status file unreadable, starting empty");
                Vec::new()
            }
        }
    }

    pub fn get(&self, key: &ItemKey) -> Option<StatusRecord> {
        self.load()
            .into_iter()
            .find(|record| record.sku == key.as_str())
    }

    pub fn update(&self, key: &ItemKey, update: StatusUpdate) -> Result<(), IngestError> {
        let mut records = self.load();
        match records.iter_mut().find(|record| record.sku == key.as_str()) {
            Some(record) => record.merge(update),
            None => {
                let mut record = StatusRecord::new(key);
                record.merge(update);
                records.push(record);
            }
        }
        self.write(&records)
    }

    fn write(&self, records: &[StatusRecord]) -> Result<(), IngestError> {
        let content = serde_json::to_vec_pretty(records)
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        Store::write_bytes_atomic(&self.path, &content)
    }
}

fn now() -> String {
    chrono::Local::now().format(TIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, StatusStore) {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("report.json")).unwrap();
        (temp, StatusStore::new(path))
    }

    #[test]
    fn update_merges_into_single_record() {
        let (_temp, store) = temp_store();
        let key: ItemKey = "AAA-0001".parse().unwrap();

        store
            .update(
                &key,
                StatusUpdate {
                    filename: Some("a.zip".to_string()),
                    size: Some(10),
                    download_status: Some(StageStatus::Failed),
                    ..StatusUpdate::default()
                },
            )
            .unwrap();
        store
            .update(
                &key,
                StatusUpdate {
                    size: Some(42),
                    download_status: Some(StageStatus::Success),
                    ..StatusUpdate::default()
                },
            )
            .unwrap();
        store
            .update(
                &key,
                StatusUpdate {
                    extract_status: Some(StageStatus::ExtractedZip),
                    ..StatusUpdate::default()
                },
            )
            .unwrap();

        let records = store.load();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.filename.as_deref(), Some("a.zip"));
        assert_eq!(record.size, Some(42));
        assert_eq!(record.download_status, Some(StageStatus::Success));
        assert_eq!(record.extract_status, Some(StageStatus::ExtractedZip));
        assert_eq!(record.process_status, None);
    }

    #[test]
    fn records_are_kept_per_key() {
        let (_temp, store) = temp_store();
        let first: ItemKey = "A".parse().unwrap();
        let second: ItemKey = "B".parse().unwrap();

        store.update(&first, StatusUpdate::default()).unwrap();
        store.update(&second, StatusUpdate::default()).unwrap();
        store.update(&first, StatusUpdate::default()).unwrap();

        let keys: Vec<_> = store.load().into_iter().map(|record| record.sku).collect();
        assert_eq!(keys, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn reset_empties_store() {
        let (_temp, store) = temp_store();
        let key: ItemKey = "A".parse().unwrap();
        store.update(&key, StatusUpdate::default()).unwrap();

        store.reset().unwrap();

        assert!(store.load().is_empty());
        let raw = fs::read_to_string(store.path().as_std_path()).unwrap();
        assert_eq!(raw.trim(), "[]");
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let (_temp, store) = temp_store();
        fs::write(store.path().as_std_path(), b"{not json").unwrap();
        assert!(store.load().is_empty());

        let key: ItemKey = "A".parse().unwrap();
        store.update(&key, StatusUpdate::default()).unwrap();
        assert_eq!(store.load().len(), 1);
    }

    #[test]
    fn wire_schema_uses_report_field_names() {
        let (_temp, store) = temp_store();
        let key: ItemKey = "A".parse().unwrap();
        store
            .update(
                &key,
                StatusUpdate {
                    archive_type: Some(ArchiveKind::Targz),
                    processed_count: Some(3),
                    ..StatusUpdate::default()
                },
            )
            .unwrap();

        let raw = fs::read_to_string(store.path().as_std_path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let record = &value[0];
        assert_eq!(record["sku"], "A");
        assert_eq!(record["archive type"], "targz");
        assert_eq!(record["processed_count"], 3);
        assert!(record["download_status"].is_null());
        assert!(record.get("decoded_images").is_none());
    }
}
