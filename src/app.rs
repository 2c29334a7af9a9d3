use serde::Serialize;
use tracing::{info, info_span, warn};

use crate::config::ResolvedConfig;
use crate::domain::{Item, ItemKey, StageStatus};
use crate::error::IngestError;
use crate::extract::{ArchiveExtractor, ExtractOutcome};
use crate::fetch::{ArchiveFetcher, ArchiveSource, Backoff};
use crate::normalize::{DEFAULT_LIMIT, ImageNormalizer, NormalizeOutcome, Profile};
use crate::report::{StatusStore, StatusUpdate};
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub items: Vec<ItemResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemResult {
    pub sku: String,
    pub category: String,
    pub archive: String,
    pub download_status: StageStatus,
    pub extract_status: StageStatus,
    pub extracted_files: usize,
    pub decoded_images: usize,
    pub process_status: StageStatus,
    pub processed_count: usize,
}

pub struct Pipeline<S: ArchiveSource> {
    store: Store,
    status: StatusStore,
    fetcher: ArchiveFetcher<S>,
    extractor: ArchiveExtractor,
    normalizer: ImageNormalizer,
    limit: usize,
}

impl<S: ArchiveSource> Pipeline<S> {
    pub fn new(store: Store, source: S, profile: Profile) -> Self {
        let status = StatusStore::new(store.report_path());
        Self {
            fetcher: ArchiveFetcher::new(store.clone(), source),
            store,
            status,
            extractor: ArchiveExtractor::default(),
            normalizer: ImageNormalizer::new(profile),
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn from_config(config: &ResolvedConfig, source: S) -> Self {
        Self::new(Store::new(config.data_dir.as_str()), source, config.profile.clone())
            .with_limit(config.limit)
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.fetcher = self.fetcher.with_backoff(backoff);
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn status(&self) -> &StatusStore {
        &self.status
    }

    pub fn source(&self) -> &S {
        self.fetcher.source()
    }

    pub fn run(&self, items: &[Item]) -> Result<RunResult, IngestError> {
        Store::ensure_dir(self.store.root())?;
        self.status.reset()?;
        info!(items = items.len(), root = %self.store.root(), "pipeline started");

        let results = items.iter().map(|item| self.process_item(item)).collect();
        Ok(RunResult { items: results })
    }

    pub fn process_item(&self, item: &Item) -> ItemResult {
        let span = info_span!("item", sku = %item.key);
        let _guard = span.enter();

        let fetched = self.fetcher.fetch(item);
        self.record(
            &item.key,
            StatusUpdate {
                filename: Some(fetched.file_name.clone()),
                size: Some(fetched.size),
                archive_type: Some(fetched.kind),
                download_status: Some(fetched.status),
                ..StatusUpdate::default()
            },
        );

        let raw_dir = self.store.raw_dir(&item.key);
        let extracted: ExtractOutcome = self.extractor.extract(
            fetched.path.as_std_path(),
            fetched.kind,
            item.capability,
            raw_dir.as_std_path(),
        );
        self.record(
            &item.key,
            StatusUpdate {
                extract_status: Some(extracted.status),
                extracted_files: Some(extracted.file_count),
                decoded_images: Some(extracted.decoded_count),
                ..StatusUpdate::default()
            },
        );

        let processed_dir = self.store.processed_dir(&item.key);
        let normalized: NormalizeOutcome = self.normalizer.process(
            raw_dir.as_std_path(),
            processed_dir.as_std_path(),
            self.limit,
        );
        self.record(
            &item.key,
            StatusUpdate {
                process_status: Some(normalized.status),
                processed_count: Some(normalized.processed_count),
                ..StatusUpdate::default()
            },
        );

        info!(
            download = %fetched.status,
            extract = %extracted.status,
            process = %normalized.status,
            processed = normalized.processed_count,
            "item finished"
        );

        ItemResult {
            sku: item.key.to_string(),
            category: item.category.clone(),
            archive: fetched.file_name,
            download_status: fetched.status,
            extract_status: extracted.status,
            extracted_files: extracted.file_count,
            decoded_images: extracted.decoded_count,
            process_status: normalized.status,
            processed_count: normalized.processed_count,
        }
    }

    fn record(&self, key: &ItemKey, update: StatusUpdate) {
        if let Err(err) = self.status.update(key, update) {
            warn!(sku = %key, error = %err, "failed to write status record");
        }
    }
}
