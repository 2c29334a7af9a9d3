use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use rand::Rng;
use rand::seq::SliceRandom;
use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use tracing::{error, info, warn};

use crate::domain::{ArchiveKind, Item, SourceUrl, StageStatus};
use crate::error::IngestError;
use crate::store::Store;

pub const MAX_ATTEMPTS: u32 = 3;
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.2478.67",
];

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

pub struct SourceResponse {
    pub status: u16,
    pub body: Box<dyn Read + Send>,
}

pub trait ArchiveSource: Send + Sync {
    fn open(&self, url: &SourceUrl, user_agent: &str) -> Result<SourceResponse, IngestError>;
}

#[derive(Clone)]
pub struct HttpArchiveSource {
    client: Client,
}

impl HttpArchiveSource {
    pub fn new() -> Result<Self, IngestError> {
        Self::with_timeout(ATTEMPT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, IngestError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| IngestError::Http(err.to_string()))?;
        Ok(Self { client })
    }
}

impl ArchiveSource for HttpArchiveSource {
    fn open(&self, url: &SourceUrl, user_agent: &str) -> Result<SourceResponse, IngestError> {
        let response = self
            .client
            .get(url.as_str())
            .header(USER_AGENT, user_agent)
            .send()
            .map_err(|err| IngestError::Http(err.to_string()))?;
        Ok(SourceResponse {
            status: response.status().as_u16(),
            body: Box::new(response),
        })
    }
}

// `attempt` is the 1-based attempt that just failed.
pub trait Backoff: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl Backoff for Immediate {
    fn delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Jittered {
    pub base: Duration,
}

impl Backoff for Jittered {
    fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base * attempt;
        let jitter_factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
        Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
    }
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub path: Utf8PathBuf,
    pub file_name: String,
    pub kind: ArchiveKind,
    pub size: u64,
    pub status: StageStatus,
    pub attempts: u32,
}

pub struct ArchiveFetcher<S: ArchiveSource> {
    store: Store,
    source: S,
    backoff: Box<dyn Backoff>,
}

impl<S: ArchiveSource> ArchiveFetcher<S> {
    pub fn new(store: Store, source: S) -> Self {
        Self {
            store,
            source,
            backoff: Box::new(Immediate),
        }
    }

    pub fn with_backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Box::new(backoff);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn fetch(&self, item: &Item) -> FetchOutcome {
        let file_name = item.archive_file_name();
        let path = self.store.download_path(&item.key, &file_name);
        let kind = ArchiveKind::detect(&file_name);
        let mut outcome = FetchOutcome {
            path,
            file_name,
            kind,
            size: 0,
            status: StageStatus::Failed,
            attempts: 0,
        };

        if let Err(err) = Store::ensure_dir(&self.store.download_dir(&item.key)) {
            error!(sku = %item.key, error = %err, "cannot create download directory");
            return outcome;
        }

        let existing = existing_size(&outcome.path);
        if existing > 0 {
            info!(sku = %item.key, size = existing, "already downloaded, skipping");
            outcome.size = existing;
            outcome.status = StageStatus::Success;
            return outcome;
        }

        let user_agent = random_user_agent();
        for attempt in 1..=MAX_ATTEMPTS {
            outcome.attempts = attempt;
            match self.attempt(item, &outcome.path, user_agent, attempt) {
                Ok(size) => {
                    info!(sku = %item.key, size, "download complete");
                    outcome.size = size;
                    outcome.status = StageStatus::Success;
                    return outcome;
                }
                Err(err) => {
                    warn!(sku = %item.key, attempt, error = %err, "download attempt failed");
                }
            }
            if attempt < MAX_ATTEMPTS {
                let delay = self.backoff.delay(attempt);
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
        }

        error!(sku = %item.key, attempts = MAX_ATTEMPTS, "failed to download archive");
        outcome
    }

    fn attempt(
        &self,
        item: &Item,
        path: &Utf8PathBuf,
        user_agent: &str,
        attempt: u32,
    ) -> Result<u64, IngestError> {
        let mut response = self.source.open(&item.source, user_agent)?;
        if response.status != 200 {
            return Err(IngestError::HttpStatus {
                status: response.status,
            });
        }
        info!(sku = %item.key, file = %path, attempt, "downloading");
        let file = File::create(path.as_std_path())
            .map_err(|err| IngestError::Filesystem(format!("create {path}: {err}")))?;
        let mut writer = BufWriter::new(file);
        io::copy(&mut response.body, &mut writer)
            .map_err(|err| IngestError::Http(err.to_string()))?;
        writer
            .flush()
            .map_err(|err| IngestError::Filesystem(err.to_string()))?;
        drop(writer);

        let size = existing_size(path);
        if size == 0 {
            return Err(IngestError::EmptyDownload(path.to_string()));
        }
        Ok(size)
    }
}

fn existing_size(path: &Utf8PathBuf) -> u64 {
    fs::metadata(path.as_std_path())
        .map(|meta| if meta.is_file() { meta.len() } else { 0 })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Mutex;

    use super::*;
    use crate::domain::ArchiveCapability;

    struct ScriptedSource {
        responses: Mutex<Vec<Result<(u16, Vec<u8>), String>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<(u16, Vec<u8>), String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl ArchiveSource for ScriptedSource {
        fn open(&self, _url: &SourceUrl, user_agent: &str) -> Result<SourceResponse, IngestError> {
            self.calls.lock().unwrap().push(user_agent.to_string());
            let mut responses = self.responses.lock().unwrap();
            let next = if responses.is_empty() {
                Err("exhausted".to_string())
            } else {
                responses.remove(0)
            };
            match next {
                Ok((status, body)) => Ok(SourceResponse {
                    status,
                    body: Box::new(Cursor::new(body)),
                }),
                Err(message) => Err(IngestError::Http(message)),
            }
        }
    }

    fn item(url: &str) -> Item {
        Item {
            key: "AAA-0001".parse().unwrap(),
            source: url.parse().unwrap(),
            category: "Test".to_string(),
            capability: ArchiveCapability::Generic,
        }
    }

    fn temp_store() -> (tempfile::TempDir, Store) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("data")).unwrap();
        (temp, Store::new(root))
    }

    #[test]
    fn retries_until_success() {
        let (_temp, store) = temp_store();
        let source = ScriptedSource::new(vec![
            Err("connection reset".to_string()),
            Ok((200, Vec::new())),
            Ok((200, b"archive-bytes".to_vec())),
        ]);
        let fetcher = ArchiveFetcher::new(store, source);

        let outcome = fetcher.fetch(&item("https://example.org/set.zip"));

        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.size, 13);
        assert_eq!(outcome.kind, ArchiveKind::Zip);
        assert_eq!(fetcher.source().calls(), 3);
    }

    #[test]
    fn gives_up_after_three_attempts() {
        let (_temp, store) = temp_store();
        let source = ScriptedSource::new(vec![
            Ok((503, Vec::new())),
            Ok((404, b"missing".to_vec())),
            Ok((500, Vec::new())),
            Ok((200, b"never reached".to_vec())),
        ]);
        let fetcher = ArchiveFetcher::new(store, source);

        let outcome = fetcher.fetch(&item("https://example.org/set.tar.gz"));

        assert_eq!(outcome.status, StageStatus::Failed);
        assert_eq!(outcome.size, 0);
        assert_eq!(outcome.kind, ArchiveKind::Targz);
        assert!(outcome.path.ends_with("AAA-0001/download/set.tar.gz"));
        assert_eq!(fetcher.source().calls(), 3);
    }

    #[test]
    fn existing_file_skips_network() {
        let (_temp, store) = temp_store();
        let target = item("https://example.org/set.zip");
        let path = store.download_path(&target.key, "set.zip");
        Store::ensure_dir(&store.download_dir(&target.key)).unwrap();
        fs::write(path.as_std_path(), b"cached").unwrap();

        let fetcher = ArchiveFetcher::new(store, ScriptedSource::new(Vec::new()));
        let outcome = fetcher.fetch(&target);

        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(outcome.size, 6);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(fetcher.source().calls(), 0);
    }

    #[test]
    fn user_agent_comes_from_pool() {
        let agent = random_user_agent();
        assert!(USER_AGENTS.contains(&agent));
    }

    #[test]
    fn jittered_backoff_stays_within_bounds() {
        let backoff = Jittered {
            base: Duration::from_millis(100),
        };
        let delay = backoff.delay(2);
        assert!(delay >= Duration::from_millis(200));
        assert!(delay <= Duration::from_millis(400));
        assert_eq!(Immediate.delay(1), Duration::ZERO);
    }
}
