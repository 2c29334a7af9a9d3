use camino::Utf8PathBuf;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use archive_ingest::domain::{ArchiveCapability, Item, StageStatus};
use archive_ingest::fetch::{ArchiveFetcher, HttpArchiveSource};
use archive_ingest::store::Store;

// The mock server runs on its own thread; the blocking client must be driven
// outside the runtime.
fn start_server(runtime: &tokio::runtime::Runtime, status: u16, body: &'static [u8]) -> MockServer {
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/set.zip"))
            .respond_with(ResponseTemplate::new(status).set_body_bytes(body))
            .mount(&server)
            .await;
        server
    })
}

fn item(server: &MockServer) -> Item {
    Item {
        key: "AAA-0001".parse().unwrap(),
        source: format!("{}/files/set.zip", server.uri()).parse().unwrap(),
        category: "Test".to_string(),
        capability: ArchiveCapability::Generic,
    }
}

fn request_count(runtime: &tokio::runtime::Runtime, server: &MockServer) -> usize {
    runtime
        .block_on(server.received_requests())
        .map(|requests| requests.len())
        .unwrap_or(0)
}

#[test]
fn server_error_is_attempted_three_times() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = start_server(&runtime, 500, b"boom");
    let temp = tempfile::tempdir().unwrap();
    let store = Store::new(Utf8PathBuf::from_path_buf(temp.path().join("data")).unwrap());
    let fetcher = ArchiveFetcher::new(store, HttpArchiveSource::new().unwrap());

    let outcome = fetcher.fetch(&item(&server));

    assert_eq!(outcome.status, StageStatus::Failed);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(request_count(&runtime, &server), 3);
}

#[test]
fn download_sends_browser_user_agent_and_is_idempotent() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = start_server(&runtime, 200, b"PK-archive-bytes");
    let temp = tempfile::tempdir().unwrap();
    let store = Store::new(Utf8PathBuf::from_path_buf(temp.path().join("data")).unwrap());
    let fetcher = ArchiveFetcher::new(store.clone(), HttpArchiveSource::new().unwrap());
    let target = item(&server);

    let first = fetcher.fetch(&target);
    let second = fetcher.fetch(&target);

    assert_eq!(first.status, StageStatus::Success);
    assert_eq!(first.size, 16);
    assert_eq!(second.status, StageStatus::Success);
    assert_eq!(second.size, first.size);
    assert_eq!(second.attempts, 0);
    assert_eq!(request_count(&runtime, &server), 1);

    let requests = runtime.block_on(server.received_requests()).unwrap();
    let agent = requests[0]
        .headers
        .get("user-agent")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(agent.starts_with("Mozilla/5.0"), "{agent}");

    let saved = std::fs::read(store.download_path(&target.key, "set.zip").as_std_path()).unwrap();
    assert_eq!(saved, b"PK-archive-bytes");
}
