//! Durable JSON collection store, pass locking and HTTP fetch utilities for matchday.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use fs2::FileExt;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "matchday-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Fixtures,
    Results,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Collection::Fixtures => "fixtures",
            Collection::Results => "results",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("decoding {collection} collection at {}: {source}", .path.display())]
    Decode {
        collection: Collection,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("encoding {collection} collection: {source}")]
    Encode {
        collection: Collection,
        #[source]
        source: serde_json::Error,
    },
    #[error("another pass holds the lock at {}", .path.display())]
    Locked { path: PathBuf },
}

impl StoreError {
    fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedCollection {
    pub collection: Collection,
    pub path: PathBuf,
    pub records: usize,
    pub byte_size: usize,
    pub content_hash: String,
}

/// Fixtures and Results, each a JSON array replaced wholesale on every save.
#[derive(Debug, Clone)]
pub struct CollectionStore {
    fixtures_path: PathBuf,
    results_path: PathBuf,
}

impl CollectionStore {
    pub fn new(fixtures_path: impl Into<PathBuf>, results_path: impl Into<PathBuf>) -> Self {
        Self {
            fixtures_path: fixtures_path.into(),
            results_path: results_path.into(),
        }
    }

    pub fn path(&self, collection: Collection) -> &Path {
        match collection {
            Collection::Fixtures => &self.fixtures_path,
            Collection::Results => &self.results_path,
        }
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Missing or blank files are an empty collection, not an error.
    pub async fn load<T: DeserializeOwned>(
        &self,
        collection: Collection,
    ) -> Result<Vec<T>, StoreError> {
        let path = self.path(collection);
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(%collection, path = %path.display(), "no stored collection yet");
                return Ok(Vec::new());
            }
            Err(err) => return Err(StoreError::io("reading", path, err)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Decode {
            collection,
            path: path.to_path_buf(),
            source,
        })
    }

    pub async fn save<T: Serialize>(
        &self,
        collection: Collection,
        records: &[T],
    ) -> Result<SavedCollection, StoreError> {
        self.stage(collection, records).await?.commit().await
    }

    /// Write and fsync the staging file next to the target; nothing visible changes
    /// until [`StagedWrite::commit`] renames it into place.
    pub async fn stage<T: Serialize>(
        &self,
        collection: Collection,
        records: &[T],
    ) -> Result<StagedWrite, StoreError> {
        let final_path = self.path(collection).to_path_buf();
        let mut bytes = serde_json::to_vec_pretty(records)
            .map_err(|source| StoreError::Encode { collection, source })?;
        bytes.push(b'\n');

        let parent = match final_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .map_err(|err| StoreError::io("creating directory", &parent, err))?;

        let file_name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| collection.name().to_string());
        let temp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        let staged = StagedWrite {
            collection,
            temp_path,
            final_path,
            records: records.len(),
            byte_size: bytes.len(),
            content_hash: Self::sha256_hex(&bytes),
            committed: false,
        };

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&staged.temp_path)
            .await
            .map_err(|err| StoreError::io("opening staging file", &staged.temp_path, err))?;
        file.write_all(&bytes)
            .await
            .map_err(|err| StoreError::io("writing staging file", &staged.temp_path, err))?;
        file.flush()
            .await
            .map_err(|err| StoreError::io("flushing staging file", &staged.temp_path, err))?;
        file.sync_all()
            .await
            .map_err(|err| StoreError::io("syncing staging file", &staged.temp_path, err))?;
        drop(file);

        Ok(staged)
    }
}

/// A fully written staging file awaiting its atomic rename. Dropping it uncommitted
/// removes the staging file and leaves the previous collection untouched.
#[derive(Debug)]
pub struct StagedWrite {
    collection: Collection,
    temp_path: PathBuf,
    final_path: PathBuf,
    records: usize,
    byte_size: usize,
    content_hash: String,
    committed: bool,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub async fn commit(mut self) -> Result<SavedCollection, StoreError> {
        fs::rename(&self.temp_path, &self.final_path)
            .await
            .map_err(|err| StoreError::io("renaming staging file into", &self.final_path, err))?;
        self.committed = true;
        sync_parent_dir(&self.final_path).await;

        Ok(SavedCollection {
            collection: self.collection,
            path: self.final_path.clone(),
            records: self.records,
            byte_size: self.byte_size,
            content_hash: self.content_hash.clone(),
        })
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

#[cfg(unix)]
async fn sync_parent_dir(path: &Path) {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return;
    };
    match fs::File::open(parent).await {
        Ok(dir) => {
            if let Err(err) = dir.sync_all().await {
                warn!(error = %err, dir = %parent.display(), "directory fsync failed");
            }
        }
        Err(err) => warn!(
            error = %err,
            dir = %parent.display(),
            "opening directory for fsync failed"
        ),
    }
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) {}

/// Exclusive advisory lock held for the duration of one pass.
#[derive(Debug)]
pub struct PassLock {
    file: File,
    path: PathBuf,
}

impl PassLock {
    /// Fails fast with [`StoreError::Locked`] when another pass holds the lock.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|err| StoreError::io("creating directory", parent, err))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| StoreError::io("opening lock file", &path, err))?;
        if let Err(err) = FileExt::try_lock_exclusive(&file) {
            let contended = err.kind() == std::io::ErrorKind::WouldBlock
                || err.raw_os_error() == fs2::lock_contended_error().raw_os_error();
            return Err(if contended {
                StoreError::Locked { path }
            } else {
                StoreError::io("locking", &path, err)
            });
        }
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PassLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Applied to every attempt; a stalled provider cannot hang a pass.
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    /// GET with bounded retries on 429/5xx and connect/timeout failures.
    pub async fn fetch_bytes(
        &self,
        source_id: &str,
        url: &str,
        query: &[(&str, String)],
        headers: &HeaderMap,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", source_id, url);
        async move {
            let mut attempt = 0usize;
            loop {
                let resp_result = self
                    .client
                    .get(url)
                    .query(query)
                    .headers(headers.clone())
                    .send()
                    .await;
                let can_retry = attempt < self.backoff.max_retries;

                match resp_result {
                    Ok(resp) => {
                        let status = resp.status();
                        let final_url = resp.url().to_string();

                        if status.is_success() {
                            let body = resp.bytes().await?.to_vec();
                            return Ok(FetchedResponse {
                                status,
                                final_url,
                                body,
                            });
                        }

                        if classify_status(status) == RetryDisposition::Retryable && can_retry {
                            warn!(status = status.as_u16(), attempt, "retrying provider request");
                            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                            attempt += 1;
                            continue;
                        }

                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: final_url,
                        });
                    }
                    Err(err) => {
                        let retryable =
                            classify_reqwest_error(&err) == RetryDisposition::Retryable;
                        if retryable && can_retry {
                            warn!(error = %err, attempt, "retrying provider request");
                            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                            attempt += 1;
                            continue;
                        }
                        return Err(FetchError::Request(err));
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: u64,
        name: String,
    }

    fn rows() -> Vec<Row> {
        vec![
            Row {
                id: 1,
                name: "Luton Town".into(),
            },
            Row {
                id: 2,
                name: "Derby County".into(),
            },
        ]
    }

    fn store_in(dir: &Path) -> CollectionStore {
        CollectionStore::new(dir.join("data/fixtures.json"), dir.join("data/results.json"))
    }

    #[test]
    fn content_hashing_is_stable() {
        let hash = CollectionStore::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn missing_and_blank_files_load_as_empty() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        let loaded: Vec<Row> = store.load(Collection::Fixtures).await.expect("load missing");
        assert!(loaded.is_empty());

        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(store.path(Collection::Results), b"  \n").unwrap();
        let loaded: Vec<Row> = store.load(Collection::Results).await.expect("load blank");
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());

        let first = store.save(Collection::Fixtures, &rows()).await.expect("save");
        let loaded: Vec<Row> = store.load(Collection::Fixtures).await.expect("load");
        assert_eq!(loaded, rows());
        assert_eq!(first.records, 2);

        let second = store.save(Collection::Fixtures, &loaded).await.expect("resave");
        assert_eq!(first.content_hash, second.content_hash);
        let on_disk = std::fs::read(store.path(Collection::Fixtures)).unwrap();
        assert_eq!(CollectionStore::sha256_hex(&on_disk), second.content_hash);
    }

    #[tokio::test]
    async fn abandoned_stage_leaves_committed_file_intact() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        store.save(Collection::Results, &rows()).await.expect("save v1");
        let before = std::fs::read(store.path(Collection::Results)).unwrap();

        let replacement = vec![Row {
            id: 9,
            name: "Half written".into(),
        }];
        let staged = store
            .stage(Collection::Results, &replacement)
            .await
            .expect("stage v2");
        let temp_path = staged.temp_path().to_path_buf();
        assert!(temp_path.exists());
        assert_eq!(std::fs::read(store.path(Collection::Results)).unwrap(), before);

        // Simulated crash between staging and rename.
        drop(staged);

        assert!(!temp_path.exists());
        let loaded: Vec<Row> = store.load(Collection::Results).await.expect("load");
        assert_eq!(loaded, rows());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_decode_error() {
        let dir = tempdir().expect("tempdir");
        let store = store_in(dir.path());
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(store.path(Collection::Fixtures), b"[{\"id\": 1,").unwrap();
        let err = store.load::<Row>(Collection::Fixtures).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Decode {
                collection: Collection::Fixtures,
                ..
            }
        ));
    }

    #[test]
    fn pass_lock_is_exclusive_until_dropped() {
        let dir = tempdir().expect("tempdir");
        let lock_path = dir.path().join("data/.matchday.lock");
        let first = PassLock::acquire(&lock_path).expect("first lock");
        assert_eq!(first.path(), lock_path.as_path());
        assert!(lock_path.exists());
        let err = PassLock::acquire(&lock_path).unwrap_err();
        assert!(matches!(err, StoreError::Locked { .. }));
        drop(first);
        PassLock::acquire(&lock_path).expect("lock after release");
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn only_throttling_and_server_errors_are_retryable() {
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), RetryDisposition::NonRetryable);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
    }
}
