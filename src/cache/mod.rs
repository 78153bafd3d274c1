//! On-demand download cache: at-most-one in-flight fetch per origin URL, a
//! bounded in-flight queue with non-blocking enqueue, and error-as-file
//! semantics so the filesystem adapter never has to surface a fetch failure
//! from `read`.

pub mod fetcher;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::mapref::entry::Entry as DashEntry;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{oneshot, Mutex, Notify};

use crate::url_lookup::UrlLookup;
pub use fetcher::{FetchError, Fetcher, HttpFetcher};

/// Construction-time tuning, mirroring spec §6.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub root_dir: PathBuf,
    pub max_queue: usize,
    pub concurrent_downloads: usize,
    pub download_timeout: Duration,
}

impl CacheConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            max_queue: 100,
            concurrent_downloads: 2,
            download_timeout: Duration::from_secs(600),
        }
    }
}

/// Construction-time failure: the cache could not make its root usable.
#[derive(Debug)]
pub enum CacheError {
    RootNotWritable(std::io::Error),
    WarningFileInit(std::io::Error),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::RootNotWritable(err) => write!(f, "cache root not writable: {err}"),
            CacheError::WarningFileInit(err) => write!(f, "could not materialize warning files: {err}"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Per-`open` failure that is never turned into a warning-file handle:
/// either the request was rejected outright, or the accession is unknown.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpenError {
    /// Path confinement invariant violated --- hard error, not a warning file.
    PathConfinement,
    /// C2 could not resolve an origin URL for this accession.
    OriginUnknown,
}

impl std::fmt::Display for OpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpenError::PathConfinement => write!(f, "path escapes cache root"),
            OpenError::OriginUnknown => write!(f, "origin unknown for accession"),
        }
    }
}

impl std::error::Error for OpenError {}

/// Which pre-materialized warning file backs a given failure mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum WarningKind {
    QueueFull,
    Timeout,
    Error,
}

fn queue_full_message(max_queue: usize) -> String {
    format!(
        "WARNING: You seem to be downloading a lot!\n\n\
         To protect you from accidentally downloading all of\n\
         the internet at once, we've implemented a queue\n\
         system which means that you can only request up to\n\
         {max_queue} downloads at once.  If you ask\n\
         for more than this, the first {max_queue}\n\
         are downloaded and this message is temporarily\n\
         returned.\n\n\
         To get the files you want, simply wait a few\n\
         minutes and retry by which time you should be able\n\
         to get a few more of them.\n\n\
         Apologies for the inconvenience\n"
    )
}

const TIMEOUT_MESSAGE: &str = "WARNING: The download timed out\n\n\
We couldn't find this file in our cache so tried\n\
to download it.  Unfortunately the download timed\n\
out.  Please try again later\n";

const ERROR_MESSAGE: &str = "WARNING: There was a problem downloading this file\n\n\
Please try again later\n";

fn content_hash(message: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    message.hash(&mut hasher);
    hasher.finish()
}

struct WarningPaths {
    queue: PathBuf,
    timeout: PathBuf,
    error: PathBuf,
}

impl WarningPaths {
    async fn create(tmp_dir: &Path, max_queue: usize) -> std::io::Result<Self> {
        Ok(Self {
            queue: write_warning_file(tmp_dir, "download_queue_warning", &queue_full_message(max_queue))
                .await?,
            timeout: write_warning_file(tmp_dir, "download_timeout_warning", TIMEOUT_MESSAGE).await?,
            error: write_warning_file(tmp_dir, "download_error", ERROR_MESSAGE).await?,
        })
    }

    fn path_for(&self, kind: WarningKind) -> &Path {
        match kind {
            WarningKind::QueueFull => &self.queue,
            WarningKind::Timeout => &self.timeout,
            WarningKind::Error => &self.error,
        }
    }
}

async fn write_warning_file(tmp_dir: &Path, prefix: &str, message: &str) -> std::io::Result<PathBuf> {
    let path = tmp_dir.join(format!("{prefix}_{:x}.tmp", content_hash(message)));
    if tokio::fs::metadata(&path).await.is_err() {
        tokio::fs::write(&path, message).await?;
    }
    Ok(path)
}

/// A readable handle over a cache entry or a warning file.
pub struct Handle {
    file: tokio::fs::File,
}

impl Handle {
    async fn open(path: &Path) -> std::io::Result<Self> {
        Ok(Self { file: tokio::fs::File::open(path).await? })
    }
}

/// Attributes returned by [`DownloadCache::getattr`].
#[derive(Debug, Clone, Copy)]
pub struct Attrs {
    pub size: u64,
    pub mtime: SystemTime,
}

impl Attrs {
    fn synthetic() -> Self {
        Attrs { size: 0, mtime: SystemTime::now() }
    }
}

struct Job {
    cache_path: PathBuf,
    origin_url: String,
    result_tx: oneshot::Sender<Result<Handle, FetchError>>,
}

/// The concurrent, deduplicating, bounded-queue download cache.
pub struct DownloadCache {
    root_dir: PathBuf,
    url_lookup: Arc<UrlLookup>,
    fetcher: Arc<dyn Fetcher>,
    in_flight: DashMap<String, Arc<Notify>>,
    queue_tx: async_channel::Sender<Job>,
    warning_paths: WarningPaths,
    download_timeout: Duration,
    read_lock: Mutex<()>,
    tmp_counter: AtomicU64,
    max_queue: usize,
}

impl DownloadCache {
    pub async fn new(
        config: CacheConfig,
        url_lookup: Arc<UrlLookup>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Arc<Self>, CacheError> {
        tokio::fs::create_dir_all(&config.root_dir).await.map_err(CacheError::RootNotWritable)?;
        let tmp_dir = config.root_dir.join("tmp");
        tokio::fs::create_dir_all(&tmp_dir).await.map_err(CacheError::RootNotWritable)?;
        let warning_paths = WarningPaths::create(&tmp_dir, config.max_queue)
            .await
            .map_err(CacheError::WarningFileInit)?;

        let (queue_tx, queue_rx) = async_channel::bounded(config.max_queue.max(1));

        let cache = Arc::new(DownloadCache {
            root_dir: config.root_dir,
            url_lookup,
            fetcher,
            in_flight: DashMap::new(),
            queue_tx,
            warning_paths,
            download_timeout: config.download_timeout,
            read_lock: Mutex::new(()),
            tmp_counter: AtomicU64::new(0),
            max_queue: config.max_queue,
        });

        for worker_id in 0..config.concurrent_downloads {
            let cache = cache.clone();
            let queue_rx = queue_rx.clone();
            tokio::spawn(async move { cache.worker_loop(worker_id, queue_rx).await });
        }

        Ok(cache)
    }

    /// Resolves `root_dir.join(relative_path)`, rejecting any path whose
    /// realpath would escape the root. The candidate need not exist yet;
    /// the nearest existing ancestor is canonicalized instead.
    fn confine(&self, relative_path: &str) -> Result<PathBuf, OpenError> {
        let candidate = self.root_dir.join(relative_path);
        let root_real = self.root_dir.canonicalize().unwrap_or_else(|_| self.root_dir.clone());

        let mut probe = candidate.clone();
        loop {
            match probe.try_exists() {
                Ok(true) => break,
                _ => match probe.parent() {
                    Some(parent) if parent != probe => probe = parent.to_path_buf(),
                    _ => break,
                },
            }
        }
        let probe_real = probe.canonicalize().unwrap_or(probe);
        if !probe_real.starts_with(&root_real) {
            return Err(OpenError::PathConfinement);
        }
        Ok(candidate)
    }

    async fn warning_handle(&self, kind: WarningKind) -> Handle {
        let path = self.warning_paths.path_for(kind).to_path_buf();
        Handle::open(&path).await.unwrap_or_else(|err| {
            panic!("warning file {path:?} vanished after construction: {err}")
        })
    }

    /// Returns a readable handle for `relative_path`, fetching it from the
    /// origin on first access. Per-file fetch failures never surface as an
    /// error here --- they become a handle over one of the three warning files.
    pub async fn open(&self, relative_path: &str) -> Result<Handle, OpenError> {
        let cache_path = self.confine(relative_path)?;

        if tokio::fs::metadata(&cache_path).await.is_ok() {
            if let Ok(handle) = Handle::open(&cache_path).await {
                return Ok(handle);
            }
        }

        let url = self.url_lookup.lookup(relative_path).map_err(|_| OpenError::OriginUnknown)?;

        let (notify, is_owner) = match self.in_flight.entry(url.clone()) {
            DashEntry::Occupied(existing) => (existing.get().clone(), false),
            DashEntry::Vacant(vacant) => {
                let notify = Arc::new(Notify::new());
                vacant.insert(notify.clone());
                (notify, true)
            }
        };

        if is_owner {
            Ok(self.enqueue_and_wait(cache_path, url, notify).await)
        } else {
            // Register for the notification before awaiting anything else,
            // so a completion signalled between our dashmap lookup and here
            // is never missed (tokio::sync::Notify's documented race-free
            // pattern: call `notified()` up front, then await it).
            let notified = notify.notified();
            let outcome = tokio::time::timeout(self.download_timeout, notified).await;
            Ok(match outcome {
                Ok(()) => match Handle::open(&cache_path).await {
                    Ok(handle) => handle,
                    Err(_) => self.warning_handle(WarningKind::Timeout).await,
                },
                Err(_elapsed) => self.warning_handle(WarningKind::Timeout).await,
            })
        }
    }

    async fn enqueue_and_wait(&self, cache_path: PathBuf, url: String, notify: Arc<Notify>) -> Handle {
        let (result_tx, result_rx) = oneshot::channel();
        let job = Job { cache_path, origin_url: url.clone(), result_tx };

        if self.queue_tx.try_send(job).is_err() {
            tracing::warn!(url = %url, max_queue = self.max_queue, "download queue full");
            self.in_flight.remove(&url);
            notify.notify_waiters();
            return self.warning_handle(WarningKind::QueueFull).await;
        }

        match tokio::time::timeout(self.download_timeout, result_rx).await {
            Ok(Ok(Ok(handle))) => handle,
            Ok(Ok(Err(fetch_err))) => {
                tracing::warn!(url = %url, error = %fetch_err, "download failed");
                self.warning_handle(WarningKind::Error).await
            }
            Ok(Err(_dropped)) => self.warning_handle(WarningKind::Error).await,
            Err(_elapsed) => {
                tracing::warn!(url = %url, "download wait timed out");
                self.warning_handle(WarningKind::Timeout).await
            }
        }
    }

    /// The cache root directory this instance was constructed with.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Number of jobs currently sitting in the bounded queue, not counting
    /// the ones workers have already dequeued and are actively fetching.
    /// Exposed for tests that assert on backpressure (spec §8 scenarios).
    pub fn queue_len(&self) -> usize {
        self.queue_tx.len()
    }

    /// Positioned read, serialized under a process-wide lock so concurrent
    /// seek+read pairs on handles shared across threads are atomic.
    pub async fn read(&self, handle: &mut Handle, offset: u64, size: u32) -> std::io::Result<Vec<u8>> {
        let _guard = self.read_lock.lock().await;
        handle.file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; size as usize];
        let mut total = 0usize;
        loop {
            let n = handle.file.read(&mut buf[total..]).await?;
            if n == 0 {
                break;
            }
            total += n;
            if total == buf.len() {
                break;
            }
        }
        buf.truncate(total);
        Ok(buf)
    }

    /// On-disk attributes if present; otherwise synthetic zero-size
    /// attributes, supporting a lazy `stat` before the first fetch.
    pub async fn getattr(&self, relative_path: &str) -> Result<Attrs, OpenError> {
        let cache_path = self.confine(relative_path)?;
        match tokio::fs::metadata(&cache_path).await {
            Ok(meta) => {
                Ok(Attrs { size: meta.len(), mtime: meta.modified().unwrap_or_else(|_| SystemTime::now()) })
            }
            Err(_) => Ok(Attrs::synthetic()),
        }
    }

    fn next_tmp_suffix(&self) -> u64 {
        self.tmp_counter.fetch_add(1, Ordering::Relaxed)
    }

    async fn worker_loop(self: Arc<Self>, _worker_id: usize, queue_rx: async_channel::Receiver<Job>) {
        while let Ok(job) = queue_rx.recv().await {
            let outcome = self.run_job(&job).await;

            if let Some((_, notify)) = self.in_flight.remove(&job.origin_url) {
                notify.notify_waiters();
            }

            let _ = job.result_tx.send(outcome);
        }
    }

    async fn run_job(&self, job: &Job) -> Result<Handle, FetchError> {
        if tokio::fs::metadata(&job.cache_path).await.is_ok() {
            if let Ok(handle) = Handle::open(&job.cache_path).await {
                return Ok(handle);
            }
        }

        if let Some(parent) = job.cache_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| FetchError::Transport(err.to_string()))?;
        }
        let tmp_dir = self.root_dir.join("tmp");
        tokio::fs::create_dir_all(&tmp_dir).await.map_err(|err| FetchError::Transport(err.to_string()))?;

        let prefix = job.origin_url.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or("download");
        let tmp_path = tmp_dir.join(format!("{prefix}-{}.part", self.next_tmp_suffix()));

        self.fetcher.fetch(&job.origin_url, &tmp_path).await?;

        tokio::fs::rename(&tmp_path, &job.cache_path)
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        tracing::debug!(url = %job.origin_url, path = %job.cache_path.display(), "download complete");
        Handle::open(&job.cache_path).await.map_err(|err| FetchError::Transport(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Index;
    use std::io::Cursor;

    struct ImmediateFetcher;

    #[async_trait::async_trait]
    impl Fetcher for ImmediateFetcher {
        async fn fetch(&self, _url: &str, dest: &Path) -> Result<(), FetchError> {
            tokio::fs::write(dest, b"This is a fake file").await.unwrap();
            Ok(())
        }
    }

    fn url_lookup() -> Arc<UrlLookup> {
        let tsv = "# assembly_accession\tspecies_taxid\ttaxid\torganism_name\tftp_path\nGCA_1\t1\t1\tHomo sapiens\thttps://example.org/all/foo\n";
        let index = Index::build(Cursor::new(tsv.as_bytes())).unwrap();
        Arc::new(UrlLookup::from_index(&index))
    }

    #[tokio::test]
    async fn single_open_fetches_and_reads() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::new(dir.path());
        let cache =
            DownloadCache::new(config, url_lookup(), Arc::new(ImmediateFetcher)).await.unwrap();

        let mut handle = cache.open("foo/README.txt").await.unwrap();
        let bytes = cache.read(&mut handle, 0, 1000).await.unwrap();
        assert_eq!(bytes, b"This is a fake file");
    }

    #[tokio::test]
    async fn getattr_before_fetch_is_synthetic_zero_size() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::new(dir.path());
        let cache =
            DownloadCache::new(config, url_lookup(), Arc::new(ImmediateFetcher)).await.unwrap();

        let attrs = cache.getattr("foo/README.txt").await.unwrap();
        assert_eq!(attrs.size, 0);
    }

    #[tokio::test]
    async fn path_confinement_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::new(dir.path());
        let cache =
            DownloadCache::new(config, url_lookup(), Arc::new(ImmediateFetcher)).await.unwrap();

        let err = cache.open("../../etc/passwd").await.unwrap_err();
        assert_eq!(err, OpenError::PathConfinement);
    }

    #[tokio::test]
    async fn unknown_accession_is_origin_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::new(dir.path());
        let cache =
            DownloadCache::new(config, url_lookup(), Arc::new(ImmediateFetcher)).await.unwrap();

        let err = cache.open("nope/file.txt").await.unwrap_err();
        assert_eq!(err, OpenError::OriginUnknown);
    }
}
