//! Polls the control document for changes and fans updates out to
//! subscribers, matching the teacher's `ConfigStore` swap-under-lock
//! pattern.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::ControlConfig;
use crate::error::ControlConfigError;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Arc<ControlConfig>>,
}

struct Inner {
    path: PathBuf,
    config: RwLock<Arc<ControlConfig>>,
    last_hash: Mutex<[u8; 32]>,
    last_logged_error: Mutex<Option<String>>,
    subscribers: RwLock<Vec<Subscriber>>,
    next_subscriber_id: AtomicU64,
    stopped: AtomicBool,
}

/// Watches a control document on disk and publishes validated updates.
pub struct ControlWatcher {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn hash_bytes(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

fn load(bytes: &[u8]) -> Result<ControlConfig, ControlConfigError> {
    let cfg = ControlConfig::parse(bytes)?;
    cfg.validate()?;
    Ok(cfg)
}

impl ControlWatcher {
    /// Read and validate the document once, then start polling for changes
    /// every `poll_interval` (default 1s). Fails if the initial read or
    /// parse fails; once running, a later disappearance or parse failure of
    /// the file only logs a warning and keeps serving the last good config.
    pub async fn start(
        path: impl AsRef<Path>,
        poll_interval: Option<Duration>,
    ) -> Result<Self, ControlConfigError> {
        let path = path.as_ref().to_path_buf();
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| ControlConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let cfg = load(&bytes)?;
        let hash = hash_bytes(&bytes);

        let inner = Arc::new(Inner {
            path: path.clone(),
            config: RwLock::new(Arc::new(cfg)),
            last_hash: Mutex::new(hash),
            last_logged_error: Mutex::new(None),
            subscribers: RwLock::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        });

        let poll_inner = inner.clone();
        let interval = poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL);
        let task = tokio::spawn(async move { poll_loop(poll_inner, interval).await });

        Ok(ControlWatcher {
            inner,
            task: Mutex::new(Some(task)),
        })
    }

    pub async fn current(&self) -> Arc<ControlConfig> {
        self.inner.config.read().await.clone()
    }

    /// Subscribe to config updates. The returned channel holds at most one
    /// pending update; a slow subscriber simply misses intermediate values
    /// and eventually observes the latest one.
    pub async fn subscribe(&self) -> (u64, mpsc::Receiver<Arc<ControlConfig>>) {
        let (tx, rx) = mpsc::channel(1);
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribers.write().await.push(Subscriber { id, tx });
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: u64) {
        self.inner.subscribers.write().await.retain(|s| s.id != id);
    }

    /// Idempotent: stops the poll task and closes every subscriber.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
        self.inner.subscribers.write().await.clear();
    }
}

async fn poll_loop(inner: Arc<Inner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        tick(&inner).await;
    }
}

async fn tick(inner: &Arc<Inner>) {
    let bytes = match tokio::fs::read(&inner.path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            log_once(inner, format!("read error: {e}")).await;
            return;
        }
    };

    let hash = hash_bytes(&bytes);
    {
        let last = inner.last_hash.lock().await;
        if *last == hash {
            return;
        }
    }

    let cfg = match load(&bytes) {
        Ok(cfg) => cfg,
        Err(e) => {
            log_once(inner, format!("parse/validation error: {e}")).await;
            return;
        }
    };

    *inner.last_hash.lock().await = hash;
    *inner.last_logged_error.lock().await = None;
    let cfg = Arc::new(cfg);
    *inner.config.write().await = cfg.clone();

    let mut subs = inner.subscribers.write().await;
    subs.retain(|s| match s.tx.try_send(cfg.clone()) {
        Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    });
}

async fn log_once(inner: &Arc<Inner>, message: String) {
    let mut last = inner.last_logged_error.lock().await;
    if last.as_deref() != Some(message.as_str()) {
        tracing::warn!(path = %inner.path.display(), error = %message, "control document unreadable, keeping last good config");
        *last = Some(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_doc(path: &Path, contents: &str) {
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    const GOOD_DOC: &str = "backends:\n  claude:\n    command: claude\n";

    #[tokio::test]
    async fn start_fails_on_missing_file() {
        let err = ControlWatcher::start("/nonexistent/ralph-control.yaml", None).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn start_fails_on_invalid_initial_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.yaml");
        write_doc(&path, "backends: {}\n");
        let err = ControlWatcher::start(&path, None).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn detects_change_and_fans_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.yaml");
        write_doc(&path, GOOD_DOC);

        let watcher = ControlWatcher::start(&path, Some(Duration::from_millis(20)))
            .await
            .unwrap();
        let (_, mut rx) = watcher.subscribe().await;

        write_doc(&path, "backends:\n  claude:\n    command: claude\n  gpt:\n    command: gpt\n");

        let updated = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.backends.len(), 2);
        watcher.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.yaml");
        write_doc(&path, GOOD_DOC);
        let watcher = ControlWatcher::start(&path, None).await.unwrap();
        watcher.stop().await;
        watcher.stop().await;
    }
}
