//! Ordered, atomic document writes.
//!
//! Each [`WriteQueue`] owns one file and a background task. Snapshots are
//! written one at a time in submission order: first to `<file>.tmp`, synced,
//! then renamed over the target. Readers only ever see a complete old or a
//! complete new version.

use crate::error::ChatError;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

enum Job {
    Write {
        snapshot: Vec<u8>,
        done: oneshot::Sender<Result<(), ChatError>>,
    },
    Flush(oneshot::Sender<()>),
}

/// Completion handle for one queued write
#[derive(Debug)]
#[must_use = "a PendingWrite should be awaited or detached"]
pub struct PendingWrite {
    rx: oneshot::Receiver<Result<(), ChatError>>,
}

impl PendingWrite {
    pub(crate) fn failed(err: ChatError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        Self { rx }
    }

    /// Wait for this write to land (or fail)
    pub async fn wait(self) -> Result<(), ChatError> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(ChatError::Persistence("write queue stopped".to_string())))
    }

    /// Let the write finish in the background, logging a failure.
    /// In-memory state stays authoritative either way.
    pub fn detach(self, what: &'static str) {
        tokio::spawn(async move {
            if let Err(e) = self.wait().await {
                warn!("[Store] Failed to persist {}: {}", what, e);
            }
        });
    }
}

/// Serialized writer for a single document file
#[derive(Clone)]
pub struct WriteQueue {
    path: PathBuf,
    tx: mpsc::UnboundedSender<Job>,
}

impl WriteQueue {
    /// Start the writer task. Must be called inside a tokio runtime.
    pub fn spawn(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(path.clone(), rx));
        Self { path, tx }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn enqueue(&self, snapshot: Vec<u8>) -> PendingWrite {
        let (done, rx) = oneshot::channel();
        if self.tx.send(Job::Write { snapshot, done }).is_err() {
            return PendingWrite::failed(ChatError::Persistence(
                "write queue stopped".to_string(),
            ));
        }
        PendingWrite { rx }
    }

    /// Resolves once every write enqueued before this call has completed
    pub async fn flush(&self) {
        let (done, rx) = oneshot::channel();
        if self.tx.send(Job::Flush(done)).is_ok() {
            let _ = rx.await;
        }
    }
}

async fn run(path: PathBuf, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        match job {
            Job::Write { snapshot, done } => {
                let result = write_atomic(&path, &snapshot).await;
                match &result {
                    Ok(()) => debug!("[Store] Wrote {} bytes to {:?}", snapshot.len(), path),
                    Err(e) => warn!("[Store] Write to {:?} failed: {}", path, e),
                }
                // The submitter may have stopped caring
                let _ = done.send(result);
            }
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

async fn write_atomic(path: &Path, snapshot: &[u8]) -> Result<(), ChatError> {
    let temp_path = temp_path(path);

    if let Err(e) = write_then_rename(&temp_path, path, snapshot).await {
        // Never leave a partial temp file behind
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }

    Ok(())
}

async fn write_then_rename(temp_path: &Path, path: &Path, snapshot: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(temp_path).await?;
    file.write_all(snapshot).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    // Atomic rename
    fs::rename(temp_path, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_writes_apply_in_submission_order() {
        let temp_dir = TempDir::new().unwrap();
        let queue = WriteQueue::spawn(temp_dir.path().join("doc.json"));

        let pending: Vec<_> = (0..20)
            .map(|i| queue.enqueue(format!("{{\"n\":{}}}", i).into_bytes()))
            .collect();
        for p in pending {
            p.wait().await.unwrap();
        }

        let content = std::fs::read_to_string(queue.path()).unwrap();
        assert_eq!(content, "{\"n\":19}");
        assert!(!temp_path(queue.path()).exists());
    }

    #[tokio::test]
    async fn test_failure_is_reported_and_queue_continues() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("doc.json");
        // A non-empty directory in the way makes the rename fail
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("blocker"), "x").unwrap();

        let queue = WriteQueue::spawn(&target);
        let first = queue.enqueue(b"first".to_vec());
        assert!(matches!(first.wait().await, Err(ChatError::Persistence(_))));
        assert!(!temp_path(&target).exists());

        std::fs::remove_dir_all(&target).unwrap();
        queue.enqueue(b"second".to_vec()).wait().await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"second");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_failed_write_removes_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("doc.json");
        // Writes through this link fail with ENOSPC
        std::os::unix::fs::symlink("/dev/full", temp_path(&target)).unwrap();

        let queue = WriteQueue::spawn(&target);
        let result = queue.enqueue(b"never lands".to_vec()).wait().await;

        assert!(matches!(result, Err(ChatError::Persistence(_))));
        assert!(std::fs::symlink_metadata(temp_path(&target)).is_err());
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_flush_waits_for_earlier_writes() {
        let temp_dir = TempDir::new().unwrap();
        let queue = WriteQueue::spawn(temp_dir.path().join("doc.json"));

        for i in 0..5 {
            queue.enqueue(vec![b'0' + i]).detach("test doc");
        }
        queue.flush().await;

        assert_eq!(std::fs::read(queue.path()).unwrap(), b"4");
    }
}
