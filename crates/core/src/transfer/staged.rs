//! Transfer source reading a locally staged file.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use super::error::TransferError;
use super::finalizer::StagedFinalizer;
use super::source::{TransferMode, TransferSource};
use crate::metrics::TRANSFERS_ABORTED;
use crate::process::{ProcessHandle, ProcessRunner};

/// The process still writing a staged file.
pub struct StagingWriter {
    pub handle: ProcessHandle,
    pub processes: Arc<dyn ProcessRunner>,
    pub signature: String,
    /// Wait between reads when the reader has caught up with the writer.
    pub poll_interval: Duration,
}

/// Reads a staged file in fixed-size chunks.
///
/// Every chunk but the last is exactly `chunk_size` bytes. When a writer is
/// attached the file may still be growing: hitting end-of-file then waits
/// for more data while the writer is alive, and fails as truncated once it
/// is gone.
pub struct StagedFileSource {
    path: PathBuf,
    file: Option<File>,
    expected: u64,
    sent: u64,
    chunk_size: usize,
    writer: Option<StagingWriter>,
    finalizer: Option<StagedFinalizer>,
}

impl StagedFileSource {
    /// Opens `path`, which must hold (or grow to) `expected` bytes.
    pub async fn open(path: &Path, expected: u64, chunk_size: usize) -> Result<Self, TransferError> {
        let file = File::open(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            expected,
            sent: 0,
            chunk_size: chunk_size.max(1),
            writer: None,
            finalizer: None,
        })
    }

    pub fn with_writer(mut self, writer: StagingWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_finalizer(mut self, finalizer: StagedFinalizer) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    async fn finish(&mut self) {
        self.file = None;
        if let Some(finalizer) = self.finalizer.take() {
            finalizer.run().await;
        }
    }

    async fn writer_alive(&self) -> bool {
        let Some(writer) = &self.writer else {
            return false;
        };
        match writer.processes.is_alive(writer.handle, &writer.signature).await {
            Ok(alive) => alive,
            Err(e) => {
                warn!(handle = %writer.handle, error = %e, "Could not inspect staging writer");
                false
            }
        }
    }

    async fn fill(&mut self, want: usize) -> Result<Bytes, TransferError> {
        let mut buf = BytesMut::zeroed(want);
        let mut filled = 0;
        let mut retried = false;

        while filled < want {
            let Some(file) = self.file.as_mut() else {
                break;
            };
            let n = file.read(&mut buf[filled..]).await?;
            if n > 0 {
                filled += n;
                retried = false;
                continue;
            }

            if self.writer_alive().await {
                let interval = self
                    .writer
                    .as_ref()
                    .map(|w| w.poll_interval)
                    .unwrap_or_default();
                tokio::time::sleep(interval).await;
                continue;
            }
            // One last read: the writer may have flushed right before exiting.
            if !retried {
                retried = true;
                continue;
            }
            // Hand over what was read; the next call reports the truncation.
            if filled > 0 {
                break;
            }
            return Err(TransferError::Truncated {
                expected: self.expected,
                received: self.sent,
            });
        }

        buf.truncate(filled);
        Ok(buf.freeze())
    }
}

#[async_trait]
impl TransferSource for StagedFileSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransferError> {
        if self.is_done() {
            self.finish().await;
            return Ok(None);
        }

        let remaining = self.expected - self.sent;
        let want = (self.chunk_size as u64).min(remaining) as usize;
        let chunk = match self.fill(want).await {
            Ok(chunk) if !chunk.is_empty() => chunk,
            Ok(_) => {
                self.finish().await;
                return Err(TransferError::Truncated {
                    expected: self.expected,
                    received: self.sent,
                });
            }
            Err(e) => {
                self.finish().await;
                return Err(e);
            }
        };

        self.sent += chunk.len() as u64;
        if self.is_done() {
            debug!(path = %self.path.display(), bytes = self.sent, "Staged file fully read");
            self.finish().await;
        }
        Ok(Some(chunk))
    }

    fn is_done(&self) -> bool {
        self.sent >= self.expected
    }

    fn total_size(&self) -> u64 {
        self.expected
    }
}

impl Drop for StagedFileSource {
    fn drop(&mut self) {
        let Some(finalizer) = self.finalizer.take() else {
            return;
        };
        TRANSFERS_ABORTED
            .with_label_values(&[TransferMode::Staged.as_str()])
            .inc();
        warn!(
            path = %self.path.display(),
            sent = self.sent,
            expected = self.expected,
            "Staged transfer dropped before completion"
        );
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(finalizer.run());
            }
            Err(_) => warn!(path = %self.path.display(), "No runtime to finalize staged transfer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MockProcessRunner};
    use crate::transaction::{SqliteTransactionStore, TransactionStore};
    use crate::process::CommandSpec;
    use tempfile::TempDir;

    struct Staged {
        _root: TempDir,
        dir: PathBuf,
        path: PathBuf,
        proxy: PathBuf,
        store: Arc<SqliteTransactionStore>,
        runner: Arc<MockProcessRunner>,
        tx: i64,
    }

    fn staged(content: &[u8]) -> Staged {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("booking-x");
        std::fs::create_dir(&dir).unwrap();
        let path = dir.join("data.csv");
        std::fs::write(&path, content).unwrap();
        let proxy = root.path().join("proxy-1");
        std::fs::write(&proxy, b"cert").unwrap();

        let store = Arc::new(SqliteTransactionStore::in_memory().unwrap());
        let infra = store.upsert_infrastructure(&fixtures::infrastructure()).unwrap();
        let app = store
            .upsert_application(
                &crate::config::ApplicationConfig {
                    name: "astro".to_string(),
                    catalog_dir: "astro".to_string(),
                    infrastructure: "gridit".to_string(),
                },
                infra.id,
            )
            .unwrap();
        let user = store.upsert_user("alice").unwrap();
        let tx = store.begin_transaction(user.id, app.id, None).unwrap().id;

        Staged {
            _root: root,
            dir,
            path,
            proxy,
            store,
            runner: Arc::new(MockProcessRunner::new()),
            tx,
        }
    }

    fn finalizer(s: &Staged) -> StagedFinalizer {
        StagedFinalizer::new(s.store.clone(), s.runner.clone(), s.tx, s.path.clone())
            .with_proxy(Some(s.proxy.clone()))
    }

    async fn drain(source: &mut StagedFileSource) -> (Vec<Bytes>, Option<TransferError>) {
        let mut chunks = Vec::new();
        loop {
            match source.next_chunk().await {
                Ok(Some(chunk)) => chunks.push(chunk),
                Ok(None) => return (chunks, None),
                Err(e) => return (chunks, Some(e)),
            }
        }
    }

    #[tokio::test]
    async fn test_chunk_count_and_single_cleanup() {
        let content: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        let s = staged(&content);
        let mut source = StagedFileSource::open(&s.path, content.len() as u64, 16_384)
            .await
            .unwrap()
            .with_finalizer(finalizer(&s));

        let (chunks, err) = drain(&mut source).await;
        assert!(err.is_none());
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 16_384);
        assert_eq!(chunks[1].len(), 16_384);
        assert_eq!(chunks[2].len(), 40_000 - 2 * 16_384);
        assert_eq!(chunks.concat(), content);
        assert!(source.is_done());

        assert!(!s.path.exists());
        assert!(!s.dir.exists());
        assert!(!s.proxy.exists());
        assert!(!s.store.get_transaction(s.tx).unwrap().unwrap().is_open());

        // Nothing after completion.
        assert!(source.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exact_multiple_of_chunk_size() {
        let s = staged(&vec![1u8; 32]);
        let mut source = StagedFileSource::open(&s.path, 32, 8).await.unwrap();
        let (chunks, err) = drain(&mut source).await;
        assert!(err.is_none());
        assert_eq!(chunks.len(), 4);
    }

    #[tokio::test]
    async fn test_short_file_without_writer_is_truncated() {
        let s = staged(&[9u8; 10]);
        let mut source = StagedFileSource::open(&s.path, 25, 8)
            .await
            .unwrap()
            .with_finalizer(finalizer(&s));

        let (chunks, err) = drain(&mut source).await;
        let received: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(received, 10);
        assert!(matches!(
            err,
            Some(TransferError::Truncated {
                expected: 25,
                received: 10
            })
        ));
        // Cleanup still ran.
        assert!(!s.path.exists());
        assert!(!s.store.get_transaction(s.tx).unwrap().unwrap().is_open());
    }

    #[tokio::test]
    async fn test_truncation_delivers_partial_chunk_first() {
        let s = staged(b"0123456789");
        let mut source = StagedFileSource::open(&s.path, 20, 8).await.unwrap();

        assert_eq!(source.next_chunk().await.unwrap().unwrap().as_ref(), b"01234567");
        assert_eq!(source.next_chunk().await.unwrap().unwrap().as_ref(), b"89");
        let err = source.next_chunk().await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::Truncated {
                expected: 20,
                received: 10
            }
        ));
    }

    #[tokio::test]
    async fn test_finalizer_leaves_orphaned_booking_alone() {
        let s = staged(b"0123");
        let record = s
            .store
            .create_booking(crate::transaction::NewBooking {
                transaction_id: s.tx,
                remote_file: "data.csv".to_string(),
                local_path: s.path.clone(),
                expected_size: 10,
                process_handle: ProcessHandle::from_raw(78),
            })
            .unwrap();
        s.store.mark_orphaned(record.booking.id).unwrap();

        finalizer(&s).with_booking(record.booking.id).run().await;

        let stored = s.store.get_booking(record.booking.id).unwrap().unwrap();
        assert_eq!(stored.action.kind, crate::transaction::ActionKind::Orphaned);
        assert!(!s.path.exists());
        assert!(!s.store.get_transaction(s.tx).unwrap().unwrap().is_open());
    }

    #[tokio::test]
    async fn test_waits_for_live_writer() {
        let s = staged(b"hello ");
        let handle = s
            .runner
            .run_detached(&CommandSpec::new("lcg-cp"))
            .await
            .unwrap();

        let mut source = StagedFileSource::open(&s.path, 11, 4)
            .await
            .unwrap()
            .with_writer(StagingWriter {
                handle,
                processes: s.runner.clone(),
                signature: "lcg-cp".to_string(),
                poll_interval: Duration::from_millis(5),
            })
            .with_finalizer(finalizer(&s).with_writer(handle));

        let path = s.path.clone();
        let runner = s.runner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b"world").unwrap();
            runner.terminate(handle).await;
        });

        let (chunks, err) = drain(&mut source).await;
        assert!(err.is_none());
        assert_eq!(chunks.concat(), b"hello world");
        assert_eq!(chunks.len(), 3);
    }

    #[tokio::test]
    async fn test_dead_writer_truncates() {
        let s = staged(b"abc");
        let handle = s
            .runner
            .run_detached(&CommandSpec::new("lcg-cp"))
            .await
            .unwrap();
        s.runner.terminate(handle).await;

        let mut source = StagedFileSource::open(&s.path, 100, 16)
            .await
            .unwrap()
            .with_writer(StagingWriter {
                handle,
                processes: s.runner.clone(),
                signature: "lcg-cp".to_string(),
                poll_interval: Duration::from_millis(5),
            });
        let (_, err) = drain(&mut source).await;
        assert!(matches!(err, Some(TransferError::Truncated { received: 3, .. })));
    }

    #[tokio::test]
    async fn test_drop_mid_stream_finalizes_once() {
        let s = staged(&vec![5u8; 100]);
        let handle = s
            .runner
            .run_detached(&CommandSpec::new("lcg-cp"))
            .await
            .unwrap();
        let mut source = StagedFileSource::open(&s.path, 100, 10)
            .await
            .unwrap()
            .with_finalizer(finalizer(&s).with_writer(handle));

        assert!(source.next_chunk().await.unwrap().is_some());
        drop(source);

        for _ in 0..100 {
            if !s.path.exists() && !s.store.get_transaction(s.tx).unwrap().unwrap().is_open() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!s.path.exists());
        assert!(!s.dir.exists());
        assert!(!s.store.get_transaction(s.tx).unwrap().unwrap().is_open());
        assert_eq!(s.runner.killed().await, vec![handle]);
    }

    #[tokio::test]
    async fn test_finalizer_closes_booking() {
        let s = staged(b"0123456789");
        let record = s
            .store
            .create_booking(crate::transaction::NewBooking {
                transaction_id: s.tx,
                remote_file: "data.csv".to_string(),
                local_path: s.path.clone(),
                expected_size: 10,
                process_handle: ProcessHandle::from_raw(77),
            })
            .unwrap();

        let mut source = StagedFileSource::open(&s.path, 10, 4)
            .await
            .unwrap()
            .with_finalizer(finalizer(&s).with_booking(record.booking.id));
        let (chunks, err) = drain(&mut source).await;
        assert!(err.is_none());
        assert_eq!(chunks.len(), 3);

        let closed = s.store.get_booking(record.booking.id).unwrap().unwrap();
        assert_eq!(closed.action.kind, crate::transaction::ActionKind::Close);
    }
}
