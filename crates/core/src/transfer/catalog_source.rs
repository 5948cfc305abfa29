//! Transfer source reading straight from the catalog.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use super::error::TransferError;
use super::source::{TransferMode, TransferSource};
use crate::catalog::CatalogStream;
use crate::metrics::TRANSFERS_ABORTED;

/// Relays an open catalog stream in fixed-size chunks.
///
/// The stream is closed as soon as the declared size has been read, on the
/// first error, or when the source is dropped.
pub struct CatalogStreamSource {
    stream: Option<Box<dyn CatalogStream>>,
    expected: u64,
    sent: u64,
    chunk_size: usize,
}

impl CatalogStreamSource {
    pub fn new(stream: Box<dyn CatalogStream>, expected: u64, chunk_size: usize) -> Self {
        Self {
            stream: Some(stream),
            expected,
            sent: 0,
            chunk_size: chunk_size.max(1),
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close().await {
                warn!(error = %e, "Failed to close catalog stream");
            }
        }
    }

    async fn fill(&mut self, want: usize) -> Result<Bytes, TransferError> {
        let mut buf = BytesMut::with_capacity(want);
        while buf.len() < want {
            let Some(stream) = self.stream.as_mut() else {
                break;
            };
            let chunk = stream.read_chunk(want - buf.len()).await?;
            if chunk.is_empty() {
                break;
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

#[async_trait]
impl TransferSource for CatalogStreamSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransferError> {
        if self.is_done() {
            self.close().await;
            return Ok(None);
        }

        let remaining = self.expected - self.sent;
        let want = (self.chunk_size as u64).min(remaining) as usize;
        let chunk = match self.fill(want).await {
            Ok(chunk) => chunk,
            Err(e) => {
                self.close().await;
                return Err(e);
            }
        };

        if chunk.len() < want {
            self.close().await;
            return Err(TransferError::Truncated {
                expected: self.expected,
                received: self.sent + chunk.len() as u64,
            });
        }

        self.sent += chunk.len() as u64;
        if self.is_done() {
            debug!(bytes = self.sent, "Catalog stream fully read");
            self.close().await;
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

impl Drop for CatalogStreamSource {
    fn drop(&mut self) {
        if self.stream.is_some() {
            TRANSFERS_ABORTED
                .with_label_values(&[TransferMode::Catalog.as_str()])
                .inc();
            warn!(
                sent = self.sent,
                expected = self.expected,
                "Catalog transfer dropped before completion"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogError, CatalogGateway, RemoteFile};
    use crate::testing::{fixtures, MockCatalog, MockProcessRunner};
    use std::sync::Arc;

    async fn catalog_with(content: Vec<u8>) -> MockCatalog {
        let catalog = MockCatalog::new(Arc::new(MockProcessRunner::new()));
        catalog
            .add_file(&fixtures::scoped_path("x.bin"), content)
            .await;
        catalog
    }

    async fn open(catalog: &MockCatalog) -> Box<dyn CatalogStream> {
        catalog
            .open_stream(
                &fixtures::catalog_context(),
                &RemoteFile::InScope("x.bin".to_string()),
            )
            .await
            .unwrap()
    }

    /// Hands out at most three bytes per read.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        closed: usize,
    }

    #[async_trait]
    impl CatalogStream for Trickle {
        async fn read_chunk(&mut self, max: usize) -> Result<Bytes, CatalogError> {
            let end = (self.pos + max.min(3)).min(self.data.len());
            let chunk = Bytes::copy_from_slice(&self.data[self.pos..end]);
            self.pos = end;
            Ok(chunk)
        }

        async fn close(&mut self) -> Result<(), CatalogError> {
            self.closed += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_chunks_and_close_on_completion() {
        let content: Vec<u8> = (0..20_000u32).map(|i| i as u8).collect();
        let catalog = catalog_with(content.clone()).await;
        let mut source = CatalogStreamSource::new(open(&catalog).await, 20_000, 8_192);
        assert_eq!(catalog.open_stream_count(), 1);

        let mut chunks = Vec::new();
        while let Some(chunk) = source.next_chunk().await.unwrap() {
            chunks.push(chunk);
        }
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 8_192);
        assert_eq!(chunks[1].len(), 8_192);
        assert_eq!(chunks[2].len(), 20_000 - 2 * 8_192);
        assert_eq!(chunks.concat(), content);
        assert_eq!(catalog.open_stream_count(), 0);
    }

    #[tokio::test]
    async fn test_short_reads_are_coalesced() {
        let data: Vec<u8> = (0..20u8).collect();
        let mut source = CatalogStreamSource::new(
            Box::new(Trickle {
                data: data.clone(),
                pos: 0,
                closed: 0,
            }),
            20,
            8,
        );

        let mut sizes = Vec::new();
        let mut all = Vec::new();
        while let Some(chunk) = source.next_chunk().await.unwrap() {
            sizes.push(chunk.len());
            all.extend_from_slice(&chunk);
        }
        assert_eq!(sizes, vec![8, 8, 4]);
        assert_eq!(all, data);
    }

    #[tokio::test]
    async fn test_stops_at_declared_size() {
        let catalog = catalog_with(vec![7u8; 100]).await;
        let mut source = CatalogStreamSource::new(open(&catalog).await, 40, 16);

        let mut total = 0;
        while let Some(chunk) = source.next_chunk().await.unwrap() {
            total += chunk.len();
        }
        assert_eq!(total, 40);
        assert_eq!(catalog.open_stream_count(), 0);
    }

    #[tokio::test]
    async fn test_early_eof_is_truncated() {
        let catalog = catalog_with(vec![1u8; 10]).await;
        let mut source = CatalogStreamSource::new(open(&catalog).await, 30, 8);

        assert_eq!(source.next_chunk().await.unwrap().unwrap().len(), 8);
        let err = source.next_chunk().await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::Truncated {
                expected: 30,
                received: 10
            }
        ));
        assert_eq!(catalog.open_stream_count(), 0);
    }

    #[tokio::test]
    async fn test_read_error_releases_stream() {
        let catalog = catalog_with(vec![1u8; 100]).await;
        catalog.set_stream_fail_after(Some(16)).await;
        let mut source = CatalogStreamSource::new(open(&catalog).await, 100, 16);

        assert!(source.next_chunk().await.unwrap().is_some());
        assert!(matches!(
            source.next_chunk().await,
            Err(TransferError::Catalog(_))
        ));
        assert_eq!(catalog.open_stream_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_releases_stream() {
        let catalog = catalog_with(vec![1u8; 100]).await;
        let mut source = CatalogStreamSource::new(open(&catalog).await, 100, 10);
        assert!(source.next_chunk().await.unwrap().is_some());

        drop(source);
        assert_eq!(catalog.open_stream_count(), 0);
        assert_eq!(catalog.opened_stream_count(), 1);
    }
}
