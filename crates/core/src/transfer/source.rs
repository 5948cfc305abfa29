//! The transfer source contract and its stream adapter.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream};
use tracing::warn;

use super::error::TransferError;
use crate::metrics::{BYTES_STREAMED, TRANSFERS_ABORTED};

/// Where the bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// A locally staged copy.
    Staged,
    /// Straight from the catalog's object store.
    Catalog,
}

impl TransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMode::Staged => "staged",
            TransferMode::Catalog => "catalog",
        }
    }
}

/// A finite, non-restartable sequence of byte chunks.
#[async_trait]
pub trait TransferSource: Send {
    /// Next chunk, or `None` once the declared length has been delivered.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransferError>;

    /// Whether the declared length has been delivered.
    fn is_done(&self) -> bool;

    /// Declared length in bytes.
    fn total_size(&self) -> u64;
}

/// A ready-to-serve transfer.
pub struct Transfer {
    pub file_name: String,
    pub size: u64,
    pub mode: TransferMode,
    pub source: Box<dyn TransferSource>,
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transfer")
            .field("file_name", &self.file_name)
            .field("size", &self.size)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl Transfer {
    pub fn new(file_name: impl Into<String>, mode: TransferMode, source: Box<dyn TransferSource>) -> Self {
        Self {
            file_name: file_name.into(),
            size: source.total_size(),
            mode,
            source,
        }
    }

    /// Turns the transfer into a byte stream.
    ///
    /// An error is yielded once and ends the stream. Dropping the stream
    /// drops the source, which releases its resources.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, TransferError>> + Send {
        let mode = self.mode;
        let file_name = self.file_name;
        stream::unfold(Some(self.source), move |state| {
            let file_name = file_name.clone();
            async move {
                let mut source = state?;
                match source.next_chunk().await {
                    Ok(Some(chunk)) => {
                        BYTES_STREAMED
                            .with_label_values(&[mode.as_str()])
                            .inc_by(chunk.len() as u64);
                        Some((Ok(chunk), Some(source)))
                    }
                    Ok(None) => None,
                    Err(e) => {
                        TRANSFERS_ABORTED.with_label_values(&[mode.as_str()]).inc();
                        warn!(file = %file_name, mode = mode.as_str(), error = %e, "Transfer aborted");
                        Some((Err(e), None))
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    struct Scripted {
        chunks: Vec<Result<Bytes, TransferError>>,
        total: u64,
    }

    #[async_trait]
    impl TransferSource for Scripted {
        async fn next_chunk(&mut self) -> Result<Option<Bytes>, TransferError> {
            if self.chunks.is_empty() {
                return Ok(None);
            }
            self.chunks.remove(0).map(Some)
        }

        fn is_done(&self) -> bool {
            self.chunks.is_empty()
        }

        fn total_size(&self) -> u64 {
            self.total
        }
    }

    #[tokio::test]
    async fn test_stream_yields_chunks_then_ends() {
        let source = Scripted {
            chunks: vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"c"))],
            total: 3,
        };
        let transfer = Transfer::new("f", TransferMode::Staged, Box::new(source));
        assert_eq!(transfer.size, 3);

        let items: Vec<_> = transfer.into_stream().collect().await;
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.is_ok()));
    }

    #[test]
    fn test_debug_omits_source() {
        let source = Scripted {
            chunks: Vec::new(),
            total: 7,
        };
        let transfer = Transfer::new("report.pdf", TransferMode::Staged, Box::new(source));
        assert_eq!(
            format!("{transfer:?}"),
            r#"Transfer { file_name: "report.pdf", size: 7, mode: Staged, .. }"#
        );
    }

    #[tokio::test]
    async fn test_stream_stops_after_error() {
        let source = Scripted {
            chunks: vec![
                Ok(Bytes::from_static(b"ab")),
                Err(TransferError::Truncated {
                    expected: 10,
                    received: 2,
                }),
                Ok(Bytes::from_static(b"never")),
            ],
            total: 10,
        };
        let items: Vec<_> = Transfer::new("f", TransferMode::Catalog, Box::new(source))
            .into_stream()
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(TransferError::Truncated { .. })));
    }
}
