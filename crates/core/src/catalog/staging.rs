//! Helpers shared by staging implementations.

use std::path::Path;
use tokio::time::sleep;

use crate::config::StagingWait;

/// Waits until `path` exists and is non-empty.
///
/// Checks once immediately and then up to `wait.attempts` more times,
/// sleeping `wait.interval` in between. Returns whether data showed up.
pub async fn wait_for_first_bytes(path: &Path, wait: StagingWait) -> bool {
    for attempt in 0..=wait.attempts {
        if let Ok(meta) = tokio::fs::metadata(path).await {
            if meta.len() > 0 {
                return true;
            }
        }
        if attempt < wait.attempts {
            sleep(wait.interval).await;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn quick_wait(attempts: u32) -> StagingWait {
        StagingWait {
            attempts,
            interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_returns_immediately_when_data_present() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("staged.bin");
        std::fs::write(&path, b"abc").unwrap();

        assert!(wait_for_first_bytes(&path, quick_wait(1)).await);
    }

    #[tokio::test]
    async fn test_times_out_on_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("staged.bin");
        std::fs::write(&path, b"").unwrap();

        assert!(!wait_for_first_bytes(&path, quick_wait(3)).await);
    }

    #[tokio::test]
    async fn test_sees_data_arriving_later() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("staged.bin");
        let writer_path = path.clone();

        tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            tokio::fs::write(writer_path, b"late").await.unwrap();
        });

        assert!(wait_for_first_bytes(&path, quick_wait(50)).await);
    }
}
