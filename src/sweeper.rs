use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SweeperConfig;
use crate::data::DataBackend;
use crate::error::Error;
use crate::metadata::MetadataBackend;

/// Outcome of one cleaning cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub failed: usize,
}

/// Periodically purges uploads whose TTL elapsed.
pub struct Sweeper {
    metadata: Arc<dyn MetadataBackend>,
    data: Arc<dyn DataBackend>,
    min_offset: Duration,
    random_delay: Duration,
}

impl Sweeper {
    pub fn new(
        metadata: Arc<dyn MetadataBackend>,
        data: Arc<dyn DataBackend>,
        config: &SweeperConfig,
    ) -> Self {
        Self {
            metadata,
            data,
            min_offset: config.min_offset,
            random_delay: config.random_delay,
        }
    }

    /// Sleep then clean, until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            let delay = self.next_delay();
            debug!(delay_secs = delay.as_secs(), "next expired uploads sweep scheduled");

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Sweeper stopped");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            match self.clean().await {
                Ok(report) => info!(
                    removed = report.removed,
                    failed = report.failed,
                    "expired uploads sweep done"
                ),
                Err(e) => warn!(error = %e, "unable to list expired uploads"),
            }
        }
    }

    /// `min_offset` plus up to `random_delay`.
    fn next_delay(&self) -> Duration {
        let window = self.random_delay.as_secs();
        let jitter = if window > 0 {
            rand::thread_rng().gen_range(0..window)
        } else {
            0
        };
        self.min_offset + Duration::from_secs(jitter)
    }

    /// Remove every upload that is expired right now.
    ///
    /// A failing upload is logged and counted, it never stops the others.
    pub async fn clean(&self) -> Result<SweepReport, Error> {
        let ids = self.metadata.get_uploads_to_remove(Utc::now())?;
        let mut report = SweepReport::default();

        for id in ids {
            match self.remove(&id).await {
                Ok(true) => report.removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(upload_id = %id, error = %e, "unable to remove expired upload");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn remove(&self, id: &str) -> Result<bool, Error> {
        // Deleted by someone else since the listing
        let Some(upload) = self.metadata.get_upload(id)? else {
            return Ok(false);
        };

        if !upload.stream {
            self.data.remove_upload(&upload).await?;
        }
        self.metadata.remove_upload(id)?;
        debug!(upload_id = %id, "expired upload removed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FileBackend;
    use crate::metadata::MemoryBackend;

    fn sweeper(config: &SweeperConfig) -> (Sweeper, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let data = FileBackend::new(dir.path()).unwrap();
        let sweeper = Sweeper::new(Arc::new(MemoryBackend::new()), Arc::new(data), config);
        (sweeper, dir)
    }

    #[tokio::test]
    async fn vanished_upload_is_skipped() {
        let (sweeper, _dir) = sweeper(&SweeperConfig::default());
        assert!(!sweeper.remove("gone").await.unwrap());
    }

    #[test]
    fn delay_stays_in_window() {
        let config = SweeperConfig {
            min_offset: Duration::from_secs(10),
            random_delay: Duration::from_secs(5),
        };
        let (sweeper, _dir) = sweeper(&config);
        for _ in 0..50 {
            let delay = sweeper.next_delay();
            assert!(delay >= Duration::from_secs(10));
            assert!(delay < Duration::from_secs(15));
        }
    }
}
