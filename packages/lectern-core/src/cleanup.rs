//! Retention cleanup for downloaded media.
//!
//! Periodically removes objects from the expiring media bucket once
//! they pass the retention window, then clears the pointer columns on
//! the owning rows. Media in the permanent bucket is never touched. A
//! failed storage delete does not block the database clear; the two
//! states converge on the next run.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::config::EXPIRING_MEDIA_BUCKET;
use crate::store::objects::ObjectStorage;
use crate::store::ArticleStore;

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CleanupReport {
    pub examined: usize,
    pub cleared: usize,
    pub storage_failures: usize,
}

/// Time-based removal of expired media.
pub struct CleanupWorker {
    articles: Arc<dyn ArticleStore>,
    storage: Arc<dyn ObjectStorage>,
    retention_days: i64,
}

impl CleanupWorker {
    pub fn new(
        articles: Arc<dyn ArticleStore>,
        storage: Arc<dyn ObjectStorage>,
        retention_days: i64,
    ) -> Self {
        Self {
            articles,
            storage,
            retention_days,
        }
    }

    /// Runs one cleanup pass over public and private rows.
    pub async fn run_once(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        let cutoff = Utc::now() - Duration::days(self.retention_days);

        log::info!(
            "[Cleanup] Starting media cleanup (retention {} days, cutoff {})",
            self.retention_days,
            cutoff
        );

        let expired = match self
            .articles
            .expired_media(EXPIRING_MEDIA_BUCKET, cutoff)
            .await
        {
            Ok(expired) => expired,
            Err(e) => {
                log::error!("[Cleanup] Could not query expired media: {}", e);
                return report;
            }
        };
        report.examined = expired.len();

        for row in expired {
            // Delete from storage first; a missing object or a storage
            // outage still lets the database clear proceed.
            if let Err(e) = self
                .storage
                .delete(EXPIRING_MEDIA_BUCKET, &row.storage_path)
                .await
            {
                report.storage_failures += 1;
                log::warn!(
                    "[Cleanup] Storage delete failed for {} (continuing): {}",
                    row.storage_path,
                    e
                );
            }

            match self
                .articles
                .clear_media_pointer(row.article_id, row.is_private)
                .await
            {
                Ok(()) => {
                    report.cleared += 1;
                    let size_mb = row
                        .size_bytes
                        .map(|b| b as f64 / 1024.0 / 1024.0)
                        .unwrap_or(0.0);
                    log::info!(
                        "[Cleanup] Cleared media for article {} ({:.1} MB)",
                        row.article_id,
                        size_mb
                    );
                }
                Err(e) => {
                    log::error!(
                        "[Cleanup] Could not clear pointers for article {}: {}",
                        row.article_id,
                        e
                    );
                }
            }
        }

        log::info!(
            "[Cleanup] Done: {} cleared, {} storage failures",
            report.cleared,
            report.storage_failures
        );
        report
    }
}
