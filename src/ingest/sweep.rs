use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::ImageRegistry;

use super::IngestService;

/// What one sweep pass reclaimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired sessions removed from the registry
    pub sessions: usize,

    /// Scratch directories removed that no live session owned
    pub orphans: usize,

    /// Abandoned tile staging directories removed
    pub staging: usize,
}

impl<R: ImageRegistry + 'static> IngestService<R> {
    /// Drop sessions older than `ttl` (unless mid-completion) together with
    /// their scratch data, then remove scratch directories older than `ttl`
    /// that belong to no live session, and finally tile staging directories
    /// older than `ttl` left by an interrupted transform.
    pub async fn sweep_expired(&self, ttl: Duration) -> SweepReport {
        let mut report = SweepReport::default();

        match self.generator.reclaim_staging(ttl).await {
            Ok(removed) => report.staging = removed,
            Err(e) => warn!(error = %e, "failed to reclaim tile staging"),
        }

        for id in self.sessions.sweep_expired(ttl) {
            debug!(upload_id = %id, "session expired");
            self.discard_scratch(&id).await;
            report.sessions += 1;
        }

        let entries = match self.store.scratch_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to scan scratch directory");
                return report;
            }
        };

        let now = SystemTime::now();
        for entry in entries {
            if self.sessions.contains(&entry.id) {
                continue;
            }
            let age = now.duration_since(entry.modified).unwrap_or_default();
            if age < ttl {
                continue;
            }
            debug!(upload_id = %entry.id, age_secs = age.as_secs(), "orphaned scratch");
            self.discard_scratch(&entry.id).await;
            report.orphans += 1;
        }

        report
    }
}

/// Run [`IngestService::sweep_expired`] every `interval` in the background.
///
/// Returns `None` when either duration is zero (sweeping disabled).
pub fn spawn_expiry_sweep<R: ImageRegistry + 'static>(
    service: Arc<IngestService<R>>,
    interval: Duration,
    ttl: Duration,
) -> Option<JoinHandle<()>> {
    if ttl.is_zero() || interval.is_zero() {
        info!("upload expiry sweep disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let report = service.sweep_expired(ttl).await;
            if report != SweepReport::default() {
                info!(
                    sessions = report.sessions,
                    orphans = report.orphans,
                    staging = report.staging,
                    "expired uploads reclaimed"
                );
            }
        }
    }))
}
