//! Sends stored videos without an analysis id to the analysis service.
//!
//! Each record moves at most once, from unsubmitted to submitted:
//!
//! ```text
//! Unsubmitted --submit ok + job id--> Submitted (final)
//! Unsubmitted --any failure---------> Unsubmitted (picked up by the next run)
//! ```
//!
//! Requests go out one at a time and are not retried here; the next scheduled
//! run re-selects whatever is still pending.

use tracing::{error, info, instrument, warn};

use crate::analysis::{AnalysisClient, AnalysisRequest, AnalysisSettings};
use crate::store::RecordStore;

pub const DEFAULT_BATCH_SIZE: usize = 5;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubmitSummary {
    pub pending: usize,
    pub submitted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct AnalysisSubmitter {
    batch_size: usize,
    settings: AnalysisSettings,
}

impl Default for AnalysisSubmitter {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE, AnalysisSettings::default())
    }
}

impl AnalysisSubmitter {
    pub fn new(batch_size: usize, settings: AnalysisSettings) -> Self {
        Self {
            batch_size,
            settings,
        }
    }

    #[instrument(level = "info", skip_all, fields(batch_size = self.batch_size))]
    pub async fn run<S, C>(&self, store: &S, client: &C) -> SubmitSummary
    where
        S: RecordStore,
        C: AnalysisClient,
    {
        let mut summary = SubmitSummary::default();

        let pending = match store.list_without_analysis_id(self.batch_size).await {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "Could not list unsubmitted videos");
                return summary;
            }
        };
        summary.pending = pending.len();

        for record in &pending {
            let request = AnalysisRequest::new(record, &self.settings);
            let job_id = match client.submit(&request).await {
                Ok(job_id) => job_id,
                Err(e) => {
                    warn!(source_id = %record.source_id, error = %e, "No analysis id; leaving pending");
                    summary.failed += 1;
                    continue;
                }
            };

            match store.set_analysis_id(&record.source_id, &job_id).await {
                Ok(()) => {
                    info!(source_id = %record.source_id, %job_id, "Sent for analysis");
                    summary.submitted += 1;
                }
                Err(e) => {
                    error!(source_id = %record.source_id, %job_id, error = %e, "Failed to record analysis id");
                    summary.failed += 1;
                }
            }
        }

        info!(
            pending = summary.pending,
            submitted = summary.submitted,
            failed = summary.failed,
            "Submission run complete"
        );
        summary
    }
}
