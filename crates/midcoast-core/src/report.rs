//! Bounded-concurrency report generation.
//!
//! One task per lead, at most `max_workers` running at once. Results come
//! back in completion order; each carries the lead key it belongs to.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::models::{LeadRecord, LeadSource};
use crate::traits::{ReportFormat, ReportGenerator};

/// A generated report and the lead it was generated for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportEntry {
    pub lead_key: String,
    pub source: LeadSource,
    pub source_id: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportFailure {
    pub lead_key: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportBatchSummary {
    pub generated: usize,
    pub entries: Vec<ReportEntry>,
    pub failures: Vec<ReportFailure>,
    /// Leads never submitted because the run was cancelled.
    pub skipped: usize,
}

/// Generate one report per lead with at most `max_workers` in flight.
///
/// Every submitted lead ends up in either `entries` or `failures`. Once
/// `cancel` fires no further leads are submitted; running tasks finish.
pub async fn generate_reports(
    generator: Arc<dyn ReportGenerator>,
    leads: Vec<LeadRecord>,
    format: ReportFormat,
    max_workers: usize,
    cancel: &CancellationToken,
) -> ReportBatchSummary {
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut tasks = JoinSet::new();
    let mut keys = HashMap::new();
    let mut summary = ReportBatchSummary::default();
    let total = leads.len();

    for (submitted, lead) in leads.into_iter().enumerate() {
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                summary.skipped = total - submitted;
                tracing::warn!(skipped = summary.skipped, "Report generation cancelled");
                break;
            }
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let key = lead.key();
        let generator = Arc::clone(&generator);
        let handle = tasks.spawn(async move {
            let _permit = permit;
            let outcome = generator.generate(&lead, format).await;
            (lead, outcome)
        });
        keys.insert(handle.id(), key);
    }

    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((_, (lead, Ok(path)))) => {
                tracing::debug!(lead = %lead.key(), path = %path.display(), "Report generated");
                summary.entries.push(ReportEntry {
                    lead_key: lead.key(),
                    source: lead.source(),
                    source_id: lead.source_id().to_string(),
                    path,
                });
            }
            Ok((_, (lead, Err(e)))) => {
                tracing::warn!(lead = %lead.key(), error = %e, "Report generation failed");
                summary.failures.push(ReportFailure {
                    lead_key: lead.key(),
                    error: e.to_string(),
                });
            }
            Err(join_err) => {
                let lead_key = keys
                    .get(&join_err.id())
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string());
                tracing::error!(lead = %lead_key, error = %join_err, "Report task aborted");
                summary.failures.push(ReportFailure {
                    lead_key,
                    error: join_err.to_string(),
                });
            }
        }
    }

    summary.generated = summary.entries.len();
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::testutil::MockReportGenerator;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn leads(n: usize) -> Vec<LeadRecord> {
        (0..n)
            .map(|i| LeadRecord::new(LeadSource::Marketplace, format!("m{i}"), Utc::now()))
            .collect()
    }

    #[tokio::test]
    async fn maps_reports_to_leads_by_key() {
        let generator = MockReportGenerator::new().failing_for("m1");
        let summary = generate_reports(
            Arc::new(generator.clone()),
            leads(4),
            ReportFormat::Json,
            2,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(summary.generated, 3);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].lead_key, "marketplace:m1");
        for entry in &summary.entries {
            assert_eq!(entry.path, PathBuf::from(format!("reports/{}.json", entry.source_id)));
        }
        assert_eq!(generator.generated().len(), 4);
    }

    struct SlowGenerator {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ReportGenerator for SlowGenerator {
        async fn generate(&self, lead: &LeadRecord, _format: ReportFormat) -> Result<PathBuf, AppError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if lead.source_id() == "m3" {
                panic!("renderer crashed");
            }
            Ok(PathBuf::from(lead.source_id()))
        }
    }

    #[tokio::test]
    async fn concurrency_is_bounded_and_panics_are_isolated() {
        let generator = Arc::new(SlowGenerator {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let summary = generate_reports(
            generator.clone(),
            leads(8),
            ReportFormat::Csv,
            3,
            &CancellationToken::new(),
        )
        .await;

        assert!(generator.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(summary.generated, 7);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].lead_key, "marketplace:m3");
    }

    #[tokio::test]
    async fn cancelled_batch_submits_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let generator = MockReportGenerator::new();
        let summary = generate_reports(
            Arc::new(generator.clone()),
            leads(5),
            ReportFormat::Json,
            4,
            &token,
        )
        .await;

        assert_eq!(summary.generated, 0);
        assert_eq!(summary.skipped, 5);
        assert!(generator.generated().is_empty());
    }
}
