use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use midcoast_core::error::AppError;
use midcoast_core::models::LeadRecord;
use midcoast_core::traits::{AlertOutcome, LeadAlerter};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct AlertLine<'a> {
    sent_at: String,
    lead: String,
    score: f64,
    address: Option<&'a str>,
    price: Option<f64>,
    url: Option<&'a str>,
}

/// Logs each high-value lead and appends it to a JSON-lines alert log.
#[derive(Debug, Clone)]
pub struct LogAlerter {
    path: PathBuf,
}

impl LogAlerter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, lead: &LeadRecord, score: f64) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = AlertLine {
            sent_at: Utc::now().to_rfc3339(),
            lead: lead.key(),
            score,
            address: lead.address.as_deref(),
            price: lead.price,
            url: lead.raw_source_payload.get("url").and_then(|u| u.as_str()),
        };
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(&line)?)?;
        Ok(())
    }
}

impl LeadAlerter for LogAlerter {
    fn process(&self, leads: &[LeadRecord], threshold: f64) -> AlertOutcome {
        let mut outcome = AlertOutcome::default();
        for lead in leads {
            let Some(score) = lead.score.filter(|s| *s >= threshold) else {
                continue;
            };
            match self.append(lead, score) {
                Ok(()) => {
                    tracing::info!(
                        lead = %lead.key(),
                        score,
                        address = lead.address.as_deref().unwrap_or("unknown"),
                        "High-value lead"
                    );
                    outcome.sent += 1;
                }
                Err(e) => {
                    tracing::warn!(lead = %lead.key(), error = %e, "Failed to record alert");
                    outcome.errors.push(format!("{}: {e}", lead.key()));
                }
            }
        }
        outcome
    }
}
