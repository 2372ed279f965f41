use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use midcoast_core::error::AppError;
use midcoast_core::models::LeadRecord;
use midcoast_core::traits::{ReportFormat, ReportGenerator};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct LeadReport<'a> {
    generated_at: String,
    lead_key: String,
    headline: String,
    score: Option<f64>,
    urgency: u8,
    urgency_level: Option<String>,
    lead: &'a LeadRecord,
}

/// Writes one JSON or CSV report per lead into `dir`.
///
/// PDF rendering is not built in; requesting it fails for that lead only.
#[derive(Debug, Clone)]
pub struct FileReportGenerator {
    dir: PathBuf,
}

impl FileReportGenerator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, lead: &LeadRecord, format: ReportFormat) -> PathBuf {
        let safe_id: String = lead
            .source_id()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!(
            "{}_{}_report.{}",
            lead.source(),
            safe_id,
            format.extension()
        ))
    }
}

fn headline(lead: &LeadRecord) -> String {
    let place = lead
        .address
        .clone()
        .or_else(|| lead.city.clone())
        .unwrap_or_else(|| "Unknown location".to_string());
    match lead.price {
        Some(price) => format!("{place} (${price:.0})"),
        None => place,
    }
}

fn render_json(lead: &LeadRecord) -> Result<Vec<u8>, AppError> {
    let report = LeadReport {
        generated_at: Utc::now().to_rfc3339(),
        lead_key: lead.key(),
        headline: headline(lead),
        score: lead.score,
        urgency: lead.urgency,
        urgency_level: lead.timeline.as_ref().map(|t| t.urgency_level.to_string()),
        lead,
    };
    Ok(serde_json::to_vec_pretty(&report)?)
}

fn render_csv(lead: &LeadRecord) -> Result<Vec<u8>, AppError> {
    let opt = |v: Option<String>| v.unwrap_or_default();
    let timeline = lead.timeline.as_ref();
    let rows: Vec<(&str, String)> = vec![
        ("lead", lead.key()),
        ("headline", headline(lead)),
        ("score", opt(lead.score.map(|s| format!("{s:.1}")))),
        ("urgency", lead.urgency.to_string()),
        ("status", lead.status.to_string()),
        ("address", opt(lead.address.clone())),
        ("price", opt(lead.price.map(|p| format!("{p:.0}")))),
        ("bedrooms", opt(lead.bedrooms.map(|b| b.to_string()))),
        ("bathrooms", opt(lead.bathrooms.map(|b| b.to_string()))),
        ("square_feet", opt(lead.square_feet.map(|s| s.to_string()))),
        ("owner_occupied", opt(lead.owner_occupied.map(|o| o.to_string()))),
        ("equity_percentage", opt(lead.equity_percentage.map(|e| format!("{e:.1}")))),
        ("auction_date", opt(timeline.and_then(|t| t.auction_date).map(|d| d.to_string()))),
        (
            "redemption_deadline",
            opt(timeline.and_then(|t| t.redemption_deadline).map(|d| d.to_string())),
        ),
        ("urgency_level", opt(timeline.map(|t| t.urgency_level.to_string()))),
    ];

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(["field", "value"])
        .map_err(|e| AppError::ReportError(e.to_string()))?;
    for (field, value) in &rows {
        writer
            .write_record([*field, value.as_str()])
            .map_err(|e| AppError::ReportError(e.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| AppError::ReportError(e.to_string()))
}

#[async_trait]
impl ReportGenerator for FileReportGenerator {
    async fn generate(&self, lead: &LeadRecord, format: ReportFormat) -> Result<PathBuf, AppError> {
        let body = match format {
            ReportFormat::Json => render_json(lead)?,
            ReportFormat::Csv => render_csv(lead)?,
            ReportFormat::Pdf => {
                return Err(AppError::Unsupported(
                    "PDF reports require an external renderer; use json or csv".into(),
                ));
            }
        };

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(lead, format);
        tokio::fs::write(&path, body).await?;
        tracing::debug!(lead = %lead.key(), path = %path.display(), "Wrote report");
        Ok(path)
    }
}
