use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use midcoast_core::error::AppError;
use midcoast_core::models::LeadRecord;
use midcoast_core::traits::{ExportFormat, ExportOptions, LeadExporter};
use midcoast_core::util::timestamped_file_name;
use serde::Serialize;

/// One mail-merge row.
#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    source: &'a str,
    source_id: &'a str,
    score: Option<f64>,
    urgency: u8,
    status: &'a str,
    address: Option<&'a str>,
    city: Option<&'a str>,
    state: Option<&'a str>,
    zip_code: Option<&'a str>,
    price: Option<f64>,
    bedrooms: Option<u32>,
    bathrooms: Option<f64>,
    square_feet: Option<u32>,
    property_type: Option<&'a str>,
    owner_occupied: Option<bool>,
    estimated_value: Option<f64>,
    equity_percentage: Option<f64>,
    auction_date: Option<String>,
    redemption_deadline: Option<String>,
    phone: Option<&'a str>,
    email: Option<&'a str>,
    url: Option<&'a str>,
    listing_date: String,
}

impl<'a> ExportRow<'a> {
    fn from_lead(lead: &'a LeadRecord) -> Self {
        let timeline = lead.timeline.as_ref();
        Self {
            source: lead.source().as_str(),
            source_id: lead.source_id(),
            score: lead.score.map(|s| (s * 10.0).round() / 10.0),
            urgency: lead.urgency,
            status: lead.status.as_str(),
            address: lead.address.as_deref(),
            city: lead.city.as_deref(),
            state: lead.state.as_deref(),
            zip_code: lead.zip_code.as_deref(),
            price: lead.price,
            bedrooms: lead.bedrooms,
            bathrooms: lead.bathrooms,
            square_feet: lead.square_feet,
            property_type: lead.property_type.as_deref(),
            owner_occupied: lead.owner_occupied,
            estimated_value: lead.estimated_value,
            equity_percentage: lead.equity_percentage,
            auction_date: timeline.and_then(|t| t.auction_date).map(|d| d.to_string()),
            redemption_deadline: timeline.and_then(|t| t.redemption_deadline).map(|d| d.to_string()),
            phone: lead.contact_info.get("phone").map(String::as_str),
            email: lead.contact_info.get("email").map(String::as_str),
            url: lead.raw_source_payload.get("url").and_then(|u| u.as_str()),
            listing_date: lead.listing_date.format("%Y-%m-%d").to_string(),
        }
    }
}

/// Writes filtered, score-ranked leads as CSV or a tab-delimited sheet.
#[derive(Debug, Clone)]
pub struct FileExporter {
    dir: PathBuf,
}

impl FileExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl LeadExporter for FileExporter {
    fn export(
        &self,
        leads: &[LeadRecord],
        format: ExportFormat,
        options: &ExportOptions,
    ) -> Result<PathBuf, AppError> {
        let mut rows: Vec<&LeadRecord> = leads.iter().filter(|l| options.admits(l)).collect();
        rows.sort_by(|a, b| b.score.unwrap_or(0.0).total_cmp(&a.score.unwrap_or(0.0)));

        let (extension, delimiter) = match format {
            ExportFormat::Csv => ("csv", b','),
            ExportFormat::Excel => ("tsv", b'\t'),
        };
        fs::create_dir_all(&self.dir)?;
        let path = self
            .dir
            .join(timestamped_file_name(&format!("leads_{format}"), extension, Utc::now()));

        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(&path)
            .map_err(|e| AppError::ExportError(format!("{}: {e}", path.display())))?;
        for lead in &rows {
            writer
                .serialize(ExportRow::from_lead(lead))
                .map_err(|e| AppError::ExportError(format!("{}: {e}", lead.key())))?;
        }
        writer.flush()?;

        tracing::info!(%format, rows = rows.len(), path = %path.display(), "Exported leads");
        Ok(path)
    }
}
