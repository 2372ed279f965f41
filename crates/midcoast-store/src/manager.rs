use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use midcoast_core::error::AppError;
use midcoast_core::models::{LeadRecord, LeadSource, LeadStatus};
use midcoast_core::traits::LeadManager;
use midcoast_core::util::write_json_atomic;

/// Stores each lead as `<source>_<source_id>.json` under one directory.
///
/// Re-scraped leads keep the status and `created_at` of their stored copy, so
/// a lead marked `contacted` stays contacted across runs.
#[derive(Debug, Clone)]
pub struct FileLeadManager {
    dir: PathBuf,
}

impl FileLeadManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, source: LeadSource, source_id: &str) -> PathBuf {
        let safe_id: String = source_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{source}_{safe_id}.json"))
    }

    /// The stored copy of a lead, if any.
    pub fn load(&self, source: LeadSource, source_id: &str) -> Result<Option<LeadRecord>, AppError> {
        let path = self.path_for(source, source_id);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Move a stored lead to `status`. Returns `false` if the lead is unknown.
    pub fn set_status(&self, source: LeadSource, source_id: &str, status: LeadStatus) -> Result<bool, AppError> {
        let Some(mut lead) = self.load(source, source_id)? else {
            return Ok(false);
        };
        lead.status = status;
        lead.updated_at = Utc::now();
        write_json_atomic(&self.path_for(source, source_id), &lead)?;
        Ok(true)
    }
}

impl LeadManager for FileLeadManager {
    fn initialize(&self, leads: Vec<LeadRecord>) -> Vec<LeadRecord> {
        let now = Utc::now();
        leads
            .into_iter()
            .map(|mut lead| {
                match self.load(lead.source(), lead.source_id()) {
                    Ok(Some(stored)) => {
                        lead.status = stored.status;
                        lead.created_at = stored.created_at;
                    }
                    Ok(None) => lead.status = LeadStatus::New,
                    Err(e) => {
                        tracing::warn!(lead = %lead.key(), error = %e, "Could not read stored lead, treating as new");
                        lead.status = LeadStatus::New;
                    }
                }
                lead.updated_at = now;
                lead
            })
            .collect()
    }

    fn save_all(&self, leads: &[LeadRecord]) -> Result<usize, AppError> {
        let mut saved = 0;
        let mut last_error = None;
        for lead in leads {
            match write_json_atomic(&self.path_for(lead.source(), lead.source_id()), lead) {
                Ok(()) => saved += 1,
                Err(e) => {
                    tracing::warn!(lead = %lead.key(), error = %e, "Failed to save lead");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if saved == 0 => Err(e),
            _ => Ok(saved),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead(id: &str) -> LeadRecord {
        LeadRecord::new(LeadSource::PublicRecords, id, Utc::now())
    }

    #[test]
    fn saves_one_file_per_lead() {
        let dir = tempfile::tempdir().unwrap();
        let manager = FileLeadManager::new(dir.path().join("leads"));
        let saved = manager.save_all(&[lead("CV-2026-0114"), lead("RE/2026/7")]).unwrap();
        assert_eq!(saved, 2);
        assert!(manager.dir().join("public_records_CV-2026-0114.json").exists());
        assert!(manager.dir().join("public_records_RE_2026_7.json").exists());
    }

    #[test]
    fn initialize_preserves_stored_status_and_creation_time() {
        let dir = tempfile::tempdir().unwrap();
        let manager = FileLeadManager::new(dir.path());
        let original = lead("CV-1");
        manager.save_all(std::slice::from_ref(&original)).unwrap();
        assert!(manager.set_status(LeadSource::PublicRecords, "CV-1", LeadStatus::Contacted).unwrap());

        let rescraped = manager.initialize(vec![lead("CV-1"), lead("CV-2")]);
        assert_eq!(rescraped[0].status, LeadStatus::Contacted);
        assert_eq!(rescraped[0].created_at, original.created_at);
        assert_eq!(rescraped[1].status, LeadStatus::New);
    }

    #[test]
    fn set_status_on_unknown_lead_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let manager = FileLeadManager::new(dir.path());
        assert!(!manager.set_status(LeadSource::Marketplace, "x", LeadStatus::Archived).unwrap());
    }

    #[test]
    fn total_save_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("leads");
        fs::write(&blocker, "not a directory").unwrap();
        let manager = FileLeadManager::new(&blocker);
        assert!(manager.save_all(&[lead("a")]).is_err());
    }
}
