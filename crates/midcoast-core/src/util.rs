use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AppError;

/// Build a run-stamped file name.
///
/// Example: `("combined_leads", "json")` → `"combined_leads_20260315_142501.json"`
pub fn timestamped_file_name(prefix: &str, extension: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}.{}", prefix, at.format("%Y%m%d_%H%M%S"), extension)
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
///
/// Writes to a sibling temp file and renames over the target, so readers
/// never observe a half-written file.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_vec_pretty(value)?;
    let tmp = temp_path_for(path);
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamped_file_name() {
        let at = Utc.with_ymd_and_hms(2026, 3, 15, 14, 25, 1).unwrap();
        assert_eq!(
            timestamped_file_name("combined_leads", "json", at),
            "combined_leads_20260315_142501.json"
        );
    }

    #[test]
    fn write_json_atomic_creates_parents_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.json");

        write_json_atomic(&path, &serde_json::json!({"a": 1})).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["a"], 1);
        assert!(!dir.path().join("nested/out.json.tmp").exists());
    }
}
