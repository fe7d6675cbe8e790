use crate::model::RunRecord;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "sow-dashboard";

/// Per-user data directory for this application.
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

pub fn default_workspace_dir() -> PathBuf {
    data_dir().join("workspaces")
}

pub fn default_log_file() -> PathBuf {
    data_dir().join("sow-dashboard.log")
}

/// File name used when exporting a record without an explicit target.
pub fn export_file_name(record: &RunRecord) -> String {
    let stamp = record
        .created_at
        .format(&time::macros::format_description!(
            "[year][month][day]-[hour][minute][second]"
        ))
        .unwrap_or_else(|_| record.created_at.unix_timestamp().to_string());
    let id = record.id.as_str();
    format!("sow-run-{stamp}-{}.json", &id[..8.min(id.len())])
}

/// Write a record as pretty-printed JSON, creating parent directories as needed.
pub fn export_json(path: &Path, record: &RunRecord) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(record).context("serialize run record")?;
    std::fs::write(path, body).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunStatus;

    #[test]
    fn export_writes_camel_case_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("run.json");
        let mut record = RunRecord::draft("# Add payment integration\n");
        record.status = RunStatus::Failed;
        record.log.push("[ERROR] connection refused".into());

        export_json(&path, &record).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["title"], "Add payment integration");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["sowSnapshot"], "# Add payment integration\n");
        assert_eq!(value["log"][0], "[ERROR] connection refused");
        assert!(value["createdAt"].is_string());
    }

    #[test]
    fn export_file_name_is_stable_for_a_record() {
        let record = RunRecord::draft("# SOW");
        let name = export_file_name(&record);
        assert!(name.starts_with("sow-run-"));
        assert!(name.ends_with(".json"));
        assert_eq!(name, export_file_name(&record));
    }
}
