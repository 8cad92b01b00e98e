//! Prepare/finalize handoff file.
//!
//! The prepare stage records everything the finalize stage needs in one
//! versioned JSON file, so finalize never re-derives run facts from the
//! ambient environment. Writes go through a temp file + rename to keep
//! readers from observing partial data.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::HeraldError;
use crate::model::EntityKind;
use crate::platform::{EntityHandle, ProviderKind};

pub const HANDOFF_SCHEMA_VERSION: u32 = 1;

/// Timings and cost reported by the assistant run, carried into the
/// finalize footer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RunMetrics {
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub api_duration_ms: Option<u64>,
    #[serde(default)]
    pub cost_usd: Option<f64>,
}

/// Everything finalize needs to know about the run prepare set up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRecord {
    #[serde(default)]
    pub schema_version: u32,
    pub provider: ProviderKind,
    #[serde(default)]
    pub triggered: bool,
    /// Identifier of the tracking comment, when one was created.
    #[serde(default)]
    pub comment_id: Option<u64>,
    /// Absent for direct-prompt runs that target no issue or merge request.
    #[serde(default)]
    pub entity_kind: Option<EntityKind>,
    #[serde(default)]
    pub entity_number: u64,
    pub base_branch: String,
    pub current_branch: String,
    /// Working branch announced for this run, if any.
    #[serde(default)]
    pub claude_branch: Option<String>,
    #[serde(default)]
    pub job_url: Option<String>,
    #[serde(default)]
    pub trigger_username: String,
    #[serde(default)]
    pub started_unix_ms: u64,
    /// Failure captured during prepare, reported verbatim by finalize.
    #[serde(default)]
    pub prepare_error: Option<String>,
    #[serde(default)]
    pub metrics: Option<RunMetrics>,
}

impl HandoffRecord {
    /// Handle of the issue or merge request this run targeted, when one
    /// exists.
    pub fn entity(&self) -> Option<EntityHandle> {
        self.entity_kind.map(|kind| EntityHandle {
            kind,
            number: self.entity_number,
        })
    }

    pub fn load(path: &Path) -> Result<Self, HeraldError> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            HeraldError::Handoff(format!(
                "failed to read handoff file {}: {error}",
                path.display()
            ))
        })?;
        let record: Self = serde_json::from_str(&raw).map_err(|error| {
            HeraldError::Handoff(format!(
                "failed to parse handoff file {}: {error}",
                path.display()
            ))
        })?;
        if record.schema_version != HANDOFF_SCHEMA_VERSION {
            return Err(HeraldError::Handoff(format!(
                "unsupported handoff schema version {} (expected {HANDOFF_SCHEMA_VERSION})",
                record.schema_version
            )));
        }
        Ok(record)
    }

    pub fn save(&self, path: &Path) -> Result<(), HeraldError> {
        let serialized = serde_json::to_string_pretty(self).map_err(|error| {
            HeraldError::Handoff(format!("failed to serialize handoff record: {error}"))
        })?;
        write_text_atomic(path, &serialized)
    }
}

/// Writes text using a temp file + rename so readers never observe
/// partial data.
fn write_text_atomic(path: &Path, content: &str) -> Result<(), HeraldError> {
    let parent_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir).map_err(|error| {
        HeraldError::Handoff(format!(
            "failed to create {}: {error}",
            parent_dir.display()
        ))
    })?;

    let temp_name = format!(
        ".{}.tmp-{}-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("handoff"),
        std::process::id(),
        chrono::Utc::now().timestamp_millis()
    );
    let temp_path = parent_dir.join(temp_name);
    std::fs::write(&temp_path, content).map_err(|error| {
        HeraldError::Handoff(format!(
            "failed to write temporary file {}: {error}",
            temp_path.display()
        ))
    })?;
    std::fs::rename(&temp_path, path).map_err(|error| {
        HeraldError::Handoff(format!(
            "failed to rename {} to {}: {error}",
            temp_path.display(),
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::{HandoffRecord, RunMetrics, HANDOFF_SCHEMA_VERSION};
    use crate::model::EntityKind;
    use crate::platform::ProviderKind;

    fn sample_record() -> HandoffRecord {
        HandoffRecord {
            schema_version: HANDOFF_SCHEMA_VERSION,
            provider: ProviderKind::Gitlab,
            triggered: true,
            comment_id: Some(4242),
            entity_kind: Some(EntityKind::Issue),
            entity_number: 789,
            base_branch: "main".to_string(),
            current_branch: "main".to_string(),
            claude_branch: Some("claude-issue-789".to_string()),
            job_url: Some("https://ci.example.test/jobs/11".to_string()),
            trigger_username: "alice".to_string(),
            started_unix_ms: 1_700_000_000_000,
            prepare_error: None,
            metrics: Some(RunMetrics {
                duration_ms: 30_500,
                api_duration_ms: Some(2_100),
                cost_usd: Some(0.0142),
            }),
        }
    }

    #[test]
    fn functional_save_then_load_round_trips_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handoff.json");
        let record = sample_record();
        record.save(&path).unwrap();
        let loaded = HandoffRecord::load(&path).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn functional_load_rejects_unknown_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handoff.json");
        let mut record = sample_record();
        record.schema_version = 99;
        record.save(&path).unwrap();
        let error = HandoffRecord::load(&path).unwrap_err();
        assert!(error.to_string().contains("schema version 99"));
    }

    #[test]
    fn functional_load_reports_missing_file_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let error = HandoffRecord::load(&path).unwrap_err();
        assert!(error.to_string().contains("absent.json"));
    }

    #[test]
    fn unit_optional_fields_default_when_absent_from_json() {
        let raw = r#"{
            "schema_version": 1,
            "provider": "github",
            "entity_kind": "issue",
            "entity_number": 7,
            "base_branch": "main",
            "current_branch": "main"
        }"#;
        let record: HandoffRecord = serde_json::from_str(raw).unwrap();
        assert!(!record.triggered);
        assert_eq!(record.comment_id, None);
        assert_eq!(record.trigger_username, "");
        assert_eq!(record.metrics, None);
        assert_eq!(
            record.entity(),
            Some(crate::platform::EntityHandle::issue(7))
        );
    }

    #[test]
    fn unit_entity_handle_absent_for_direct_prompt_records() {
        let raw = r#"{
            "schema_version": 1,
            "provider": "github",
            "base_branch": "main",
            "current_branch": "main"
        }"#;
        let record: HandoffRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.entity(), None);
        assert_eq!(record.entity_number, 0);
    }
}
