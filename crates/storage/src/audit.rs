//! Append-only audit trail of tool executions, one JSONL file per day.

use chrono::Utc;
use edith_core::{Paths, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing::error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    ToolCall {
        tool_name: String,
        arguments: serde_json::Value,
        result_preview: String,
        conversation_id: String,
        duration_ms: u64,
        timestamp_ms: i64,
    },
    RunFinished {
        conversation_id: String,
        status: String,
        steps: u32,
        timestamp_ms: i64,
    },
}

pub struct AuditLogger {
    paths: Paths,
}

impl AuditLogger {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn log_tool_call(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
        result: &str,
        conversation_id: &str,
        duration_ms: u64,
    ) -> Result<()> {
        let preview: String = result.chars().take(200).collect();
        self.write_event(AuditEvent::ToolCall {
            tool_name: tool_name.to_string(),
            arguments,
            result_preview: preview,
            conversation_id: conversation_id.to_string(),
            duration_ms,
            timestamp_ms: Utc::now().timestamp_millis(),
        })
    }

    pub fn log_run_finished(&self, conversation_id: &str, status: &str, steps: u32) -> Result<()> {
        self.write_event(AuditEvent::RunFinished {
            conversation_id: conversation_id.to_string(),
            status: status.to_string(),
            steps,
            timestamp_ms: Utc::now().timestamp_millis(),
        })
    }

    fn write_event(&self, event: AuditEvent) -> Result<()> {
        let log_file = self.log_file_path();
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&log_file)?;
        writeln!(file, "{}", serde_json::to_string(&event)?)?;
        Ok(())
    }

    fn log_file_path(&self) -> PathBuf {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        self.paths.audit_dir().join(format!("{}.jsonl", today))
    }

    pub fn read_today(&self) -> Result<Vec<AuditEvent>> {
        let log_file = self.log_file_path();
        if !log_file.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&log_file)?;
        let mut events = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => error!(error = %e, "Failed to parse audit event"),
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let paths = Paths::with_base(tmp.path().to_path_buf());
        let logger = AuditLogger::new(paths);

        logger
            .log_tool_call(
                "click",
                serde_json::json!({"uid": 4}),
                "Clicked element 4",
                "conv-1",
                120,
            )
            .unwrap();
        logger.log_run_finished("conv-1", "done", 6).unwrap();

        let events = logger.read_today().unwrap();
        assert_eq!(events.len(), 2);
        match &events[0] {
            AuditEvent::ToolCall {
                tool_name,
                duration_ms,
                ..
            } => {
                assert_eq!(tool_name, "click");
                assert_eq!(*duration_ms, 120);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_result_preview_truncated() {
        let tmp = tempfile::TempDir::new().unwrap();
        let paths = Paths::with_base(tmp.path().to_path_buf());
        let logger = AuditLogger::new(paths);

        let long = "x".repeat(1000);
        logger
            .log_tool_call("take_snapshot", serde_json::json!({}), &long, "c", 5)
            .unwrap();
        match &logger.read_today().unwrap()[0] {
            AuditEvent::ToolCall { result_preview, .. } => {
                assert_eq!(result_preview.chars().count(), 200);
            }
            _ => unreachable!(),
        }
    }
}
