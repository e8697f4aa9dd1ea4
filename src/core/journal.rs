//! Append-only JSONL journal of migration and rewrite activity.
//!
//! Every run writes one line per event (run start/end, table start/end, rewrite
//! pass) so an operator can reconstruct what happened without re-running.

use crate::core::error::TodoportError;
use crate::core::time;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JournalEvent {
    pub ts: String,
    pub event_id: String,
    pub run_id: String,
    pub op: String,
    pub subject: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<JsonValue>,
}

pub struct Journal {
    path: Option<PathBuf>,
    run_id: String,
}

impl Journal {
    pub fn new(path: &Path, run_id: &str) -> Self {
        Self {
            path: Some(path.to_path_buf()),
            run_id: run_id.to_string(),
        }
    }

    /// A journal that drops every event. Used for `--no-journal` and in tests.
    pub fn disabled(run_id: &str) -> Self {
        Self {
            path: None,
            run_id: run_id.to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn record(
        &self,
        op: &str,
        subject: &str,
        status: &str,
        detail: Option<JsonValue>,
    ) -> Result<(), TodoportError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let ev = JournalEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            run_id: self.run_id.clone(),
            op: op.to_string(),
            subject: subject.to_string(),
            status: status.to_string(),
            detail,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(f, "{}", serde_json::to_string(&ev)?)?;
        Ok(())
    }
}

/// Reads every event in a journal file. Blank lines are ignored.
pub fn read_events(path: &Path) -> Result<Vec<JournalEvent>, TodoportError> {
    let content = fs::read_to_string(path)?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(TodoportError::JsonError))
        .collect()
}
