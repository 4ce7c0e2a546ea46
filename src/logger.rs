use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use crate::diff::diff_json;

pub enum MessageLogMode {
    Full,
    Diffed,
}

/// NDJSON capture of decrypted request and reply bodies.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    session: Uuid,
    previous_status: Option<Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str, session: Uuid) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            session,
            previous_status: None,
        })
    }

    pub fn log_request(&mut self, kind: &str, body: &Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "session": self.session.to_string(),
            "dir": "req",
            "kind": kind,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_failure(&mut self, kind: &str, reason: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "session": self.session.to_string(),
            "dir": "fail",
            "kind": kind,
            "reason": reason,
        });
        self.write_line(&entry);
    }

    /// Status replies are diffed against the previous one in `Diffed` mode;
    /// everything else is always written in full.
    pub fn log_reply(&mut self, kind: &str, body: &Value) {
        let diffed = matches!(self.mode, MessageLogMode::Diffed) && kind == "status";
        if !diffed {
            let entry = json!({
                "ts": Utc::now().to_rfc3339(),
                "session": self.session.to_string(),
                "dir": "reply",
                "kind": kind,
                "body": body,
            });
            self.write_line(&entry);
            return;
        }

        let entry = match self.previous_status.as_ref() {
            None => json!({
                "ts": Utc::now().to_rfc3339(),
                "session": self.session.to_string(),
                "dir": "reply",
                "kind": kind,
                "full": true,
                "body": body,
            }),
            Some(prev) => {
                let mut changes = Vec::new();
                diff_json(prev, body, "", &mut changes);
                let change_entries: Vec<Value> = changes
                    .iter()
                    .map(|(path, old, new)| json!({ "path": path, "old": old, "new": new }))
                    .collect();
                json!({
                    "ts": Utc::now().to_rfc3339(),
                    "session": self.session.to_string(),
                    "dir": "reply",
                    "kind": kind,
                    "changes": change_entries,
                })
            }
        };
        self.write_line(&entry);
        self.previous_status = Some(body.clone());
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}
