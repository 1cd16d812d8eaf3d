use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::diff::diff_json;

pub enum MessageLogMode {
    Full,
    /// Poll bodies are written in full once per path, then as changes only.
    Diffed,
}

/// NDJSON log of the traffic exchanged with the cloud API.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous_polls: HashMap<String, Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            mode,
            file,
            previous_polls: HashMap::new(),
        })
    }

    pub fn log_request(&mut self, method: &str, path: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": method,
            "path": path,
        });
        self.write_line(&entry);
    }

    /// Records an outbound command and returns the id that ties it to its
    /// confirmation.
    pub fn log_command(&mut self, appliance_id: &str, body: &Value) -> Uuid {
        let id = Uuid::new_v4();
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cmd",
            "id": id.to_string(),
            "appliance": appliance_id,
            "body": body,
        });
        self.write_line(&entry);
        id
    }

    pub fn log_confirmation(&mut self, id: Uuid, status: u16, body: &Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "ack",
            "id": id.to_string(),
            "status": status,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_poll(&mut self, path: &str, status: u16, body: &Value) {
        let entry = match self.mode {
            MessageLogMode::Full => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "poll",
                "path": path,
                "status": status,
                "body": body,
            }),
            MessageLogMode::Diffed => match self.previous_polls.get(path) {
                None => json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "poll",
                    "path": path,
                    "status": status,
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
                        "dir": "poll",
                        "path": path,
                        "status": status,
                        "changes": change_entries,
                    })
                }
            },
        };
        self.write_line(&entry);

        if let MessageLogMode::Diffed = self.mode {
            self.previous_polls.insert(path.to_string(), body.clone());
        }
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}
