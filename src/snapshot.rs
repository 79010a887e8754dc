//! Static JSON snapshots used when neither live nor cached data is available

use crate::endpoints::LogicalEndpoint;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Read-only directory of snapshot documents
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        SnapshotStore {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load the snapshot payload of an endpoint
    ///
    /// Documents of the form `{ "data": ... }` yield their `data` field.
    /// Returns `None` when the endpoint has no snapshot or the file is missing or invalid.
    pub async fn load(&self, endpoint: LogicalEndpoint) -> Option<Value> {
        let file_name = endpoint.snapshot_file()?;
        let path = self.dir.join(file_name);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                debug!("No snapshot for {} at {:?}: {}", endpoint, path, e);
                return None;
            }
        };

        let document: Value = match serde_json::from_str(&content) {
            Ok(document) => document,
            Err(e) => {
                error!("Snapshot {:?} is not valid JSON: {}", path, e);
                return None;
            }
        };

        info!("Using snapshot {} for {}", file_name, endpoint);
        Some(unwrap_data(document))
    }
}

fn unwrap_data(document: Value) -> Value {
    match document {
        Value::Object(mut map) => match map.remove("data") {
            Some(data) if !data.is_null() => data,
            Some(data) => {
                map.insert("data".to_string(), data);
                Value::Object(map)
            }
            None => Value::Object(map),
        },
        other => other,
    }
}
