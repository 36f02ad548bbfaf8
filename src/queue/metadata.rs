//! Run metadata
//!
//! `run.json` records what a run was started with, so that a resumed run
//! copies the same trees with the same tool and knows how many jobs may
//! have been in flight when it stopped.

use crate::error::{QueueError, QueueResult};
use crate::queue::payload::Tool;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted description of a sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Run name
    pub run: String,
    /// Worker count; bounds the resume window
    pub workers: usize,
    /// Copy tool
    pub tool: Tool,
    /// Tool options, `None` for the tool's defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_options: Option<String>,
    /// Absolute source root
    pub source: PathBuf,
    /// Absolute destination root
    pub destination: PathBuf,
    /// Remote shell targets; empty for local execution
    #[serde(default)]
    pub remote_targets: Vec<String>,
    /// Entry limit per partition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<u64>,
    /// Size limit per partition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
    /// When the run was first started
    pub started_at: DateTime<Utc>,
    /// Host the run was started on
    #[serde(default)]
    pub host: String,
}

fn invalid(key: &str, reason: impl Into<String>) -> QueueError {
    QueueError::Metadata {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn required<'a>(map: &'a Map<String, Value>, key: &str) -> QueueResult<&'a Value> {
    map.get(key).ok_or_else(|| invalid(key, "missing"))
}

fn absolute_path(map: &Map<String, Value>, key: &str) -> QueueResult<PathBuf> {
    let value = required(map, key)?
        .as_str()
        .ok_or_else(|| invalid(key, "not a string"))?;
    let path = PathBuf::from(value);
    if !path.is_absolute() {
        return Err(invalid(key, format!("'{}' is not an absolute path", value)));
    }
    Ok(path)
}

fn worker_count(map: &Map<String, Value>) -> QueueResult<usize> {
    let value = required(map, "workers")?;
    let count = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .ok_or_else(|| invalid("workers", format!("'{}' is not a number", value)))?;

    if count == 0 {
        return Err(invalid("workers", "must be greater than 0"));
    }
    usize::try_from(count).map_err(|_| invalid("workers", "out of range"))
}

fn optional_u64(map: &Map<String, Value>, key: &str) -> QueueResult<Option<u64>> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| invalid(key, "not a non-negative integer")),
    }
}

impl RunMetadata {
    /// Path of the metadata file inside a run directory
    pub fn path_in(run_dir: &Path) -> PathBuf {
        run_dir.join("run.json")
    }

    /// Write `run.json` atomically
    pub fn save(&self, run_dir: &Path) -> QueueResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| invalid("run.json", e.to_string()))?;
        let tmp = run_dir.join(".run.json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, Self::path_in(run_dir))?;
        Ok(())
    }

    /// Read and validate `run.json`
    ///
    /// Every key is checked on its own so the error names the offending one.
    pub fn load(run_dir: &Path) -> QueueResult<Self> {
        let path = Self::path_in(run_dir);
        let text = fs::read_to_string(&path).map_err(|e| {
            invalid("run.json", format!("cannot read '{}': {}", path.display(), e))
        })?;
        let value: Value =
            serde_json::from_str(&text).map_err(|e| invalid("run.json", e.to_string()))?;
        let map = value
            .as_object()
            .ok_or_else(|| invalid("run.json", "not a JSON object"))?;

        let tool_name = required(map, "tool")?
            .as_str()
            .ok_or_else(|| invalid("tool", "not a string"))?;
        let tool = tool_name
            .parse::<Tool>()
            .map_err(|e| invalid("tool", e.to_string()))?;

        let remote_targets = match map.get("remote_targets") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid("remote_targets", "not a list of strings"))
                })
                .collect::<QueueResult<Vec<_>>>()?,
            Some(_) => return Err(invalid("remote_targets", "not a list")),
        };

        let started_at = match map.get("started_at").and_then(Value::as_str) {
            Some(s) => DateTime::parse_from_rfc3339(s)
                .map_err(|e| invalid("started_at", e.to_string()))?
                .with_timezone(&Utc),
            None => Utc::now(),
        };

        Ok(Self {
            run: map
                .get("run")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    run_dir
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default()
                }),
            workers: worker_count(map)?,
            tool,
            tool_options: map
                .get("tool_options")
                .and_then(Value::as_str)
                .map(str::to_string),
            source: absolute_path(map, "source")?,
            destination: absolute_path(map, "destination")?,
            remote_targets,
            max_entries: optional_u64(map, "max_entries")?,
            max_size: optional_u64(map, "max_size")?,
            started_at,
            host: map
                .get("host")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> RunMetadata {
        RunMetadata {
            run: "r1".into(),
            workers: 3,
            tool: Tool::Tar,
            tool_options: None,
            source: PathBuf::from("/src"),
            destination: PathBuf::from("/dst"),
            remote_targets: vec!["user@host1".into()],
            max_entries: Some(2000),
            max_size: None,
            started_at: Utc::now(),
            host: "builder".into(),
        }
    }

    fn write_raw(dir: &Path, json: &str) {
        fs::write(dir.join("run.json"), json).unwrap();
    }

    fn key_of(err: QueueError) -> String {
        match err {
            QueueError::Metadata { key, .. } => key,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let meta = sample();
        meta.save(dir.path()).unwrap();
        let loaded = RunMetadata::load(dir.path()).unwrap();
        assert_eq!(loaded, meta);
        assert!(!dir.path().join(".run.json.tmp").exists());
    }

    #[test]
    fn test_workers_as_string() {
        let dir = tempdir().unwrap();
        write_raw(
            dir.path(),
            r#"{"workers": "4", "tool": "rsync", "source": "/a", "destination": "/b"}"#,
        );
        let loaded = RunMetadata::load(dir.path()).unwrap();
        assert_eq!(loaded.workers, 4);
        assert!(loaded.remote_targets.is_empty());
    }

    #[test]
    fn test_invalid_keys_are_named() {
        let dir = tempdir().unwrap();

        write_raw(dir.path(), r#"{"tool": "rsync", "source": "/a", "destination": "/b"}"#);
        assert_eq!(key_of(RunMetadata::load(dir.path()).unwrap_err()), "workers");

        write_raw(
            dir.path(),
            r#"{"workers": 0, "tool": "rsync", "source": "/a", "destination": "/b"}"#,
        );
        assert_eq!(key_of(RunMetadata::load(dir.path()).unwrap_err()), "workers");

        write_raw(
            dir.path(),
            r#"{"workers": "many", "tool": "rsync", "source": "/a", "destination": "/b"}"#,
        );
        assert_eq!(key_of(RunMetadata::load(dir.path()).unwrap_err()), "workers");

        write_raw(
            dir.path(),
            r#"{"workers": 2, "tool": "scp", "source": "/a", "destination": "/b"}"#,
        );
        assert_eq!(key_of(RunMetadata::load(dir.path()).unwrap_err()), "tool");

        write_raw(
            dir.path(),
            r#"{"workers": 2, "tool": "cpio", "source": "rel/path", "destination": "/b"}"#,
        );
        assert_eq!(key_of(RunMetadata::load(dir.path()).unwrap_err()), "source");
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        assert_eq!(key_of(RunMetadata::load(dir.path()).unwrap_err()), "run.json");
    }
}
