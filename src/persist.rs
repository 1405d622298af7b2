// src/persist.rs
// Crash-recovery snapshots. The last usable state is written out each
// cycle; on startup a fresh enough snapshot restores context instead of
// starting cold.

use crate::config::PersistConfig;
use crate::types::PartialState;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDocument {
    schema_version: u32,
    saved_at: DateTime<Utc>,
    state: PartialState,
}

pub struct SnapshotStore {
    cfg: PersistConfig,
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(cfg: PersistConfig, path: impl Into<PathBuf>) -> Self {
        Self {
            cfg,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize the state with a timestamp and schema version. Written
    /// via a sibling temp file and rename so a crash mid-write never
    /// leaves a torn snapshot.
    pub fn save(&self, state: &PartialState) -> Result<()> {
        let document = SnapshotDocument {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            state: state.clone(),
        };
        let json = serde_json::to_string_pretty(&document)
            .context("serializing state snapshot")?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating snapshot dir {:?}", parent))?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).with_context(|| format!("writing {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {:?}", self.path))?;
        debug!(path = ?self.path, frame = state.frame_no, "snapshot saved");
        Ok(())
    }

    /// Load the snapshot if it exists, parses, matches the current
    /// schema and is not stale. Anything else yields `None`; a corrupt
    /// or obsolete snapshot is no worse than a cold start.
    pub fn load(&self) -> Result<Option<PartialState>> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {:?}", self.path))
            }
        };
        let document: SnapshotDocument = match serde_json::from_str(&json) {
            Ok(doc) => doc,
            Err(err) => {
                debug!(error = %err, "snapshot unparseable, starting cold");
                return Ok(None);
            }
        };
        if document.schema_version != SCHEMA_VERSION {
            debug!(
                found = document.schema_version,
                expected = SCHEMA_VERSION,
                "snapshot schema mismatch, starting cold"
            );
            return Ok(None);
        }
        let age = Utc::now().signed_duration_since(document.saved_at);
        if age.to_std().map(|a| a > self.cfg.staleness).unwrap_or(true) {
            debug!(?age, "snapshot stale, starting cold");
            return Ok(None);
        }
        info!(frame = document.state.frame_no, "snapshot restored");
        Ok(Some(document.state))
    }

    pub fn discard(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("removing {:?}", self.path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldId, FieldValue};
    use std::time::Duration;
    use tempfile::tempdir;

    fn sample_state() -> PartialState {
        let mut state = PartialState::default();
        state.frame_no = 42;
        state.insert(FieldId::Pot, FieldValue::Number(120.0), 0.9);
        state
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(
            PersistConfig::default(),
            dir.path().join("snapshot.json"),
        );
        store.save(&sample_state()).unwrap();

        let restored = store.load().unwrap().expect("fresh snapshot restores");
        assert_eq!(restored.frame_no, 42);
        assert_eq!(restored.number(&FieldId::Pot), Some(120.0));
    }

    #[test]
    fn test_missing_snapshot_is_cold_start() {
        let dir = tempdir().unwrap();
        let store =
            SnapshotStore::new(PersistConfig::default(), dir.path().join("none.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_stale_snapshot_discarded() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(
            PersistConfig {
                staleness: Duration::from_secs(0),
            },
            dir.path().join("snapshot.json"),
        );
        store.save(&sample_state()).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_snapshot_is_cold_start() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        fs::write(&path, "{not json").unwrap();
        let store = SnapshotStore::new(PersistConfig::default(), path);
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_schema_mismatch_is_cold_start() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let store = SnapshotStore::new(PersistConfig::default(), path.clone());
        store.save(&sample_state()).unwrap();

        let mut doc: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        doc["schema_version"] = serde_json::json!(999);
        fs::write(&path, doc.to_string()).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_discard_removes_file() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(
            PersistConfig::default(),
            dir.path().join("snapshot.json"),
        );
        store.save(&sample_state()).unwrap();
        store.discard().unwrap();
        assert!(store.load().unwrap().is_none());
        // Idempotent.
        store.discard().unwrap();
    }
}
