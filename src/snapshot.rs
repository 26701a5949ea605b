//! Durable JSON snapshot store for the per-project analysis result.
//!
//! One document per project, written atomically (temp file + rename). The
//! document is a schema-versioned envelope; date-valued fields serialize as
//! RFC 3339 strings via chrono. Anything unreadable (unknown version, lost
//! fields, truncated file) degrades to "no previous result" with a warning
//! rather than failing the scan.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::model::AnalysisResult;
use crate::traits::{ScanError, SnapshotStore};

/// Bump when the envelope or result schema changes shape incompatibly.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    schema_version: u32,
    saved_at: DateTime<Utc>,
    result: AnalysisResult,
}

/// File-backed [`SnapshotStore`].
#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for JsonSnapshotStore {
    async fn load(&self) -> Result<Option<AnalysisResult>, ScanError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<SnapshotEnvelope>(&raw) {
            Ok(envelope) if envelope.schema_version == SNAPSHOT_SCHEMA_VERSION => {
                debug!(path = %self.path.display(), "loaded snapshot");
                Ok(Some(envelope.result))
            }
            Ok(envelope) => {
                warn!(
                    found = envelope.schema_version,
                    expected = SNAPSHOT_SCHEMA_VERSION,
                    "snapshot schema version unsupported; ignoring stored result"
                );
                Ok(None)
            }
            Err(envelope_err) => {
                // Documents written before the envelope existed are a bare
                // AnalysisResult; migrate them on read.
                match serde_json::from_str::<AnalysisResult>(&raw) {
                    Ok(result) => {
                        info!("migrated legacy snapshot without schema envelope");
                        Ok(Some(result))
                    }
                    Err(_) => {
                        warn!(
                            error = %envelope_err,
                            path = %self.path.display(),
                            "snapshot failed validation; treating project as unscanned"
                        );
                        Ok(None)
                    }
                }
            }
        }
    }

    async fn store(&self, result: &AnalysisResult) -> Result<(), ScanError> {
        let envelope = SnapshotEnvelope {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            saved_at: Utc::now(),
            result: result.clone(),
        };
        let body = serde_json::to_vec_pretty(&envelope)
            .map_err(|e| ScanError::SnapshotCorrupt(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write-then-rename so a crash mid-write never corrupts the
        // existing snapshot.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), bytes = body.len(), "snapshot persisted");
        Ok(())
    }
}
