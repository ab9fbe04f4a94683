//! Incremental run state and the content gate.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::atomic::{sha256_hex, write_atomic};
use crate::content::ContentSnapshot;
use crate::error::{Result, SynthesisError};

pub const STATE_VERSION: u32 = 1;
pub const DEFAULT_CONTENT_THRESHOLD: u64 = 2000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCheckpoint {
    pub chars: u64,
    pub sha256: String,
}

/// Integrity fingerprint of the document a run wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    pub sha256: String,
    pub size: u64,
}

impl DocumentFingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        Self {
            sha256: sha256_hex(bytes),
            size: bytes.len() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub signals_total: usize,
    pub signals_ingested: usize,
    pub signals_skipped: usize,
    pub principles: usize,
    pub axioms: usize,
    pub core: usize,
    pub domain: usize,
    pub emerging: usize,
    pub cascade_floor: Option<usize>,
    pub warnings: usize,
    pub content_chars: u64,
}

impl RunMetrics {
    /// Principles per axiom; `None` when no axiom was promoted.
    pub fn compression_ratio(&self) -> Option<f64> {
        (self.axioms > 0).then(|| self.principles as f64 / self.axioms as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub version: u32,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processed_chars: u64,
    #[serde(default)]
    pub checkpoints: BTreeMap<String, SourceCheckpoint>,
    #[serde(default)]
    pub last_metrics: Option<RunMetrics>,
    #[serde(default)]
    pub document: Option<DocumentFingerprint>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            last_run_at: None,
            processed_chars: 0,
            checkpoints: BTreeMap::new(),
            last_metrics: None,
            document: None,
        }
    }
}

impl RunState {
    pub fn pending_chars(&self, current: u64) -> u64 {
        current.saturating_sub(self.processed_chars)
    }
}

/// Content gate: proceed when enough new content accumulated, or when forced.
pub fn should_run_synthesis(current: u64, state: &RunState, threshold: u64, force: bool) -> bool {
    let pending = state.pending_chars(current);
    let proceed = force || pending >= threshold;
    debug!(current, pending, threshold, force, proceed, "content gate");
    proceed
}

/// Everything a completed run leaves behind.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub content: ContentSnapshot,
    pub metrics: RunMetrics,
    pub document: DocumentFingerprint,
    pub completed_at: DateTime<Utc>,
}

/// Produce the next snapshot.  Nothing from `previous` is merged in.
pub fn record_run(previous: &RunState, record: RunRecord) -> RunState {
    info!(
        previous_chars = previous.processed_chars,
        processed_chars = record.content.total_chars,
        axioms = record.metrics.axioms,
        "run recorded"
    );
    RunState {
        version: STATE_VERSION,
        last_run_at: Some(record.completed_at),
        processed_chars: record.content.total_chars,
        checkpoints: record.content.sources,
        last_metrics: Some(record.metrics),
        document: Some(record.document),
    }
}

// ── Persistence ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state.  A missing file is a fresh state; an
    /// unreadable one halts with a consistency error.
    pub async fn load(&self) -> Result<RunState> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(RunState::default()),
            Err(err) => return Err(err.into()),
        };
        let state: RunState = serde_json::from_str(&raw).map_err(|e| self.inconsistent(format!("unparseable state: {e}")))?;
        if state.version > STATE_VERSION {
            return Err(self.inconsistent(format!(
                "state version {} is newer than supported {STATE_VERSION}",
                state.version
            )));
        }
        Ok(state)
    }

    pub async fn save(&self, state: &RunState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.path, &json).await?;
        debug!(path = %self.path.display(), "state saved");
        Ok(())
    }

    /// Check the live document against the fingerprint the last run recorded.
    pub async fn verify_document(&self, state: &RunState, document_path: &Path) -> Result<()> {
        let Some(expected) = &state.document else {
            return Ok(());
        };
        let bytes = match tokio::fs::read(document_path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(document = %document_path.display(), "recorded document is missing");
                return Err(SynthesisError::StateConsistency {
                    path: document_path.to_path_buf(),
                    reason: "document recorded by the last run is missing".to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        let actual = DocumentFingerprint::of(&bytes);
        if actual.size != expected.size {
            return Err(SynthesisError::StateConsistency {
                path: document_path.to_path_buf(),
                reason: format!("document is {} bytes, last run wrote {}", actual.size, expected.size),
            });
        }
        if actual.sha256 != expected.sha256 {
            return Err(SynthesisError::StateConsistency {
                path: document_path.to_path_buf(),
                reason: "document checksum differs from the last run".to_string(),
            });
        }
        Ok(())
    }

    pub async fn load_verified(&self, document_path: &Path) -> Result<RunState> {
        let state = self.load().await?;
        self.verify_document(&state, document_path).await?;
        Ok(state)
    }

    fn inconsistent(&self, reason: String) -> SynthesisError {
        SynthesisError::StateConsistency {
            path: self.path.clone(),
            reason,
        }
    }
}
