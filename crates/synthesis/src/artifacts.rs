//! JSON artifacts in the data directory.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{instrument, warn};

use crate::atomic::write_atomic;
use crate::audit::AuditData;
use crate::backup::{BackupManager, BackupTarget, Restored};
use crate::error::{Result, SynthesisError};
use crate::provenance::ProvenanceChain;
use crate::schema::{Axiom, Principle, Signal};
use crate::state::{RunState, StateStore};

pub const SIGNALS_FILE: &str = "signals.json";
pub const PRINCIPLES_FILE: &str = "principles.json";
pub const AXIOMS_FILE: &str = "axioms.json";
pub const PROVENANCE_FILE: &str = "provenance.json";
pub const STATE_FILE: &str = "state.json";
pub const BACKUPS_DIR: &str = "backups";

/// Files written alongside the document and snapshotted with it.
pub const VERSIONED_FILES: [&str; 3] = [PRINCIPLES_FILE, AXIOMS_FILE, PROVENANCE_FILE];

/// Layout of the data directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    pub fn state(&self) -> StateStore {
        StateStore::new(self.path(STATE_FILE))
    }

    pub fn backups(&self) -> BackupManager {
        BackupManager::new(self.path(BACKUPS_DIR))
    }

    pub fn versioned_paths(&self) -> Vec<PathBuf> {
        VERSIONED_FILES.iter().map(|file| self.path(file)).collect()
    }

    pub async fn load_signals(&self) -> Result<Vec<Signal>> {
        self.load(SIGNALS_FILE).await
    }

    pub async fn load_principles(&self) -> Result<Vec<Principle>> {
        self.load(PRINCIPLES_FILE).await
    }

    pub async fn load_axioms(&self) -> Result<Vec<Axiom>> {
        self.load(AXIOMS_FILE).await
    }

    pub async fn load_provenance(&self) -> Result<Vec<ProvenanceChain>> {
        self.load(PROVENANCE_FILE).await
    }

    pub async fn save_principles(&self, principles: &[Principle]) -> Result<()> {
        self.save(PRINCIPLES_FILE, principles).await
    }

    pub async fn save_axioms(&self, axioms: &[Axiom]) -> Result<()> {
        self.save(AXIOMS_FILE, axioms).await
    }

    pub async fn save_provenance(&self, chains: &[ProvenanceChain]) -> Result<()> {
        self.save(PROVENANCE_FILE, chains).await
    }

    /// Everything audit and trace read.  Needs no classifier.
    pub async fn audit_data(&self) -> Result<AuditData> {
        Ok(AuditData {
            axioms: self.load_axioms().await?,
            principles: self.load_principles().await?,
            signals: self.load_signals().await?,
            recorded: self.load_provenance().await?,
        })
    }

    /// Restore a backup's document and versioned artifacts, then
    /// re-fingerprint the run state to the restored document so the next
    /// run's integrity check passes.  Reads nothing but the backup and the
    /// state file.
    #[instrument(skip(self), fields(document = %document_path.display()))]
    pub async fn rollback(&self, target: &BackupTarget, document_path: &Path) -> Result<Restored> {
        let restored = self
            .backups()
            .rollback(target, document_path, &self.versioned_paths())
            .await?;

        let state_store = self.state();
        let mut state = match state_store.load().await {
            Ok(state) => state,
            Err(SynthesisError::StateConsistency { reason, .. }) => {
                warn!(%reason, "state unreadable; starting from a fresh state");
                RunState::default()
            }
            Err(err) => return Err(err),
        };
        state.document = Some(restored.fingerprint.clone());
        state_store.save(&state).await?;
        Ok(restored)
    }

    /// Missing file reads as an empty sequence; malformed JSON is a
    /// validation error naming the file.
    async fn load<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>> {
        let path = self.path(file);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw)
            .map_err(|e| SynthesisError::InvalidInput(format!("{}: {e}", path.display())))
    }

    async fn save<T: Serialize>(&self, file: &str, items: &[T]) -> Result<()> {
        let json = serde_json::to_vec_pretty(items)?;
        write_atomic(&self.path(file), &json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principles::tests::signal;
    use crate::schema::Dimension;

    #[tokio::test]
    async fn missing_artifacts_read_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(store.load_signals().await.unwrap().is_empty());
        assert!(store.load_axioms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_signals_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SIGNALS_FILE), "[{\"id\": 1}]").unwrap();
        let err = ArtifactStore::new(dir.path()).load_signals().await.unwrap_err();
        assert!(matches!(err, SynthesisError::InvalidInput(ref m) if m.contains(SIGNALS_FILE)));
    }

    #[tokio::test]
    async fn signals_written_by_extractor_are_readable() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let signals = vec![signal("s1", "be direct", Dimension::VoicePresence, "a.md", None)];
        store.save(SIGNALS_FILE, &signals).await.unwrap();
        assert_eq!(store.load_signals().await.unwrap(), signals);
    }

    #[tokio::test]
    async fn rollback_ignores_malformed_signals() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join(".soul"));
        let doc = dir.path().join("SOUL.md");
        std::fs::write(&doc, "known good").unwrap();

        let receipt = store.backups().backup(&doc, &store.versioned_paths()).await.unwrap();
        store.backups().write_document(receipt, b"bad").await.unwrap();
        std::fs::write(store.path(SIGNALS_FILE), "[{\"id\": 1}]").unwrap();

        let restored = store.rollback(&BackupTarget::Latest, &doc).await.unwrap();
        assert_eq!(std::fs::read_to_string(&doc).unwrap(), "known good");
        let state = store.state().load().await.unwrap();
        assert_eq!(state.document, Some(restored.fingerprint));
        store.state().verify_document(&state, &doc).await.unwrap();
    }
}
