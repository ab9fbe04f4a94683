//! Timestamped document snapshots and rollback.
//!
//! Every write of the live document goes through [`BackupManager::write_document`],
//! which consumes a [`BackupReceipt`].  Receipts can only be minted by
//! [`BackupManager::backup`], so a document write without a committed snapshot
//! does not type-check.
//!
//! A backup directory holds the document snapshot plus an `artifacts/`
//! subdirectory with the data files that described that document, so a
//! rollback restores the document and its audit trail together.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::atomic::write_atomic;
use crate::error::{Result, SynthesisError};
use crate::state::DocumentFingerprint;

/// ISO-8601 basic date with `-` in place of `:` in the time part, since
/// colons are not legal in Windows file names.  Still sorts lexicographically.
const ID_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3fZ";
const ARTIFACTS_DIR: &str = "artifacts";
const DEFAULT_DOCUMENT_NAME: &str = "SOUL.md";

/// Proof that the live document was snapshotted.  Single use.
#[derive(Debug)]
pub struct BackupReceipt {
    id: String,
    document_path: PathBuf,
    snapshot_path: PathBuf,
}

impl BackupReceipt {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupEntry {
    pub id: String,
    pub path: PathBuf,
    pub size: u64,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupTarget {
    Latest,
    Id(String),
}

impl BackupTarget {
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg.map(str::trim) {
            None | Some("") | Some("latest") => Self::Latest,
            Some(id) => Self::Id(id.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WrittenDocument {
    pub path: PathBuf,
    pub backup_id: String,
    pub fingerprint: DocumentFingerprint,
}

#[derive(Debug, Clone)]
pub struct Restored {
    pub entry: BackupEntry,
    pub content: Vec<u8>,
    pub fingerprint: DocumentFingerprint,
    /// Artifact files put back (or removed, when absent from the snapshot).
    pub artifacts: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct BackupManager {
    root: PathBuf,
}

impl BackupManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Snapshot `document_path` and the `artifacts` that describe it.  A
    /// missing document is recorded as empty content; a missing artifact is
    /// recorded by its absence.
    #[instrument(skip(self, artifacts), fields(document = %document_path.display()))]
    pub async fn backup(&self, document_path: &Path, artifacts: &[PathBuf]) -> Result<BackupReceipt> {
        let content = match tokio::fs::read(document_path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        tokio::fs::create_dir_all(&self.root).await?;
        let (id, dir) = self.claim_slot(Utc::now()).await?;
        let snapshot_path = dir.join(document_name(document_path));
        let artifact_dir = dir.join(ARTIFACTS_DIR);
        tokio::fs::create_dir_all(&artifact_dir).await?;
        for path in artifacts {
            match tokio::fs::read(path).await {
                Ok(bytes) => write_atomic(&artifact_dir.join(artifact_name(path)?), &bytes).await?,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        // Document last: `entry_in` treats a backup without it as incomplete.
        write_atomic(&snapshot_path, &content).await?;

        info!(backup_id = %id, bytes = content.len(), artifacts = artifacts.len(), "backup committed");
        Ok(BackupReceipt {
            id,
            document_path: document_path.to_path_buf(),
            snapshot_path,
        })
    }

    /// Create a fresh backup directory, bumping the id by a millisecond on
    /// collision so ids stay unique and sortable.
    async fn claim_slot(&self, mut at: DateTime<Utc>) -> Result<(String, PathBuf)> {
        loop {
            let id = at.format(ID_FORMAT).to_string();
            let dir = self.root.join(&id);
            match tokio::fs::create_dir(&dir).await {
                Ok(()) => return Ok((id, dir)),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!(backup_id = %id, "backup id taken; bumping");
                    at += Duration::milliseconds(1);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Replace the live document.  Consumes the receipt of the backup taken
    /// for this write.
    pub async fn write_document(&self, receipt: BackupReceipt, content: &[u8]) -> Result<WrittenDocument> {
        write_atomic(&receipt.document_path, content).await?;
        info!(
            document = %receipt.document_path.display(),
            backup_id = %receipt.id,
            bytes = content.len(),
            "document written"
        );
        Ok(WrittenDocument {
            path: receipt.document_path,
            backup_id: receipt.id,
            fingerprint: DocumentFingerprint::of(content),
        })
    }

    /// All backups, newest first.
    pub async fn list(&self) -> Result<Vec<BackupEntry>> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(err) => return Err(err.into()),
        };
        while let Some(item) = dir.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            let id = item.file_name().to_string_lossy().to_string();
            let Some(created_at) = parse_id(&id) else {
                continue;
            };
            if let Some(entry) = self.entry_in(&id, &item.path(), Some(created_at)).await? {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(entries)
    }

    async fn entry_in(&self, id: &str, dir: &Path, created_at: Option<DateTime<Utc>>) -> Result<Option<BackupEntry>> {
        let mut files = tokio::fs::read_dir(dir).await?;
        while let Some(file) = files.next_entry().await? {
            let name = file.file_name().to_string_lossy().to_string();
            if name.ends_with(".tmp") || !file.file_type().await?.is_file() {
                continue;
            }
            let size = file.metadata().await?.len();
            return Ok(Some(BackupEntry {
                id: id.to_string(),
                path: file.path(),
                size,
                created_at,
            }));
        }
        Ok(None)
    }

    pub async fn resolve(&self, target: &BackupTarget) -> Result<BackupEntry> {
        match target {
            BackupTarget::Latest => self
                .list()
                .await?
                .into_iter()
                .next()
                .ok_or(SynthesisError::EmptyHistory),
            BackupTarget::Id(id) => {
                if id.contains(['/', '\\']) || id.contains("..") {
                    return Err(SynthesisError::InvalidInput(format!("malformed backup id '{id}'")));
                }
                let dir = self.root.join(id);
                if !dir.is_dir() {
                    return Err(SynthesisError::NotFound(format!("backup '{id}'")));
                }
                self.entry_in(id, &dir, parse_id(id))
                    .await?
                    .ok_or_else(|| SynthesisError::NotFound(format!("backup '{id}' has no snapshot")))
            }
        }
    }

    /// Restore a snapshot over the live document and its artifacts.
    /// Artifacts go first; the document write completes the rollback.
    #[instrument(skip(self, artifacts), fields(document = %document_path.display()))]
    pub async fn rollback(&self, target: &BackupTarget, document_path: &Path, artifacts: &[PathBuf]) -> Result<Restored> {
        let entry = self.resolve(target).await?;
        let content = tokio::fs::read(&entry.path).await?;

        let artifact_dir = self.root.join(&entry.id).join(ARTIFACTS_DIR);
        let mut restored_artifacts = Vec::new();
        if artifact_dir.is_dir() {
            for path in artifacts {
                match tokio::fs::read(artifact_dir.join(artifact_name(path)?)).await {
                    Ok(bytes) => write_atomic(path, &bytes).await?,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => match tokio::fs::remove_file(path).await {
                        Ok(()) => {}
                        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                        Err(err) => return Err(err.into()),
                    },
                    Err(err) => return Err(err.into()),
                }
                restored_artifacts.push(path.clone());
            }
        } else if !artifacts.is_empty() {
            warn!(backup_id = %entry.id, "backup has no artifact snapshot; artifacts left as they are");
        }

        write_atomic(document_path, &content).await?;
        info!(
            backup_id = %entry.id,
            bytes = content.len(),
            artifacts = restored_artifacts.len(),
            "document restored"
        );
        let fingerprint = DocumentFingerprint::of(&content);
        Ok(Restored {
            entry,
            content,
            fingerprint,
            artifacts: restored_artifacts,
        })
    }
}

fn document_name(document_path: &Path) -> String {
    document_path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| DEFAULT_DOCUMENT_NAME.to_string())
}

fn artifact_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|f| f.to_string_lossy().to_string())
        .ok_or_else(|| SynthesisError::InvalidInput(format!("artifact path {} has no file name", path.display())))
}

fn parse_id(id: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(id, ID_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
