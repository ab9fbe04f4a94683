//! End-to-end synthesis run: gate → fold → promote → provenance → backup →
//! write → record.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::artifacts::ArtifactStore;
use crate::audit::AuditData;
use crate::backup::{BackupEntry, BackupTarget, Restored};
use crate::collaborator::{GlyphNotation, KeepOriginal, NotationGenerator, TextGeneralizer, with_timeout};
use crate::compressor::{PromotionPolicy, PromotionWarning, promote};
use crate::content::{ContentSnapshot, scan_memory};
use crate::document::{DocumentInput, format_diff, line_diff, render};
use crate::error::{Result, SynthesisError};
use crate::matcher::{DEFAULT_SIMILARITY_THRESHOLD, LexicalClassifier, SimilarityClassifier};
use crate::principles::{IngestOutcome, PrincipleStore};
use crate::provenance::{ProvenanceIndex, build_chain};
use crate::schema::{Axiom, AxiomTier, NotationFormat, Signal};
use crate::state::{DEFAULT_CONTENT_THRESHOLD, RunMetrics, RunRecord, RunState, record_run, should_run_synthesis};

#[derive(Debug, Clone)]
pub struct PipelinePaths {
    pub data_dir: PathBuf,
    pub memory_dir: PathBuf,
    pub document_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub similarity_threshold: f32,
    pub content_threshold: u64,
    pub collaborator_timeout_secs: u64,
    pub policy: PromotionPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            content_threshold: DEFAULT_CONTENT_THRESHOLD,
            collaborator_timeout_secs: 30,
            policy: PromotionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SynthesisOptions {
    /// Bypass the content gate.  The backup still happens.
    pub force: bool,
    /// Stop before the backup/write sequence.
    pub dry_run: bool,
    pub format: Option<NotationFormat>,
    pub diff: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedSignal {
    pub signal_id: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub metrics: RunMetrics,
    pub axioms: Vec<Axiom>,
    pub warnings: Vec<PromotionWarning>,
    pub skipped: Vec<SkippedSignal>,
    pub document: String,
    pub diff: Option<String>,
}

#[derive(Debug, Clone)]
pub enum SynthesisOutcome {
    Skipped { pending_chars: u64, threshold: u64 },
    DryRun(RunReport),
    Written { report: RunReport, backup_id: String, document_path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub state: RunState,
    pub content: ContentSnapshot,
    pub pending_chars: u64,
    pub threshold: u64,
    pub would_run: bool,
    pub changed_sources: Vec<String>,
    /// Why the live document fails its integrity check, if it does.
    pub document_problem: Option<String>,
    pub backups: Vec<BackupEntry>,
}

pub struct SynthesisPipeline {
    paths: PipelinePaths,
    artifacts: ArtifactStore,
    settings: PipelineSettings,
    classifier: Arc<dyn SimilarityClassifier>,
    generalizer: Arc<dyn TextGeneralizer>,
    notation: Arc<dyn NotationGenerator>,
    cancel: Arc<AtomicBool>,
}

impl SynthesisPipeline {
    pub fn new(paths: PipelinePaths, settings: PipelineSettings, classifier: Arc<dyn SimilarityClassifier>) -> Self {
        Self {
            artifacts: ArtifactStore::new(&paths.data_dir),
            paths,
            settings,
            classifier,
            generalizer: Arc::new(KeepOriginal),
            notation: Arc::new(GlyphNotation),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_generalizer(mut self, generalizer: Arc<dyn TextGeneralizer>) -> Self {
        self.generalizer = generalizer;
        self
    }

    pub fn with_notation(mut self, notation: Arc<dyn NotationGenerator>) -> Self {
        self.notation = notation;
        self
    }

    /// Setting the flag aborts a run that has not yet committed its backup.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn document_path(&self) -> &Path {
        &self.paths.document_path
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            warn!("synthesis cancelled");
            return Err(SynthesisError::Cancelled);
        }
        Ok(())
    }

    #[instrument(skip(self, options), fields(force = options.force, dry_run = options.dry_run))]
    pub async fn run(&self, options: &SynthesisOptions) -> Result<SynthesisOutcome> {
        let state_store = self.artifacts.state();
        let state = state_store.load_verified(&self.paths.document_path).await?;

        let content = scan_memory(&self.paths.memory_dir)?;
        let threshold = self.settings.content_threshold;
        if !should_run_synthesis(content.total_chars, &state, threshold, options.force) {
            let pending_chars = state.pending_chars(content.total_chars);
            info!(pending_chars, threshold, "below content threshold; skipping");
            return Ok(SynthesisOutcome::Skipped { pending_chars, threshold });
        }

        // ── Fold signals ────────────────────────────────────────────────────
        let signals = self.artifacts.load_signals().await?;
        let mut store = PrincipleStore::new(self.classifier_for(&signals), self.settings.similarity_threshold)?
            .with_generalizer(Arc::clone(&self.generalizer));
        store.restore(self.artifacts.load_principles().await?)?;

        let mut ingested = 0;
        let mut skipped = Vec::new();
        for signal in &signals {
            self.check_cancelled()?;
            if store.contains_signal(&signal.id) {
                continue;
            }
            match self.ingest_with_retry(&mut store, signal).await {
                Ok(outcome) => {
                    if !outcome.duplicate {
                        ingested += 1;
                    }
                }
                Err(err) if err.is_transient() => {
                    warn!(signal_id = %signal.id, error = %err, "signal skipped after retry");
                    skipped.push(SkippedSignal {
                        signal_id: signal.id.clone(),
                        reason: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
        info!(signals = signals.len(), ingested, skipped = skipped.len(), principles = store.len(), "signals folded");

        // ── Promote ─────────────────────────────────────────────────────────
        let mut policy = self.settings.policy.clone();
        if let Some(format) = options.format {
            policy.notation = format;
        }
        policy.notation_timeout_secs = self.settings.collaborator_timeout_secs;
        let promotion = promote(store.all(), &policy, self.notation.as_ref()).await?;
        let axioms = promotion.axioms;

        let index = ProvenanceIndex::new(store.all(), &signals);
        let chains: Vec<_> = axioms.iter().map(|a| build_chain(a, &index)).collect();
        for chain in chains.iter().filter(|c| !c.is_intact()) {
            warn!(axiom = %chain.axiom_id, broken = chain.broken_links.len(), "provenance has broken links");
        }

        let tier_count = |tier: AxiomTier| axioms.iter().filter(|a| a.tier == tier).count();
        let metrics = RunMetrics {
            signals_total: signals.len(),
            signals_ingested: ingested,
            signals_skipped: skipped.len(),
            principles: store.len(),
            axioms: axioms.len(),
            core: tier_count(AxiomTier::Core),
            domain: tier_count(AxiomTier::Domain),
            emerging: tier_count(AxiomTier::Emerging),
            cascade_floor: promotion.cascade_floor,
            warnings: promotion.warnings.len(),
            content_chars: content.total_chars,
        };

        let document = render(&DocumentInput {
            axioms: &axioms,
            chains: &chains,
            metrics: &metrics,
            format: policy.notation,
            generated_at: Utc::now(),
        });

        let diff = if options.diff {
            let previous = match tokio::fs::read_to_string(&self.paths.document_path).await {
                Ok(text) => text,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(err) => return Err(err.into()),
            };
            Some(format_diff(&line_diff(&previous, &document)))
        } else {
            None
        };

        let report = RunReport {
            metrics,
            axioms,
            warnings: promotion.warnings,
            skipped,
            document,
            diff,
        };

        if options.dry_run {
            info!(axioms = report.axioms.len(), "dry run; nothing written");
            return Ok(SynthesisOutcome::DryRun(report));
        }

        // ── Commit: backup → document → artifacts → state ──────────────────
        self.check_cancelled()?;
        let backups = self.artifacts.backups();
        let receipt = backups
            .backup(&self.paths.document_path, &self.artifacts.versioned_paths())
            .await?;
        let written = backups.write_document(receipt, report.document.as_bytes()).await?;

        self.artifacts.save_principles(store.all()).await?;
        self.artifacts.save_axioms(&report.axioms).await?;
        self.artifacts.save_provenance(&chains).await?;

        let next = record_run(
            &state,
            RunRecord {
                content,
                metrics: report.metrics.clone(),
                document: written.fingerprint,
                completed_at: Utc::now(),
            },
        );
        state_store.save(&next).await?;

        info!(backup_id = %written.backup_id, axioms = report.axioms.len(), "synthesis complete");
        Ok(SynthesisOutcome::Written {
            report,
            backup_id: written.backup_id,
            document_path: written.path,
        })
    }

    /// The configured classifier, or lexical similarity when it needs vectors
    /// that some signal lacks.
    fn classifier_for(&self, signals: &[Signal]) -> Arc<dyn SimilarityClassifier> {
        if self.classifier.requires_vectors() && signals.iter().any(|s| s.embedding.is_none()) {
            warn!("some signals carry no vector; using lexical similarity");
            return Arc::new(LexicalClassifier);
        }
        Arc::clone(&self.classifier)
    }

    /// Ingest under the collaborator timeout; a transient failure is retried
    /// once.  A timed-out attempt leaves the store untouched.
    async fn ingest_with_retry(&self, store: &mut PrincipleStore, signal: &Signal) -> Result<IngestOutcome> {
        let secs = self.settings.collaborator_timeout_secs;
        match with_timeout(secs, store.ingest(signal)).await {
            Err(err) if err.is_transient() => {
                debug!(signal_id = %signal.id, error = %err, "ingest failed; retrying once");
                with_timeout(secs, store.ingest(signal)).await
            }
            other => other,
        }
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let state = self.artifacts.state().load().await?;
        let document_problem = match self
            .artifacts
            .state()
            .verify_document(&state, &self.paths.document_path)
            .await
        {
            Ok(()) => None,
            Err(SynthesisError::StateConsistency { reason, .. }) => Some(reason),
            Err(err) => return Err(err),
        };
        let content = scan_memory(&self.paths.memory_dir)?;
        let threshold = self.settings.content_threshold;
        let changed_sources = content
            .changed_since(&state.checkpoints)
            .map(str::to_string)
            .collect();
        Ok(StatusReport {
            pending_chars: state.pending_chars(content.total_chars),
            would_run: should_run_synthesis(content.total_chars, &state, threshold, false),
            threshold,
            changed_sources,
            document_problem,
            backups: self.artifacts.backups().list().await?,
            content,
            state,
        })
    }

    pub async fn rollback(&self, target: &BackupTarget) -> Result<Restored> {
        self.artifacts.rollback(target, &self.paths.document_path).await
    }

    pub async fn audit_data(&self) -> Result<AuditData> {
        self.artifacts.audit_data().await
    }
}
