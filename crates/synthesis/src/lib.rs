pub mod artifacts;
pub mod atomic;
pub mod audit;
pub mod backup;
pub mod collaborator;
pub mod compressor;
pub mod content;
pub mod document;
pub mod error;
pub mod matcher;
pub mod pipeline;
pub mod principles;
pub mod provenance;
pub mod schema;
pub mod state;

pub use artifacts::ArtifactStore;
pub use audit::{AuditData, AuditStats};
pub use backup::{BackupEntry, BackupManager, BackupReceipt, BackupTarget};
pub use collaborator::{Classification, LanguageModel, NotationGenerator, TextGeneralizer};
pub use compressor::{PromotionPolicy, PromotionResult, PromotionWarning, promote};
pub use error::{Result, SynthesisError};
pub use matcher::{ClassifierKind, SimilarityClassifier, build_classifier, find_best_match};
pub use pipeline::{
    PipelinePaths, PipelineSettings, StatusReport, SynthesisOptions, SynthesisOutcome, SynthesisPipeline,
};
pub use principles::{IngestOutcome, PrincipleStore};
pub use provenance::{ProvenanceChain, ProvenanceIndex, TracePath, build_chain, trace};
pub use schema::{Axiom, AxiomTier, Dimension, NotationFormat, Principle, Signal};
pub use state::{RunMetrics, RunState, StateStore, record_run, should_run_synthesis};
