//! Provenance: axiom → principles → signals → source locations.
//!
//! The chain is a strict DAG held in id-keyed maps; nothing points back up
//! the tree.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SynthesisError};
use crate::schema::{Axiom, AxiomTier, Principle, Signal};

/// Id-keyed lookup tables over persisted principles and signals.
#[derive(Debug, Default)]
pub struct ProvenanceIndex<'a> {
    principles: HashMap<&'a str, &'a Principle>,
    signals: HashMap<&'a str, &'a Signal>,
}

impl<'a> ProvenanceIndex<'a> {
    pub fn new(principles: &'a [Principle], signals: &'a [Signal]) -> Self {
        Self {
            principles: principles.iter().map(|p| (p.id.as_str(), p)).collect(),
            signals: signals.iter().map(|s| (s.id.as_str(), s)).collect(),
        }
    }

    pub fn principle(&self, id: &str) -> Option<&'a Principle> {
        self.principles.get(id).copied()
    }

    pub fn signal(&self, id: &str) -> Option<&'a Signal> {
        self.signals.get(id).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub signal_id: String,
    pub file: String,
    pub line: u32,
    pub extracted_at: DateTime<Utc>,
    pub text: String,
}

impl SourceLocation {
    fn from_signal(signal: &Signal) -> Self {
        Self {
            signal_id: signal.id.clone(),
            file: signal.source.file.clone(),
            line: signal.source.line,
            extracted_at: signal.source.extracted_at,
            text: signal.text.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Principle,
    Signal,
}

/// A reference that no longer resolves.  Surfaced, never dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenLink {
    pub kind: LinkKind,
    pub missing_id: String,
    pub referenced_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipleNode {
    pub principle_id: String,
    pub text: String,
    pub n_count: usize,
    pub sources: Vec<SourceLocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceChain {
    pub axiom_id: String,
    pub axiom_text: String,
    pub tier: AxiomTier,
    pub principles: Vec<PrincipleNode>,
    pub broken_links: Vec<BrokenLink>,
}

impl ProvenanceChain {
    pub fn source_locations(&self) -> impl Iterator<Item = &SourceLocation> {
        self.principles.iter().flat_map(|p| p.sources.iter())
    }

    pub fn signal_count(&self) -> usize {
        self.principles.iter().map(|p| p.sources.len()).sum()
    }

    pub fn distinct_files(&self) -> BTreeSet<&str> {
        self.source_locations().map(|s| s.file.as_str()).collect()
    }

    pub fn is_intact(&self) -> bool {
        self.broken_links.is_empty()
    }
}

/// Reconstruct the full provenance tree for `axiom`.
pub fn build_chain(axiom: &Axiom, index: &ProvenanceIndex<'_>) -> ProvenanceChain {
    let mut principles = Vec::with_capacity(axiom.derivation.principle_ids.len());
    let mut broken_links = Vec::new();

    for principle_id in &axiom.derivation.principle_ids {
        let Some(principle) = index.principle(principle_id) else {
            broken_links.push(BrokenLink {
                kind: LinkKind::Principle,
                missing_id: principle_id.clone(),
                referenced_by: axiom.id.clone(),
            });
            continue;
        };

        let mut sources = Vec::with_capacity(principle.signal_ids.len());
        for signal_id in &principle.signal_ids {
            match index.signal(signal_id) {
                Some(signal) => sources.push(SourceLocation::from_signal(signal)),
                None => broken_links.push(BrokenLink {
                    kind: LinkKind::Signal,
                    missing_id: signal_id.clone(),
                    referenced_by: principle.id.clone(),
                }),
            }
        }

        principles.push(PrincipleNode {
            principle_id: principle.id.clone(),
            text: principle.text.clone(),
            n_count: principle.n_count,
            sources,
        });
    }

    ProvenanceChain {
        axiom_id: axiom.id.clone(),
        axiom_text: axiom.text.clone(),
        tier: axiom.tier,
        principles,
        broken_links,
    }
}

/// Find an axiom by id, short id, or canonical symbol.
pub fn resolve_axiom<'a>(axioms: &'a [Axiom], key: &str) -> Option<&'a Axiom> {
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    axioms
        .iter()
        .find(|a| a.id == key || a.symbol.as_deref() == Some(key))
        .or_else(|| axioms.iter().find(|a| a.id_short() == key))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracePrinciple {
    pub principle_id: String,
    pub text: String,
    pub n_count: usize,
}

/// Fast single-path view: the strongest principle and up to two sources
/// from different files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracePath {
    pub axiom_id: String,
    pub symbol: Option<String>,
    pub axiom_text: String,
    pub tier: AxiomTier,
    pub principle: Option<TracePrinciple>,
    pub sources: Vec<SourceLocation>,
    pub broken_links: Vec<BrokenLink>,
}

pub fn trace(axioms: &[Axiom], key: &str, index: &ProvenanceIndex<'_>) -> Result<TracePath> {
    let axiom = resolve_axiom(axioms, key)
        .ok_or_else(|| SynthesisError::NotFound(format!("axiom '{key}'")))?;

    let mut broken_links = Vec::new();
    let mut strongest: Option<&Principle> = None;
    for principle_id in &axiom.derivation.principle_ids {
        match index.principle(principle_id) {
            Some(p) => {
                if strongest.map(|s| p.n_count > s.n_count).unwrap_or(true) {
                    strongest = Some(p);
                }
            }
            None => broken_links.push(BrokenLink {
                kind: LinkKind::Principle,
                missing_id: principle_id.clone(),
                referenced_by: axiom.id.clone(),
            }),
        }
    }

    let mut sources = Vec::new();
    if let Some(principle) = strongest {
        let mut resolved = Vec::with_capacity(principle.signal_ids.len());
        for signal_id in &principle.signal_ids {
            match index.signal(signal_id) {
                Some(signal) => resolved.push(signal),
                None => broken_links.push(BrokenLink {
                    kind: LinkKind::Signal,
                    missing_id: signal_id.clone(),
                    referenced_by: principle.id.clone(),
                }),
            }
        }
        if let Some(first) = resolved.first() {
            sources.push(SourceLocation::from_signal(first));
            let second = resolved
                .iter()
                .skip(1)
                .find(|s| s.source.file != first.source.file)
                .or_else(|| resolved.get(1));
            if let Some(second) = second {
                sources.push(SourceLocation::from_signal(second));
            }
        }
    }

    Ok(TracePath {
        axiom_id: axiom.id.clone(),
        symbol: axiom.symbol.clone(),
        axiom_text: axiom.text.clone(),
        tier: axiom.tier,
        principle: strongest.map(|p| TracePrinciple {
            principle_id: p.id.clone(),
            text: p.text.clone(),
            n_count: p.n_count,
        }),
        sources,
        broken_links,
    })
}
