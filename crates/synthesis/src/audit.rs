//! Read-only views over persisted artifacts for audit and trace.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::error::{Result, SynthesisError};
use crate::provenance::{ProvenanceChain, ProvenanceIndex, TracePath, build_chain, resolve_axiom, trace};
use crate::schema::{Axiom, AxiomTier, Dimension, Principle, Signal};

#[derive(Debug, Clone, Default)]
pub struct AuditData {
    pub axioms: Vec<Axiom>,
    pub principles: Vec<Principle>,
    pub signals: Vec<Signal>,
    /// Chains as written alongside the document by the last run.
    pub recorded: Vec<ProvenanceChain>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditStats {
    pub axioms: usize,
    pub principles: usize,
    pub signals: usize,
    pub by_tier: BTreeMap<AxiomTier, usize>,
    pub by_dimension: BTreeMap<Dimension, usize>,
    pub broken_links: usize,
    /// Axioms whose rebuilt chain differs from the recorded one.
    pub drifted_chains: usize,
    /// Principles not referenced by any axiom.
    pub unpromoted_principles: usize,
    pub compression_ratio: Option<f64>,
}

impl AuditData {
    pub fn index(&self) -> ProvenanceIndex<'_> {
        ProvenanceIndex::new(&self.principles, &self.signals)
    }

    pub fn chains(&self) -> Vec<ProvenanceChain> {
        let index = self.index();
        self.axioms.iter().map(|a| build_chain(a, &index)).collect()
    }

    pub fn chain(&self, key: &str) -> Result<ProvenanceChain> {
        let axiom = resolve_axiom(&self.axioms, key)
            .ok_or_else(|| SynthesisError::NotFound(format!("axiom '{key}'")))?;
        Ok(build_chain(axiom, &self.index()))
    }

    pub fn trace(&self, key: &str) -> Result<TracePath> {
        trace(&self.axioms, key, &self.index())
    }

    /// Ids of axioms whose chain, rebuilt from the current principles and
    /// signals, no longer matches what was recorded when the document was
    /// written.  An axiom with no recorded chain counts as drifted.
    pub fn drifted(&self) -> Vec<String> {
        let recorded: HashMap<&str, &ProvenanceChain> =
            self.recorded.iter().map(|c| (c.axiom_id.as_str(), c)).collect();
        self.chains()
            .into_iter()
            .filter(|chain| recorded.get(chain.axiom_id.as_str()).is_none_or(|r| *r != chain))
            .map(|chain| chain.axiom_id)
            .collect()
    }

    pub fn stats(&self) -> AuditStats {
        let mut stats = AuditStats {
            axioms: self.axioms.len(),
            principles: self.principles.len(),
            signals: self.signals.len(),
            ..AuditStats::default()
        };
        for axiom in &self.axioms {
            *stats.by_tier.entry(axiom.tier).or_default() += 1;
            *stats.by_dimension.entry(axiom.dimension).or_default() += 1;
        }
        stats.broken_links = self.chains().iter().map(|c| c.broken_links.len()).sum();
        stats.drifted_chains = self.drifted().len();
        stats.unpromoted_principles = self
            .principles
            .iter()
            .filter(|p| {
                !self
                    .axioms
                    .iter()
                    .any(|a| a.derivation.principle_ids.contains(&p.id))
            })
            .count();
        stats.compression_ratio =
            (!self.axioms.is_empty()).then(|| self.principles.len() as f64 / self.axioms.len() as f64);
        stats
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::principles::tests::signal;
    use crate::schema::{CanonicalForm, Derivation};

    fn data() -> AuditData {
        let now = Utc::now();
        let principle = |id: &str, sigs: &[&str]| Principle {
            id: id.to_string(),
            text: id.to_string(),
            n_count: sigs.len(),
            dimension: Dimension::BoundariesEthics,
            signal_ids: sigs.iter().map(|s| s.to_string()).collect(),
            first_seen: now,
            last_updated: now,
            centroid: None,
        };
        AuditData {
            axioms: vec![Axiom {
                id: "ax_1".into(),
                text: "hold the line".into(),
                tier: AxiomTier::Domain,
                dimension: Dimension::BoundariesEthics,
                n_count: 3,
                symbol: Some("α".into()),
                canonical: CanonicalForm {
                    native: "hold the line".into(),
                    variant: None,
                },
                derivation: Derivation {
                    principle_ids: vec!["p1".into()],
                    promoted_at: now,
                },
            }],
            principles: vec![principle("p1", &["s1", "s2", "missing"]), principle("p2", &["s3"])],
            signals: vec![
                signal("s1", "a", Dimension::BoundariesEthics, "a.md", None),
                signal("s2", "b", Dimension::BoundariesEthics, "b.md", None),
                signal("s3", "c", Dimension::BoundariesEthics, "c.md", None),
            ],
            recorded: Vec::new(),
        }
    }

    #[test]
    fn stats_count_tiers_broken_links_and_unpromoted() {
        let stats = data().stats();
        assert_eq!(stats.axioms, 1);
        assert_eq!(stats.by_tier.get(&AxiomTier::Domain), Some(&1));
        assert_eq!(stats.broken_links, 1);
        assert_eq!(stats.unpromoted_principles, 1);
        assert_eq!(stats.compression_ratio, Some(2.0));
        assert_eq!(stats.drifted_chains, 1);
    }

    #[test]
    fn drift_detected_when_signals_change_after_write() {
        let mut data = data();
        data.recorded = data.chains();
        assert!(data.drifted().is_empty());

        data.signals.retain(|s| s.id != "s2");
        assert_eq!(data.drifted(), vec!["ax_1".to_string()]);
    }

    #[test]
    fn chain_and_trace_resolve_by_symbol() {
        let data = data();
        assert_eq!(data.chain("α").unwrap().signal_count(), 2);
        assert_eq!(data.trace("α").unwrap().sources.len(), 2);
        assert!(matches!(data.chain("ω"), Err(SynthesisError::NotFound(_))));
    }
}
