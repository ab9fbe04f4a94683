//! Cascading-threshold promotion of principles into axioms.
//!
//! Floors are tried strictest first (`N ≥ 3`, `N ≥ 2`, `N ≥ 1`) and the first
//! floor that yields enough candidates wins.  The floor only decides *which*
//! principles are promoted; each axiom's tier always comes from its own
//! evidence count.

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collaborator::{NotationGenerator, with_timeout};
use crate::error::{Result, SynthesisError};
use crate::schema::{
    Axiom, AxiomTier, CanonicalForm, Derivation, NotationFormat, NotationVariant, Principle,
};

/// Evidence floors, strictest first.
pub const CASCADE_FLOORS: [usize; 3] = [3, 2, 1];

const SYMBOLS: [&str; 24] = [
    "α", "β", "γ", "δ", "ε", "ζ", "η", "θ", "ι", "κ", "λ", "μ", "ν", "ξ", "ο", "π", "ρ", "σ",
    "τ", "υ", "φ", "χ", "ψ", "ω",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionPolicy {
    pub target_minimum_axioms: usize,
    /// Expansion warning fires when axioms exceed this share of principles.
    /// Corpora no larger than `target_minimum_axioms` are exempt: promoting
    /// all of them is the cascade working as intended.
    pub max_axiom_ratio: f32,
    pub cognitive_load_ceiling: usize,
    pub notation: NotationFormat,
    pub notation_timeout_secs: u64,
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self {
            target_minimum_axioms: 3,
            max_axiom_ratio: 0.8,
            cognitive_load_ceiling: 25,
            notation: NotationFormat::Native,
            notation_timeout_secs: 30,
        }
    }
}

/// Advisory metadata attached to a promotion result.  Never an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PromotionWarning {
    Expansion {
        axioms: usize,
        principles: usize,
        ceiling_ratio: f32,
    },
    CognitiveLoad {
        axioms: usize,
        ceiling: usize,
    },
    CascadeFallback {
        floor: usize,
    },
    NoAxioms,
    NotationFailed {
        axiom_id: String,
        reason: String,
    },
}

impl PromotionWarning {
    pub fn message(&self) -> String {
        match self {
            Self::Expansion {
                axioms,
                principles,
                ceiling_ratio,
            } => format!(
                "expansion: {axioms} axioms from {principles} principles exceeds ratio {ceiling_ratio:.2}"
            ),
            Self::CognitiveLoad { axioms, ceiling } => {
                format!("cognitive load: {axioms} axioms exceeds ceiling of {ceiling}")
            }
            Self::CascadeFallback { floor } => {
                format!("cascade fell back to N>={floor}; evidence is thin")
            }
            Self::NoAxioms => "no-axioms: no principles available to promote".to_string(),
            Self::NotationFailed { axiom_id, reason } => {
                format!("notation unavailable for {axiom_id}: {reason}; native text kept")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeAttempt {
    pub floor: usize,
    pub candidates: usize,
}

/// Which principles the cascade selected, before axioms are built.
#[derive(Debug, Clone)]
pub struct CascadeSelection<'a> {
    pub floor: usize,
    pub attempts: Vec<CascadeAttempt>,
    pub selected: Vec<&'a Principle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionResult {
    pub axioms: Vec<Axiom>,
    pub warnings: Vec<PromotionWarning>,
    pub cascade_floor: Option<usize>,
    pub attempts: Vec<CascadeAttempt>,
}

/// Principles meeting `floor`, ordered by (n_count desc, dimension, creation
/// order).  Slice position is the creation order.
pub fn candidates_at(principles: &[Principle], floor: usize) -> Vec<&Principle> {
    let mut selected: Vec<(usize, &Principle)> = principles
        .iter()
        .enumerate()
        .filter(|(_, p)| p.n_count >= floor)
        .collect();
    selected.sort_by(|(left_idx, left), (right_idx, right)| {
        right
            .n_count
            .cmp(&left.n_count)
            .then_with(|| left.dimension.cmp(&right.dimension))
            .then_with(|| left_idx.cmp(right_idx))
    });
    selected.into_iter().map(|(_, p)| p).collect()
}

/// Run the floor cascade.  Falls through to the loosest floor when no floor
/// reaches `target`.
pub fn cascade(principles: &[Principle], target: usize) -> CascadeSelection<'_> {
    let mut attempts = Vec::with_capacity(CASCADE_FLOORS.len());
    let mut selection = CascadeSelection {
        floor: CASCADE_FLOORS[CASCADE_FLOORS.len() - 1],
        attempts: Vec::new(),
        selected: Vec::new(),
    };

    for floor in CASCADE_FLOORS {
        let selected = candidates_at(principles, floor);
        attempts.push(CascadeAttempt {
            floor,
            candidates: selected.len(),
        });
        debug!(floor, candidates = selected.len(), target, "cascade attempt");
        selection.floor = floor;
        selection.selected = selected;
        if selection.selected.len() >= target {
            break;
        }
    }

    selection.attempts = attempts;
    selection
}

pub fn validate_principles(principles: &[Principle]) -> Result<()> {
    let mut ids = HashSet::new();
    for p in principles {
        if p.id.trim().is_empty() {
            return Err(SynthesisError::InvalidInput("principle id is empty".to_string()));
        }
        if !ids.insert(p.id.as_str()) {
            return Err(SynthesisError::InvalidInput(format!(
                "duplicate principle id {}",
                p.id
            )));
        }
        if p.n_count == 0 || !p.is_consistent() {
            return Err(SynthesisError::InvalidInput(format!(
                "principle {} has n_count {} with {} contributing signals",
                p.id,
                p.n_count,
                p.signal_ids.len()
            )));
        }
    }
    Ok(())
}

/// Promote principles to tiered axioms.
pub async fn promote(
    principles: &[Principle],
    policy: &PromotionPolicy,
    notation: &dyn NotationGenerator,
) -> Result<PromotionResult> {
    validate_principles(principles)?;

    if principles.is_empty() {
        info!("promotion skipped: no principles");
        return Ok(PromotionResult {
            axioms: Vec::new(),
            warnings: vec![PromotionWarning::NoAxioms],
            cascade_floor: None,
            attempts: Vec::new(),
        });
    }

    let selection = cascade(principles, policy.target_minimum_axioms);
    let promoted_at = Utc::now();
    let mut warnings = Vec::new();
    let mut axioms = Vec::with_capacity(selection.selected.len());

    for (position, principle) in selection.selected.iter().enumerate() {
        let id = format!("ax_{}", Uuid::new_v4().simple());
        let variant = if policy.notation == NotationFormat::Native {
            None
        } else {
            let rendered = with_timeout(
                policy.notation_timeout_secs,
                notation.render(&principle.text, principle.dimension, policy.notation),
            )
            .await;
            match rendered {
                Ok(text) => Some(NotationVariant {
                    format: policy.notation,
                    text,
                }),
                Err(err) => {
                    warn!(axiom = %id, %err, "notation generation failed; keeping native text");
                    warnings.push(PromotionWarning::NotationFailed {
                        axiom_id: id.clone(),
                        reason: err.to_string(),
                    });
                    None
                }
            }
        };

        axioms.push(Axiom {
            id,
            text: principle.text.clone(),
            tier: AxiomTier::from_n_count(principle.n_count),
            dimension: principle.dimension,
            n_count: principle.n_count,
            symbol: SYMBOLS.get(position).map(|s| s.to_string()),
            canonical: CanonicalForm {
                native: principle.text.clone(),
                variant,
            },
            derivation: Derivation {
                principle_ids: vec![principle.id.clone()],
                promoted_at,
            },
        });
    }

    let guardrails = guardrail_warnings(axioms.len(), principles.len(), selection.floor, policy);
    for w in &guardrails {
        warn!(warning = %w.message(), "promotion guardrail");
    }
    warnings.extend(guardrails);

    info!(
        principles = principles.len(),
        axioms = axioms.len(),
        floor = selection.floor,
        "promotion complete"
    );

    Ok(PromotionResult {
        axioms,
        warnings,
        cascade_floor: Some(selection.floor),
        attempts: selection.attempts,
    })
}

fn guardrail_warnings(
    axioms: usize,
    principles: usize,
    floor: usize,
    policy: &PromotionPolicy,
) -> Vec<PromotionWarning> {
    let mut warnings = Vec::new();
    let compressible = principles > policy.target_minimum_axioms;
    if compressible && axioms as f32 > principles as f32 * policy.max_axiom_ratio {
        warnings.push(PromotionWarning::Expansion {
            axioms,
            principles,
            ceiling_ratio: policy.max_axiom_ratio,
        });
    }
    if axioms > policy.cognitive_load_ceiling {
        warnings.push(PromotionWarning::CognitiveLoad {
            axioms,
            ceiling: policy.cognitive_load_ceiling,
        });
    }
    if floor < CASCADE_FLOORS[0] {
        warnings.push(PromotionWarning::CascadeFallback { floor });
    }
    warnings
}
