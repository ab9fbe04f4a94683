//! Similarity matching: decides whether a new item is "the same idea" as an
//! existing one.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collaborator::LanguageModel;
use crate::error::{Result, SynthesisError};
use crate::schema::{Principle, Signal};

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.85;

/// The comparable face of a signal or principle.
#[derive(Debug, Clone, Copy)]
pub struct MatchCandidate<'a> {
    pub text: &'a str,
    pub embedding: Option<&'a [f32]>,
}

impl<'a> From<&'a Signal> for MatchCandidate<'a> {
    fn from(signal: &'a Signal) -> Self {
        Self {
            text: &signal.text,
            embedding: signal.embedding.as_deref(),
        }
    }
}

impl<'a> From<&'a Principle> for MatchCandidate<'a> {
    fn from(principle: &'a Principle) -> Self {
        Self {
            text: &principle.text,
            embedding: principle.centroid.as_deref(),
        }
    }
}

/// An existing item the candidate is compared against.
#[derive(Debug, Clone, Copy)]
pub struct MatchItem<'a> {
    pub id: &'a str,
    pub candidate: MatchCandidate<'a>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch {
    pub match_id: String,
    pub score: f32,
}

/// Produces a pairwise similarity score on a single 0–1 scale.
#[async_trait]
pub trait SimilarityClassifier: Send + Sync {
    async fn similarity(&self, a: &MatchCandidate<'_>, b: &MatchCandidate<'_>) -> Result<f32>;

    /// Whether every candidate must carry a vector.
    fn requires_vectors(&self) -> bool {
        false
    }
}

/// Which classifier a store uses; chosen by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    #[default]
    Cosine,
    Lexical,
    Judgment,
}

impl ClassifierKind {
    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" | "vector" => Some(Self::Cosine),
            "lexical" | "jaccard" => Some(Self::Lexical),
            "judgment" | "llm" | "model" => Some(Self::Judgment),
            _ => None,
        }
    }
}

/// Build the classifier named by `kind`.  The judgment classifier needs a
/// host-provided model.
pub fn build_classifier(
    kind: ClassifierKind,
    model: Option<Arc<dyn LanguageModel>>,
) -> Result<Arc<dyn SimilarityClassifier>> {
    match kind {
        ClassifierKind::Cosine => Ok(Arc::new(CosineClassifier)),
        ClassifierKind::Lexical => Ok(Arc::new(LexicalClassifier)),
        ClassifierKind::Judgment => match model {
            Some(model) => Ok(Arc::new(JudgmentClassifier::new(model))),
            None => Err(SynthesisError::InvalidInput(
                "judgment classifier requires a language model collaborator".to_string(),
            )),
        },
    }
}

/// Return the highest-scoring existing item whose score clears `threshold`.
///
/// Items are scanned in slice order and only a strictly greater score
/// displaces the current best, so ties resolve to the earliest-created item.
pub async fn find_best_match(
    classifier: &dyn SimilarityClassifier,
    candidate: &MatchCandidate<'_>,
    existing: &[MatchItem<'_>],
    threshold: f32,
) -> Result<Option<BestMatch>> {
    validate_threshold(threshold)?;
    if candidate.text.trim().is_empty() && candidate.embedding.is_none() {
        return Err(SynthesisError::InvalidInput(
            "match candidate has neither text nor vector".to_string(),
        ));
    }

    let mut best: Option<BestMatch> = None;
    for item in existing {
        let score = classifier.similarity(candidate, &item.candidate).await?;
        if score < threshold {
            continue;
        }
        let better = best.as_ref().map(|b| score > b.score).unwrap_or(true);
        if better {
            best = Some(BestMatch {
                match_id: item.id.to_string(),
                score,
            });
        }
    }

    if let Some(m) = &best {
        debug!(match_id = %m.match_id, score = m.score, "best match found");
    }
    Ok(best)
}

pub(crate) fn validate_threshold(threshold: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(SynthesisError::InvalidInput(format!(
            "similarity threshold {threshold} outside [0, 1]"
        )));
    }
    Ok(())
}

// ── Cosine ───────────────────────────────────────────────────────────────────

/// Cosine similarity over fixed-dimension vectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineClassifier;

#[async_trait]
impl SimilarityClassifier for CosineClassifier {
    async fn similarity(&self, a: &MatchCandidate<'_>, b: &MatchCandidate<'_>) -> Result<f32> {
        let (Some(left), Some(right)) = (a.embedding, b.embedding) else {
            return Err(SynthesisError::InvalidInput(
                "cosine similarity requires a vector on both sides".to_string(),
            ));
        };
        cosine_similarity(left, right)
    }

    fn requires_vectors(&self) -> bool {
        true
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(SynthesisError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    if a.is_empty() {
        return Err(SynthesisError::InvalidInput("empty vector".to_string()));
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / (mag_a * mag_b)).clamp(0.0, 1.0))
}

// ── Lexical ──────────────────────────────────────────────────────────────────

/// Jaccard overlap of content words; used when no vectors are available.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalClassifier;

#[async_trait]
impl SimilarityClassifier for LexicalClassifier {
    async fn similarity(&self, a: &MatchCandidate<'_>, b: &MatchCandidate<'_>) -> Result<f32> {
        let left = tokenize(a.text);
        let right = tokenize(b.text);
        if left.is_empty() || right.is_empty() {
            return Ok(0.0);
        }
        let shared = left.intersection(&right).count();
        let union = left.union(&right).count();
        Ok(shared as f32 / union as f32)
    }
}

pub(crate) fn tokenize(text: &str) -> BTreeSet<String> {
    const STOP_WORDS: &[&str] = &[
        "the", "and", "for", "with", "that", "this", "are", "was", "you", "your", "but", "not",
        "have", "has", "from", "they", "them", "its", "all", "any", "can", "will", "just",
    ];
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| word.chars().count() >= 3)
        .map(|word| word.to_lowercase())
        .filter(|word| !STOP_WORDS.contains(&word.as_str()))
        .collect()
}

// ── Judgment ─────────────────────────────────────────────────────────────────

/// Opaque similarity judgment delegated to the language model's `classify`.
///
/// A reply category of `same`/`match`/`yes` scores its confidence; anything
/// else scores `1 - confidence`.
pub struct JudgmentClassifier {
    model: Arc<dyn LanguageModel>,
}

impl JudgmentClassifier {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl SimilarityClassifier for JudgmentClassifier {
    async fn similarity(&self, a: &MatchCandidate<'_>, b: &MatchCandidate<'_>) -> Result<f32> {
        let prompt = format!(
            "Do these two statements express the same underlying idea?\nA: {}\nB: {}\n\
             Answer with category `same` or `different` and a confidence.",
            a.text, b.text
        );
        let verdict = self.model.classify(&prompt).await?;
        let confidence = verdict.confidence.clamp(0.0, 1.0);
        let same = matches!(
            verdict.category.trim().to_ascii_lowercase().as_str(),
            "same" | "match" | "yes"
        );
        Ok(if same { confidence } else { 1.0 - confidence })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::testing::ScriptedModel;

    fn vec_candidate(v: &[f32]) -> MatchCandidate<'_> {
        MatchCandidate {
            text: "x",
            embedding: Some(v),
        }
    }

    #[test]
    fn cosine_identical_vectors_score_one() {
        let score = cosine_similarity(&[0.3, 0.4, 0.5], &[0.3, 0.4, 0.5]).unwrap();
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_rejects_length_mismatch() {
        let err = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, SynthesisError::DimensionMismatch { left: 2, right: 3 }));
    }

    #[tokio::test]
    async fn empty_existing_set_yields_none() {
        let v = [1.0, 0.0];
        let found = find_best_match(&CosineClassifier, &vec_candidate(&v), &[], 0.85)
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn below_threshold_yields_none() {
        let query = [1.0, 0.0];
        let other = [0.0, 1.0];
        let existing = [MatchItem { id: "p1", candidate: vec_candidate(&other) }];
        let found = find_best_match(&CosineClassifier, &vec_candidate(&query), &existing, 0.85)
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn highest_score_wins() {
        let query = [1.0, 0.0];
        let near = [0.95, 0.05];
        let exact = [1.0, 0.0];
        let existing = [
            MatchItem { id: "near", candidate: vec_candidate(&near) },
            MatchItem { id: "exact", candidate: vec_candidate(&exact) },
        ];
        let found = find_best_match(&CosineClassifier, &vec_candidate(&query), &existing, 0.85)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.match_id, "exact");
    }

    #[tokio::test]
    async fn ties_go_to_earliest_item() {
        let query = [1.0, 0.0];
        let same = [2.0, 0.0];
        let existing = [
            MatchItem { id: "first", candidate: vec_candidate(&same) },
            MatchItem { id: "second", candidate: vec_candidate(&same) },
        ];
        let found = find_best_match(&CosineClassifier, &vec_candidate(&query), &existing, 0.85)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.match_id, "first");
    }

    #[tokio::test]
    async fn empty_candidate_is_invalid() {
        let candidate = MatchCandidate { text: "  ", embedding: None };
        let err = find_best_match(&LexicalClassifier, &candidate, &[], 0.85)
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn threshold_outside_unit_interval_is_invalid() {
        let candidate = MatchCandidate { text: "hello", embedding: None };
        assert!(find_best_match(&LexicalClassifier, &candidate, &[], 1.5).await.is_err());
    }

    #[tokio::test]
    async fn cosine_propagates_dimension_mismatch() {
        let query = [1.0, 0.0];
        let wide = [1.0, 0.0, 0.0];
        let existing = [MatchItem { id: "p1", candidate: vec_candidate(&wide) }];
        let err = find_best_match(&CosineClassifier, &vec_candidate(&query), &existing, 0.5)
            .await
            .unwrap_err();
        assert!(matches!(err, SynthesisError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn lexical_scores_overlap() {
        let a = MatchCandidate { text: "Always tell the truth, even when uncomfortable", embedding: None };
        let b = MatchCandidate { text: "always tell the truth even when it is uncomfortable", embedding: None };
        let c = MatchCandidate { text: "Prefers tea over coffee", embedding: None };
        let same = LexicalClassifier.similarity(&a, &b).await.unwrap();
        let different = LexicalClassifier.similarity(&a, &c).await.unwrap();
        assert!(same >= 0.85, "score was {same}");
        assert!(different < 0.2);
    }

    #[tokio::test]
    async fn judgment_maps_category_to_score() {
        let model = Arc::new(ScriptedModel::new(vec![Ok("same:0.9".into()), Ok("different:0.8".into())]));
        let classifier = JudgmentClassifier::new(model);
        let a = MatchCandidate { text: "a", embedding: None };
        let same = classifier.similarity(&a, &a).await.unwrap();
        let different = classifier.similarity(&a, &a).await.unwrap();
        assert!((same - 0.9).abs() < 1e-6);
        assert!((different - 0.2).abs() < 1e-6);
    }

    #[test]
    fn judgment_requires_model() {
        assert!(build_classifier(ClassifierKind::Judgment, None).is_err());
        assert!(build_classifier(ClassifierKind::Lexical, None).is_ok());
    }
}
