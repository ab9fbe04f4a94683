//! The working set of principles and the merge logic that folds signals into
//! them.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::collaborator::{KeepOriginal, TextGeneralizer};
use crate::error::{Result, SynthesisError};
use crate::matcher::{
    MatchCandidate, MatchItem, SimilarityClassifier, find_best_match, validate_threshold,
};
use crate::schema::{Principle, Signal};

#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub principle_id: String,
    pub created: bool,
    /// The signal id had already been folded in; nothing changed.
    pub duplicate: bool,
    pub score: Option<f32>,
}

pub struct PrincipleStore {
    principles: Vec<Principle>,
    seen_signals: HashSet<String>,
    threshold: f32,
    classifier: Arc<dyn SimilarityClassifier>,
    generalizer: Arc<dyn TextGeneralizer>,
}

impl PrincipleStore {
    pub fn new(classifier: Arc<dyn SimilarityClassifier>, threshold: f32) -> Result<Self> {
        validate_threshold(threshold)?;
        Ok(Self {
            principles: Vec::new(),
            seen_signals: HashSet::new(),
            threshold,
            classifier,
            generalizer: Arc::new(KeepOriginal),
        })
    }

    pub fn with_generalizer(mut self, generalizer: Arc<dyn TextGeneralizer>) -> Self {
        self.generalizer = generalizer;
        self
    }

    /// Seed the store with principles persisted by an earlier run.
    pub fn restore(&mut self, principles: Vec<Principle>) -> Result<()> {
        let mut ids = HashSet::new();
        let mut seen = HashSet::new();
        for p in &principles {
            if p.id.trim().is_empty() || !ids.insert(p.id.as_str()) {
                return Err(SynthesisError::InvalidInput(format!(
                    "persisted principle id '{}' is empty or duplicated",
                    p.id
                )));
            }
            if !p.is_consistent() {
                return Err(SynthesisError::InvalidInput(format!(
                    "principle {} has n_count {} but {} signals",
                    p.id,
                    p.n_count,
                    p.signal_ids.len()
                )));
            }
            for signal_id in &p.signal_ids {
                if !seen.insert(signal_id.clone()) {
                    return Err(SynthesisError::InvalidInput(format!(
                        "signal '{signal_id}' is folded into more than one persisted principle"
                    )));
                }
            }
        }
        self.seen_signals = seen;
        self.principles = principles;
        Ok(())
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f32) -> Result<()> {
        validate_threshold(threshold)?;
        self.threshold = threshold;
        Ok(())
    }

    /// Principles in creation order.
    pub fn all(&self) -> &[Principle] {
        &self.principles
    }

    pub fn get(&self, id: &str) -> Option<&Principle> {
        self.principles.iter().find(|p| p.id == id)
    }

    pub fn contains_signal(&self, signal_id: &str) -> bool {
        self.seen_signals.contains(signal_id)
    }

    pub fn len(&self) -> usize {
        self.principles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.principles.is_empty()
    }

    /// Fold `signal` into the best-matching principle of its dimension, or
    /// start a new principle.
    ///
    /// Every await happens before the first mutation, so a cancelled or
    /// failed call leaves the store untouched.
    pub async fn ingest(&mut self, signal: &Signal) -> Result<IngestOutcome> {
        validate_signal(signal)?;

        if self.seen_signals.contains(&signal.id) {
            let principle_id = self
                .principles
                .iter()
                .find(|p| p.signal_ids.contains(&signal.id))
                .map(|p| p.id.clone())
                .unwrap_or_default();
            debug!(signal = %signal.id, "duplicate signal ignored");
            return Ok(IngestOutcome {
                principle_id,
                created: false,
                duplicate: true,
                score: None,
            });
        }

        let same_dimension: Vec<MatchItem<'_>> = self
            .principles
            .iter()
            .filter(|p| p.dimension == signal.dimension)
            .map(|p| MatchItem {
                id: &p.id,
                candidate: MatchCandidate::from(p),
            })
            .collect();
        let best = find_best_match(
            self.classifier.as_ref(),
            &MatchCandidate::from(signal),
            &same_dimension,
            self.threshold,
        )
        .await?;

        let Some(best) = best else {
            return Ok(self.create_principle(signal));
        };

        let Some(index) = self.principles.iter().position(|p| p.id == best.match_id) else {
            return Err(SynthesisError::NotFound(best.match_id));
        };

        let current = &self.principles[index];
        let text = match self
            .generalizer
            .generalize(&current.text, &signal.text, current.dimension)
            .await
        {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => current.text.clone(),
            Err(err) => {
                warn!(principle = %current.id, %err, "text generalization failed; keeping original text");
                current.text.clone()
            }
        };

        let principle = &mut self.principles[index];
        principle.signal_ids.push(signal.id.clone());
        principle.n_count = principle.signal_ids.len();
        principle.text = text;
        principle.last_updated = Utc::now();
        fold_centroid(principle, signal.embedding.as_deref());
        self.seen_signals.insert(signal.id.clone());

        debug!(
            signal = %signal.id,
            principle = %principle.id,
            n_count = principle.n_count,
            score = best.score,
            "signal merged into principle"
        );
        Ok(IngestOutcome {
            principle_id: principle.id.clone(),
            created: false,
            duplicate: false,
            score: Some(best.score),
        })
    }

    fn create_principle(&mut self, signal: &Signal) -> IngestOutcome {
        let now = Utc::now();
        let principle = Principle {
            id: format!("pr_{}", Uuid::new_v4().simple()),
            text: signal.text.trim().to_string(),
            n_count: 1,
            dimension: signal.dimension,
            signal_ids: vec![signal.id.clone()],
            first_seen: now,
            last_updated: now,
            centroid: signal.embedding.clone(),
        };
        debug!(signal = %signal.id, principle = %principle.id, dimension = signal.dimension.slug(), "new principle");
        let principle_id = principle.id.clone();
        self.principles.push(principle);
        self.seen_signals.insert(signal.id.clone());
        IngestOutcome {
            principle_id,
            created: true,
            duplicate: false,
            score: None,
        }
    }
}

fn validate_signal(signal: &Signal) -> Result<()> {
    if signal.id.trim().is_empty() {
        return Err(SynthesisError::InvalidInput("signal id is empty".to_string()));
    }
    if signal.text.trim().is_empty() {
        return Err(SynthesisError::InvalidInput(format!(
            "signal {} has empty text",
            signal.id
        )));
    }
    if !(0.0..=1.0).contains(&signal.confidence) {
        return Err(SynthesisError::InvalidInput(format!(
            "signal {} confidence {} outside [0, 1]",
            signal.id, signal.confidence
        )));
    }
    Ok(())
}

/// Running mean over the contributing vectors.
fn fold_centroid(principle: &mut Principle, embedding: Option<&[f32]>) {
    let Some(incoming) = embedding else {
        return;
    };
    match principle.centroid.as_mut() {
        Some(centroid) if centroid.len() == incoming.len() => {
            let n = principle.n_count as f32;
            for (c, x) in centroid.iter_mut().zip(incoming) {
                *c += (x - *c) / n;
            }
        }
        Some(_) => {}
        None => principle.centroid = Some(incoming.to_vec()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::matcher::{CosineClassifier, LexicalClassifier};
    use crate::schema::{Dimension, SignalCategory, SignalSource};

    pub(crate) fn signal(id: &str, text: &str, dimension: Dimension, file: &str, embedding: Option<Vec<f32>>) -> Signal {
        Signal {
            id: id.to_string(),
            text: text.to_string(),
            category: SignalCategory::Value,
            confidence: 0.9,
            dimension,
            source: SignalSource {
                file: file.to_string(),
                line: 1,
                context: String::new(),
                extracted_at: Utc::now(),
            },
            embedding,
        }
    }

    fn cosine_store() -> PrincipleStore {
        PrincipleStore::new(Arc::new(CosineClassifier), 0.85).unwrap()
    }

    struct FailingGeneralizer;

    #[async_trait]
    impl TextGeneralizer for FailingGeneralizer {
        async fn generalize(&self, _c: &str, _i: &str, _d: Dimension) -> Result<String> {
            Err(SynthesisError::Collaborator("offline".into()))
        }
    }

    struct JoiningGeneralizer;

    #[async_trait]
    impl TextGeneralizer for JoiningGeneralizer {
        async fn generalize(&self, c: &str, i: &str, _d: Dimension) -> Result<String> {
            Ok(format!("{c} / {i}"))
        }
    }

    #[tokio::test]
    async fn five_near_identical_signals_form_one_principle() {
        let mut store = cosine_store();
        let vectors = [
            vec![1.0, 0.0, 0.0],
            vec![0.99, 0.01, 0.0],
            vec![0.98, 0.02, 0.0],
            vec![1.0, 0.01, 0.01],
            vec![0.97, 0.0, 0.03],
        ];
        for (i, v) in vectors.iter().enumerate() {
            let s = signal(
                &format!("s{i}"),
                "Tell the truth even when it is uncomfortable",
                Dimension::HonestyFramework,
                "memory/a.md",
                Some(v.clone()),
            );
            store.ingest(&s).await.unwrap();
        }
        assert_eq!(store.len(), 1);
        let p = &store.all()[0];
        assert_eq!(p.n_count, 5);
        assert_eq!(p.signal_ids, vec!["s0", "s1", "s2", "s3", "s4"]);
        assert!(p.is_consistent());
    }

    #[tokio::test]
    async fn duplicate_signal_id_is_not_double_counted() {
        let mut store = cosine_store();
        let s = signal("s1", "Be direct", Dimension::VoicePresence, "a.md", Some(vec![1.0, 0.0]));
        let first = store.ingest(&s).await.unwrap();
        let again = store.ingest(&s).await.unwrap();
        assert!(first.created);
        assert!(again.duplicate);
        assert_eq!(again.principle_id, first.principle_id);
        assert_eq!(store.all()[0].n_count, 1);
        assert!(store.all().iter().all(Principle::is_consistent));
    }

    #[tokio::test]
    async fn signals_never_merge_across_dimensions() {
        let mut store = cosine_store();
        let a = signal("a", "Be kind", Dimension::RelationshipDynamics, "a.md", Some(vec![1.0, 0.0]));
        let b = signal("b", "Be kind", Dimension::BoundariesEthics, "a.md", Some(vec![1.0, 0.0]));
        store.ingest(&a).await.unwrap();
        let outcome = store.ingest(&b).await.unwrap();
        assert!(outcome.created);
        assert_eq!(store.len(), 2);
        assert_eq!(store.all()[1].dimension, Dimension::BoundariesEthics);
    }

    #[tokio::test]
    async fn threshold_is_per_store_and_validated() {
        let mut strict = cosine_store();
        let mut loose = cosine_store();
        loose.set_threshold(0.5).unwrap();
        assert!(strict.set_threshold(1.2).is_err());
        assert_eq!(strict.threshold(), 0.85);

        let a = signal("a", "x", Dimension::IdentityCore, "a.md", Some(vec![1.0, 0.0]));
        let b = signal("b", "y", Dimension::IdentityCore, "a.md", Some(vec![0.7, 0.7]));
        for store in [&mut strict, &mut loose] {
            store.ingest(&a).await.unwrap();
            store.ingest(&b).await.unwrap();
        }
        assert_eq!(strict.len(), 2);
        assert_eq!(loose.len(), 1);
    }

    #[tokio::test]
    async fn generalizer_failure_keeps_original_text() {
        let mut store = PrincipleStore::new(Arc::new(LexicalClassifier), 0.5)
            .unwrap()
            .with_generalizer(Arc::new(FailingGeneralizer));
        store
            .ingest(&signal("a", "values honest feedback", Dimension::HonestyFramework, "a.md", None))
            .await
            .unwrap();
        let merged = store
            .ingest(&signal("b", "values honest feedback always", Dimension::HonestyFramework, "b.md", None))
            .await
            .unwrap();
        assert!(!merged.created);
        assert_eq!(store.all()[0].text, "values honest feedback");
        assert_eq!(store.all()[0].n_count, 2);
    }

    #[tokio::test]
    async fn generalizer_rewrites_text_on_merge() {
        let mut store = PrincipleStore::new(Arc::new(LexicalClassifier), 0.5)
            .unwrap()
            .with_generalizer(Arc::new(JoiningGeneralizer));
        store
            .ingest(&signal("a", "values honest feedback", Dimension::HonestyFramework, "a.md", None))
            .await
            .unwrap();
        store
            .ingest(&signal("b", "values honest feedback always", Dimension::HonestyFramework, "b.md", None))
            .await
            .unwrap();
        assert_eq!(
            store.all()[0].text,
            "values honest feedback / values honest feedback always"
        );
    }

    #[tokio::test]
    async fn centroid_tracks_running_mean() {
        let mut store = PrincipleStore::new(Arc::new(CosineClassifier), 0.5).unwrap();
        store
            .ingest(&signal("a", "x", Dimension::IdentityCore, "a.md", Some(vec![1.0, 0.0])))
            .await
            .unwrap();
        store
            .ingest(&signal("b", "x", Dimension::IdentityCore, "a.md", Some(vec![1.0, 1.0])))
            .await
            .unwrap();
        let centroid = store.all()[0].centroid.clone().unwrap();
        assert!((centroid[0] - 1.0).abs() < 1e-6);
        assert!((centroid[1] - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn invalid_signal_is_rejected_without_mutation() {
        let mut store = cosine_store();
        let mut bad = signal("a", "x", Dimension::IdentityCore, "a.md", Some(vec![1.0]));
        bad.confidence = 3.0;
        assert!(store.ingest(&bad).await.is_err());
        bad.confidence = 0.5;
        bad.id = String::new();
        assert!(store.ingest(&bad).await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn restore_rebuilds_seen_signals() {
        let mut store = cosine_store();
        store
            .ingest(&signal("a", "x", Dimension::IdentityCore, "a.md", Some(vec![1.0, 0.0])))
            .await
            .unwrap();
        let persisted = store.all().to_vec();

        let mut next = cosine_store();
        next.restore(persisted).unwrap();
        assert!(next.contains_signal("a"));
        let again = next
            .ingest(&signal("a", "x", Dimension::IdentityCore, "a.md", Some(vec![1.0, 0.0])))
            .await
            .unwrap();
        assert!(again.duplicate);
        assert_eq!(next.all()[0].n_count, 1);
    }

    #[test]
    fn restore_rejects_inconsistent_principles() {
        let mut store = cosine_store();
        let now = Utc::now();
        let broken = Principle {
            id: "p1".into(),
            text: "x".into(),
            n_count: 3,
            dimension: Dimension::IdentityCore,
            signal_ids: vec!["a".into()],
            first_seen: now,
            last_updated: now,
            centroid: None,
        };
        assert!(store.restore(vec![broken]).is_err());
    }

    #[tokio::test]
    async fn restore_rejects_signal_shared_between_principles() {
        let mut store = cosine_store();
        store
            .ingest(&signal("a", "x", Dimension::IdentityCore, "a.md", Some(vec![1.0, 0.0])))
            .await
            .unwrap();
        store
            .ingest(&signal("b", "y", Dimension::HonestyFramework, "b.md", Some(vec![0.0, 1.0])))
            .await
            .unwrap();
        let mut persisted = store.all().to_vec();
        assert_eq!(persisted.len(), 2);
        persisted[1].signal_ids = vec!["a".into()];

        let mut next = cosine_store();
        let err = next.restore(persisted).unwrap_err();
        assert!(matches!(err, SynthesisError::InvalidInput(ref m) if m.contains("'a'")));
        assert!(next.is_empty());
    }
}
