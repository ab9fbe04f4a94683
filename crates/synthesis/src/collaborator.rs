//! Seams for host-provided capabilities.
//!
//! The host supplies a [`LanguageModel`]; everything else in this module is a
//! strategy built on top of it plus a deterministic local fallback that works
//! without any model at all.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SynthesisError};
use crate::schema::{Dimension, NotationFormat};

/// Reply of a [`LanguageModel::classify`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: String,
}

/// External extraction/classification collaborator.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification>;
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Run `fut` with a bounded latency, mapping expiry to [`SynthesisError::Timeout`].
pub async fn with_timeout<T, F>(secs: u64, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(Duration::from_secs(secs), fut)
        .await
        .map_err(|_| SynthesisError::Timeout { secs })?
}

// ── Text generalization ──────────────────────────────────────────────────────

/// Re-generalizes a principle's text when a new signal folds into it.
#[async_trait]
pub trait TextGeneralizer: Send + Sync {
    async fn generalize(&self, current: &str, incoming: &str, dimension: Dimension) -> Result<String>;
}

/// Keeps the principle's first wording unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepOriginal;

#[async_trait]
impl TextGeneralizer for KeepOriginal {
    async fn generalize(&self, current: &str, _incoming: &str, _dimension: Dimension) -> Result<String> {
        Ok(current.to_string())
    }
}

/// Asks the language model for one sentence covering both statements.
pub struct ModelGeneralizer {
    model: Arc<dyn LanguageModel>,
}

impl ModelGeneralizer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl TextGeneralizer for ModelGeneralizer {
    async fn generalize(&self, current: &str, incoming: &str, dimension: Dimension) -> Result<String> {
        let prompt = format!(
            "Two observations about the same person ({}) express one idea.\n\
             A: {current}\nB: {incoming}\n\
             Reply with a single sentence that states the shared principle. No preamble.",
            dimension.label()
        );
        let reply = self.model.generate(&prompt).await?;
        let line = first_line(&reply);
        if line.is_empty() {
            return Err(SynthesisError::Collaborator(
                "generalization returned empty text".to_string(),
            ));
        }
        Ok(line.to_string())
    }
}

// ── Notation generation ──────────────────────────────────────────────────────

/// Produces an alternate notation for an axiom.
#[async_trait]
pub trait NotationGenerator: Send + Sync {
    async fn render(&self, text: &str, dimension: Dimension, format: NotationFormat) -> Result<String>;
}

/// Deterministic notation built from each dimension's glyphs.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlyphNotation;

#[async_trait]
impl NotationGenerator for GlyphNotation {
    async fn render(&self, text: &str, dimension: Dimension, format: NotationFormat) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SynthesisError::InvalidInput(
                "cannot notate empty axiom text".to_string(),
            ));
        }
        Ok(match format {
            NotationFormat::Native => text.to_string(),
            NotationFormat::Labeled => format!("{} ({}): {text}", dimension.cjk(), dimension.label()),
            NotationFormat::Math => format!("{} ⊢ {text}", dimension.cjk()),
            NotationFormat::MathEmoji => format!("{} {} ⊢ {text}", dimension.emoji(), dimension.cjk()),
        })
    }
}

/// Delegates notation to the language model.
pub struct ModelNotation {
    model: Arc<dyn LanguageModel>,
}

impl ModelNotation {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl NotationGenerator for ModelNotation {
    async fn render(&self, text: &str, dimension: Dimension, format: NotationFormat) -> Result<String> {
        if format == NotationFormat::Native {
            return Ok(text.to_string());
        }
        let style = match format {
            NotationFormat::Labeled => "prefix it with a short CJK label for the dimension",
            NotationFormat::Math => "rewrite it as a compact symbolic statement using CJK and logic symbols",
            _ => "rewrite it as a compact symbolic statement using CJK, logic symbols and one emoji",
        };
        let prompt = format!(
            "Axiom ({}): {text}\nKeep the meaning and {style}. Reply with the notation only.",
            dimension.label()
        );
        let reply = self.model.generate(&prompt).await?;
        let line = first_line(&reply);
        if line.is_empty() {
            return Err(SynthesisError::Collaborator(
                "notation generation returned empty text".to_string(),
            ));
        }
        debug!(format = format.slug(), "model notation generated");
        Ok(line.to_string())
    }
}

fn first_line(reply: &str) -> &str {
    reply
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedModel;
    use super::*;

    #[tokio::test]
    async fn keep_original_returns_current_text() {
        let text = KeepOriginal
            .generalize("values candor", "prefers blunt feedback", Dimension::HonestyFramework)
            .await
            .unwrap();
        assert_eq!(text, "values candor");
    }

    #[tokio::test]
    async fn model_generalizer_uses_first_non_empty_line() {
        let model = Arc::new(ScriptedModel::new(vec![Ok("\n  Candor over comfort.\nextra".into())]));
        let generalizer = ModelGeneralizer::new(model);
        let text = generalizer
            .generalize("a", "b", Dimension::HonestyFramework)
            .await
            .unwrap();
        assert_eq!(text, "Candor over comfort.");
    }

    #[tokio::test]
    async fn model_generalizer_rejects_blank_reply() {
        let model = Arc::new(ScriptedModel::new(vec![Ok("   \n".into())]));
        let err = ModelGeneralizer::new(model)
            .generalize("a", "b", Dimension::HonestyFramework)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn glyph_notation_formats() {
        let g = GlyphNotation;
        let labeled = g
            .render("Tell the truth", Dimension::HonestyFramework, NotationFormat::Labeled)
            .await
            .unwrap();
        assert_eq!(labeled, "誠 (Honesty Framework): Tell the truth");
        let math = g
            .render("Tell the truth", Dimension::HonestyFramework, NotationFormat::Math)
            .await
            .unwrap();
        assert_eq!(math, "誠 ⊢ Tell the truth");
        assert!(
            g.render("  ", Dimension::HonestyFramework, NotationFormat::Math)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn with_timeout_maps_expiry() {
        let err = with_timeout(0, async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, SynthesisError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, SynthesisError::Timeout { secs: 0 }));
    }
}
