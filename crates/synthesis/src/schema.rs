use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Dimensions ────────────────────────────────────────────────────────────────

/// The seven fixed identity dimensions every signal, principle and axiom
/// belongs to.
///
/// Declaration order is the canonical ordering used when sorting promotion
/// candidates and rendering documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dimension {
    IdentityCore,
    CharacterTraits,
    VoicePresence,
    HonestyFramework,
    BoundariesEthics,
    RelationshipDynamics,
    ContinuityGrowth,
}

impl Dimension {
    pub const ALL: [Dimension; 7] = [
        Self::IdentityCore,
        Self::CharacterTraits,
        Self::VoicePresence,
        Self::HonestyFramework,
        Self::BoundariesEthics,
        Self::RelationshipDynamics,
        Self::ContinuityGrowth,
    ];

    /// Human-readable label used in rendered documents.
    pub fn label(self) -> &'static str {
        match self {
            Self::IdentityCore => "Identity Core",
            Self::CharacterTraits => "Character Traits",
            Self::VoicePresence => "Voice & Presence",
            Self::HonestyFramework => "Honesty Framework",
            Self::BoundariesEthics => "Boundaries & Ethics",
            Self::RelationshipDynamics => "Relationship Dynamics",
            Self::ContinuityGrowth => "Continuity & Growth",
        }
    }

    /// Kebab-case slug used in JSON artifacts and log lines.
    pub fn slug(self) -> &'static str {
        match self {
            Self::IdentityCore => "identity-core",
            Self::CharacterTraits => "character-traits",
            Self::VoicePresence => "voice-presence",
            Self::HonestyFramework => "honesty-framework",
            Self::BoundariesEthics => "boundaries-ethics",
            Self::RelationshipDynamics => "relationship-dynamics",
            Self::ContinuityGrowth => "continuity-growth",
        }
    }

    /// Short CJK label used by the labeled and math notations.
    pub fn cjk(self) -> &'static str {
        match self {
            Self::IdentityCore => "本",
            Self::CharacterTraits => "性",
            Self::VoicePresence => "声",
            Self::HonestyFramework => "誠",
            Self::BoundariesEthics => "界",
            Self::RelationshipDynamics => "絆",
            Self::ContinuityGrowth => "長",
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Self::IdentityCore => "🧭",
            Self::CharacterTraits => "🌱",
            Self::VoicePresence => "🗣️",
            Self::HonestyFramework => "⚖️",
            Self::BoundariesEthics => "🛡️",
            Self::RelationshipDynamics => "🤝",
            Self::ContinuityGrowth => "🔄",
        }
    }

    /// Parse a dimension from its slug or label (case-insensitive, `_` and
    /// spaces accepted in place of `-`).
    pub fn from_label(s: &str) -> Option<Self> {
        let normalized = s
            .trim()
            .to_ascii_lowercase()
            .replace(['_', ' '], "-")
            .replace('&', "")
            .replace("--", "-");
        Self::ALL.into_iter().find(|d| d.slug() == normalized)
    }
}

// ── Signals ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalCategory {
    Preference,
    Correction,
    Value,
    Other,
}

impl SignalCategory {
    pub fn from_label(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "preference" => Self::Preference,
            "correction" => Self::Correction,
            "value" => Self::Value,
            _ => Self::Other,
        }
    }
}

/// Where a signal was extracted from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSource {
    pub file: String,
    pub line: u32,
    #[serde(default)]
    pub context: String,
    pub extracted_at: DateTime<Utc>,
}

/// An atomic behavioral observation produced by the external extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub text: String,
    pub category: SignalCategory,
    pub confidence: f32,
    pub dimension: Dimension,
    pub source: SignalSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

// ── Principles ────────────────────────────────────────────────────────────────

/// A cluster of semantically equivalent signals within one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principle {
    pub id: String,
    pub text: String,
    pub n_count: usize,
    pub dimension: Dimension,
    pub signal_ids: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Running mean of the contributing signals' vectors, when they have one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroid: Option<Vec<f32>>,
}

impl Principle {
    pub fn is_consistent(&self) -> bool {
        self.n_count == self.signal_ids.len()
    }
}

// ── Axioms ────────────────────────────────────────────────────────────────────

/// Evidence tier of a promoted axiom.
///
/// | Tier       | Evidence        |
/// |------------|-----------------|
/// | `Core`     | n_count ≥ 5     |
/// | `Domain`   | n_count ≥ 3     |
/// | `Emerging` | n_count < 3     |
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxiomTier {
    Core,
    Domain,
    Emerging,
}

impl AxiomTier {
    pub const CORE_MIN: usize = 5;
    pub const DOMAIN_MIN: usize = 3;

    /// Tier is a pure function of evidence count.
    pub fn from_n_count(n_count: usize) -> Self {
        if n_count >= Self::CORE_MIN {
            Self::Core
        } else if n_count >= Self::DOMAIN_MIN {
            Self::Domain
        } else {
            Self::Emerging
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Core => "Core",
            Self::Domain => "Domain",
            Self::Emerging => "Emerging",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Domain => "domain",
            Self::Emerging => "emerging",
        }
    }
}

/// Rendering notation for axiom text.  `Native` is the guaranteed fallback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotationFormat {
    #[default]
    Native,
    Labeled,
    Math,
    MathEmoji,
}

impl NotationFormat {
    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "plain" => Some(Self::Native),
            "labeled" | "cjk-labeled" => Some(Self::Labeled),
            "math" | "cjk-math" => Some(Self::Math),
            "math-emoji" | "math+emoji" | "cjk-math-emoji" => Some(Self::MathEmoji),
            _ => None,
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Labeled => "labeled",
            Self::Math => "math",
            Self::MathEmoji => "math-emoji",
        }
    }
}

/// Native text plus at most one alternate notation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalForm {
    pub native: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<NotationVariant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotationVariant {
    pub format: NotationFormat,
    pub text: String,
}

impl CanonicalForm {
    /// Text in the requested format, falling back to native.
    pub fn render(&self, format: NotationFormat) -> &str {
        match &self.variant {
            Some(v) if v.format == format => &v.text,
            _ => &self.native,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Derivation {
    pub principle_ids: Vec<String>,
    pub promoted_at: DateTime<Utc>,
}

/// A promoted principle with an honest evidence tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axiom {
    pub id: String,
    pub text: String,
    pub tier: AxiomTier,
    pub dimension: Dimension,
    pub n_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub canonical: CanonicalForm,
    pub derivation: Derivation,
}

impl Axiom {
    /// First 8 characters of the id, used as a compact display identifier.
    pub fn id_short(&self) -> &str {
        truncate_str(&self.id, 8)
    }
}

/// Truncate `s` to at most `max_chars` Unicode scalar values.
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_thresholds() {
        assert_eq!(AxiomTier::from_n_count(1), AxiomTier::Emerging);
        assert_eq!(AxiomTier::from_n_count(2), AxiomTier::Emerging);
        assert_eq!(AxiomTier::from_n_count(3), AxiomTier::Domain);
        assert_eq!(AxiomTier::from_n_count(4), AxiomTier::Domain);
        assert_eq!(AxiomTier::from_n_count(5), AxiomTier::Core);
        assert_eq!(AxiomTier::from_n_count(40), AxiomTier::Core);
    }

    #[test]
    fn dimension_parses_slugs_and_labels() {
        assert_eq!(
            Dimension::from_label("honesty-framework"),
            Some(Dimension::HonestyFramework)
        );
        assert_eq!(
            Dimension::from_label("Voice & Presence"),
            Some(Dimension::VoicePresence)
        );
        assert_eq!(
            Dimension::from_label("boundaries_ethics"),
            Some(Dimension::BoundariesEthics)
        );
        assert_eq!(Dimension::from_label("nonsense"), None);
    }

    #[test]
    fn dimension_serializes_as_slug() {
        let json = serde_json::to_string(&Dimension::ContinuityGrowth).unwrap();
        assert_eq!(json, "\"continuity-growth\"");
    }

    #[test]
    fn canonical_form_falls_back_to_native() {
        let form = CanonicalForm {
            native: "be honest".to_string(),
            variant: Some(NotationVariant {
                format: NotationFormat::Labeled,
                text: "誠: be honest".to_string(),
            }),
        };
        assert_eq!(form.render(NotationFormat::Labeled), "誠: be honest");
        assert_eq!(form.render(NotationFormat::Math), "be honest");
        assert_eq!(form.render(NotationFormat::Native), "be honest");
    }

    #[test]
    fn notation_format_accepts_aliases() {
        assert_eq!(NotationFormat::from_label("cjk-math-emoji"), Some(NotationFormat::MathEmoji));
        assert_eq!(NotationFormat::from_label("PLAIN"), Some(NotationFormat::Native));
        assert_eq!(NotationFormat::from_label("klingon"), None);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_str("誠実さ", 2), "誠実");
        assert_eq!(truncate_str("ab", 8), "ab");
    }
}
