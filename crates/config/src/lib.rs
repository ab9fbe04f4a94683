use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "config/soul.toml";

const CLASSIFIERS: [&str; 3] = ["cosine", "lexical", "judgment"];
const NOTATION_FORMATS: [&str; 4] = ["native", "labeled", "math", "math-emoji"];

// ── Sections ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Minimum similarity (0–1) for a signal to fold into a principle.
    pub similarity_threshold: f32,
    /// New memory characters required before a run proceeds.
    pub content_threshold: u64,
    pub target_minimum_axioms: usize,
    /// `cosine`, `lexical` or `judgment`.
    pub classifier: String,
    pub collaborator_timeout_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            content_threshold: 2000,
            target_minimum_axioms: 3,
            classifier: "cosine".to_string(),
            collaborator_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailsConfig {
    pub max_axiom_ratio: f32,
    pub cognitive_load_ceiling: usize,
}

impl Default for GuardrailsConfig {
    fn default() -> Self {
        Self {
            max_axiom_ratio: 0.8,
            cognitive_load_ceiling: 25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotationConfig {
    /// Native text is always kept as the fallback.
    pub format: String,
}

impl Default for NotationConfig {
    fn default() -> Self {
        Self {
            format: "native".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub memory_dir: String,
    pub data_dir: String,
    pub output_path: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            memory_dir: "memory".to_string(),
            data_dir: ".soul".to_string(),
            output_path: "SOUL.md".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VcsConfig {
    /// Commit the document and artifacts after each written run.
    pub auto_commit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub synthesis: SynthesisConfig,
    pub guardrails: GuardrailsConfig,
    pub notation: NotationConfig,
    pub paths: PathsConfig,
    pub vcs: VcsConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        }

        if let Ok(value) = env::var("SOUL_SIMILARITY_THRESHOLD") {
            if !value.is_empty() {
                config.synthesis.similarity_threshold = value
                    .trim()
                    .parse()
                    .with_context(|| format!("SOUL_SIMILARITY_THRESHOLD={value} is not a number"))?;
            }
        }

        if let Ok(value) = env::var("SOUL_CONTENT_THRESHOLD") {
            if !value.is_empty() {
                config.synthesis.content_threshold = value
                    .trim()
                    .parse()
                    .with_context(|| format!("SOUL_CONTENT_THRESHOLD={value} is not a whole number"))?;
            }
        }

        if let Ok(value) = env::var("SOUL_OUTPUT_PATH") {
            if !value.is_empty() {
                config.paths.output_path = value;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.synthesis;
        if !(0.0..=1.0).contains(&s.similarity_threshold) {
            bail!("synthesis.similarity_threshold must be within [0, 1], got {}", s.similarity_threshold);
        }
        if s.target_minimum_axioms == 0 {
            bail!("synthesis.target_minimum_axioms must be at least 1");
        }
        if !CLASSIFIERS.contains(&s.classifier.to_ascii_lowercase().as_str()) {
            bail!("synthesis.classifier '{}' is not one of {}", s.classifier, CLASSIFIERS.join(", "));
        }
        if !NOTATION_FORMATS.contains(&self.notation.format.to_ascii_lowercase().as_str()) {
            bail!(
                "notation.format '{}' is not one of {}",
                self.notation.format,
                NOTATION_FORMATS.join(", ")
            );
        }
        if self.guardrails.max_axiom_ratio <= 0.0 {
            bail!("guardrails.max_axiom_ratio must be positive");
        }
        if self.paths.output_path.trim().is_empty() {
            bail!("paths.output_path must not be empty");
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Env-mutating tests share this lock.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.synthesis.similarity_threshold, 0.85);
        assert_eq!(cfg.synthesis.content_threshold, 2000);
        assert_eq!(cfg.synthesis.target_minimum_axioms, 3);
        assert_eq!(cfg.synthesis.classifier, "cosine");
        assert_eq!(cfg.guardrails.cognitive_load_ceiling, 25);
        assert_eq!(cfg.notation.format, "native");
        assert_eq!(cfg.paths.output_path, "SOUL.md");
        assert!(!cfg.vcs.auto_commit);
        assert_eq!(cfg.telemetry.log_level, "info");
        cfg.validate().unwrap();
    }

    // ── load_from ──────────────────────────────────────────────────────────

    #[test]
    fn load_from_missing_file_returns_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = TempDir::new().unwrap();
        let cfg = AppConfig::load_from(dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn load_from_partial_toml_fills_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("soul.toml");
        fs::write(
            &path,
            r#"
[synthesis]
similarity_threshold = 0.7
classifier = "lexical"

[notation]
format = "math-emoji"

[vcs]
auto_commit = true
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.synthesis.similarity_threshold, 0.7);
        assert_eq!(cfg.synthesis.classifier, "lexical");
        assert_eq!(cfg.synthesis.content_threshold, 2000);
        assert_eq!(cfg.notation.format, "math-emoji");
        assert!(cfg.vcs.auto_commit);
        assert_eq!(cfg.paths.data_dir, ".soul");
    }

    #[test]
    fn load_from_invalid_toml_returns_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("range.toml");
        fs::write(&path, "[synthesis]\nsimilarity_threshold = 1.5\n").unwrap();
        assert!(AppConfig::load_from(&path).is_err());

        fs::write(&path, "[notation]\nformat = \"klingon\"\n").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    // ── save_to + roundtrip ────────────────────────────────────────────────

    #[test]
    fn save_and_reload_roundtrip() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub/soul.toml");

        let mut cfg = AppConfig::default();
        cfg.synthesis.content_threshold = 500;
        cfg.notation.format = "labeled".to_string();
        cfg.paths.memory_dir = "notes".to_string();

        cfg.save_to(&path).unwrap();
        assert!(path.exists());
        assert_eq!(AppConfig::load_from(&path).unwrap(), cfg);
    }

    // ── Env var overrides ──────────────────────────────────────────────────

    #[test]
    fn env_overrides_take_precedence() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("env.toml");
        fs::write(&path, "[synthesis]\ncontent_threshold = 9000\n").unwrap();

        // SAFETY: env mutation is serialized by ENV_LOCK.
        unsafe {
            env::set_var("SOUL_CONTENT_THRESHOLD", "100");
            env::set_var("SOUL_OUTPUT_PATH", "out/SOUL.md");
        }
        let cfg = AppConfig::load_from(&path);
        unsafe {
            env::remove_var("SOUL_CONTENT_THRESHOLD");
            env::remove_var("SOUL_OUTPUT_PATH");
        }
        let cfg = cfg.unwrap();
        assert_eq!(cfg.synthesis.content_threshold, 100);
        assert_eq!(cfg.paths.output_path, "out/SOUL.md");
    }

    #[test]
    fn malformed_env_override_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = TempDir::new().unwrap();
        // SAFETY: env mutation is serialized by ENV_LOCK.
        unsafe { env::set_var("SOUL_SIMILARITY_THRESHOLD", "high") };
        let result = AppConfig::load_from(dir.path().join("none.toml"));
        unsafe { env::remove_var("SOUL_SIMILARITY_THRESHOLD") };
        assert!(result.is_err());
    }
}
