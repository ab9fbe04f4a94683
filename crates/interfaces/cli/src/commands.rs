use std::io;
use std::io::IsTerminal;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use anyhow::{Result, bail};
use tracing::{info, warn};

use soul_config::AppConfig;
use soul_synthesis::backup::BackupTarget;
use soul_synthesis::compressor::PromotionPolicy;
use soul_synthesis::provenance::ProvenanceChain;
use soul_synthesis::schema::truncate_str;
use soul_synthesis::{
    ArtifactStore, AuditData, ClassifierKind, NotationFormat, PipelinePaths, PipelineSettings, SynthesisOptions,
    SynthesisOutcome, SynthesisPipeline, build_classifier,
};

use crate::vcs;

pub(crate) struct SynthesizeArgs {
    pub force: bool,
    pub dry_run: bool,
    pub format: Option<String>,
    pub diff: bool,
}

fn paths(config: &AppConfig) -> PipelinePaths {
    PipelinePaths {
        data_dir: PathBuf::from(&config.paths.data_dir),
        memory_dir: PathBuf::from(&config.paths.memory_dir),
        document_path: PathBuf::from(&config.paths.output_path),
    }
}

fn parse_format(raw: &str) -> Result<NotationFormat> {
    match NotationFormat::from_label(raw) {
        Some(format) => Ok(format),
        None => bail!("unknown notation format '{raw}' (expected native, labeled, math or math-emoji)"),
    }
}

/// Pick the similarity classifier.  No language model is wired into the
/// binary, so `judgment` falls back to lexical.  The pipeline itself drops
/// `cosine` to lexical when a signal arrives without a vector.
fn classifier_kind(config: &AppConfig) -> Result<ClassifierKind> {
    let Some(kind) = ClassifierKind::from_label(&config.synthesis.classifier) else {
        bail!("unknown classifier '{}'", config.synthesis.classifier);
    };
    Ok(match kind {
        ClassifierKind::Judgment => {
            warn!("judgment classifier needs a language model; using lexical similarity");
            ClassifierKind::Lexical
        }
        other => other,
    })
}

fn build_pipeline(config: &AppConfig) -> Result<SynthesisPipeline> {
    let paths = paths(config);
    let classifier = build_classifier(classifier_kind(config)?, None)?;

    let settings = PipelineSettings {
        similarity_threshold: config.synthesis.similarity_threshold,
        content_threshold: config.synthesis.content_threshold,
        collaborator_timeout_secs: config.synthesis.collaborator_timeout_secs,
        policy: PromotionPolicy {
            target_minimum_axioms: config.synthesis.target_minimum_axioms,
            max_axiom_ratio: config.guardrails.max_axiom_ratio,
            cognitive_load_ceiling: config.guardrails.cognitive_load_ceiling,
            notation: parse_format(&config.notation.format)?,
            notation_timeout_secs: config.synthesis.collaborator_timeout_secs,
        },
    };
    Ok(SynthesisPipeline::new(paths, settings, classifier))
}

// ── synthesize ───────────────────────────────────────────────────────────────

pub(crate) async fn run_synthesize(config: &AppConfig, args: SynthesizeArgs) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let options = SynthesisOptions {
        force: args.force,
        dry_run: args.dry_run,
        format: args.format.as_deref().map(parse_format).transpose()?,
        diff: args.diff,
    };

    // Ctrl-C only takes effect before the backup commits.
    let cancel = pipeline.cancel_handle();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.store(true, Ordering::SeqCst);
        }
    });
    let outcome = pipeline.run(&options).await;
    watcher.abort();

    match outcome? {
        SynthesisOutcome::Skipped {
            pending_chars,
            threshold,
        } => {
            println!("── synthesis skipped ────────────────────────────────");
            println!("  new content: {pending_chars} chars (threshold {threshold})");
            println!("  pass --force to run anyway");
        }
        SynthesisOutcome::DryRun(report) => {
            print_report(&report);
            if let Some(diff) = &report.diff {
                print_diff(diff);
            }
            println!();
            println!("dry run: nothing written");
        }
        SynthesisOutcome::Written {
            report,
            backup_id,
            document_path,
        } => {
            print_report(&report);
            if let Some(diff) = &report.diff {
                print_diff(diff);
            }
            println!();
            println!("wrote {} (backup {backup_id})", document_path.display());

            if config.vcs.auto_commit {
                let data_dir = pipeline.artifacts().dir().to_path_buf();
                let tracked = vec![document_path.clone(), data_dir];
                match vcs::auto_commit(Path::new("."), &tracked, report.axioms.len()).await {
                    Ok(true) => println!("committed: {}", vcs::commit_message(report.axioms.len())),
                    Ok(false) => {}
                    Err(err) => warn!(%err, "auto-commit failed"),
                }
            }
        }
    }
    Ok(())
}

fn print_report(report: &soul_synthesis::pipeline::RunReport) {
    let m = &report.metrics;
    println!("── synthesis ────────────────────────────────────────");
    println!("  signals:    {} total, {} new, {} skipped", m.signals_total, m.signals_ingested, m.signals_skipped);
    println!("  principles: {}", m.principles);
    println!("  axioms:     {} (core {}, domain {}, emerging {})", m.axioms, m.core, m.domain, m.emerging);
    if let Some(floor) = m.cascade_floor {
        println!("  cascade:    N>={floor}");
    }
    if let Some(ratio) = m.compression_ratio() {
        println!("  compression: {ratio:.1}:1");
    }

    if !report.warnings.is_empty() {
        println!();
        println!("── warnings ─────────────────────────────────────────");
        for w in &report.warnings {
            println!("  ⚠ {}", w.message());
        }
    }
    if !report.skipped.is_empty() {
        println!();
        println!("── skipped signals ──────────────────────────────────");
        for s in &report.skipped {
            println!("  {}: {}", s.signal_id, s.reason);
        }
    }
}

fn print_diff(diff: &str) {
    println!();
    println!("── diff ─────────────────────────────────────────────");
    if diff.is_empty() {
        println!("  (no changes)");
    } else {
        print!("{diff}");
    }
}

// ── status ───────────────────────────────────────────────────────────────────

pub(crate) async fn run_status(config: &AppConfig, verbose: bool) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    let status = pipeline.status().await?;

    println!("── soul status ──────────────────────────────────────");
    match status.state.last_run_at {
        Some(at) => println!("  last run:      {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("  last run:      never"),
    }
    println!("  processed:     {} chars", status.state.processed_chars);
    println!("  memory now:    {} chars in {} file(s)", status.content.total_chars, status.content.sources.len());
    println!(
        "  pending:       {} chars (threshold {}) → {}",
        status.pending_chars,
        status.threshold,
        if status.would_run { "ready" } else { "waiting" }
    );
    println!("  backups:       {}", status.backups.len());
    match &status.document_problem {
        None => println!("  document:      ok"),
        Some(problem) => {
            println!("  document:      ⚠ {problem}");
            println!("                 run `soul rollback` to restore a known-good document");
        }
    }

    if verbose {
        if let Some(m) = &status.state.last_metrics {
            println!();
            println!("── last run ─────────────────────────────────────────");
            println!("  signals:    {} ({} skipped)", m.signals_total, m.signals_skipped);
            println!("  principles: {}", m.principles);
            println!("  axioms:     {} (core {}, domain {}, emerging {})", m.axioms, m.core, m.domain, m.emerging);
            println!("  warnings:   {}", m.warnings);
        }
        println!();
        println!("── changed sources ──────────────────────────────────");
        if status.changed_sources.is_empty() {
            println!("  (none)");
        }
        for source in &status.changed_sources {
            let chars = status.content.sources.get(source).map(|c| c.chars).unwrap_or(0);
            println!("  {source} ({chars} chars)");
        }
    }
    Ok(())
}

// ── rollback ─────────────────────────────────────────────────────────────────

pub(crate) async fn run_rollback_list(config: &AppConfig) -> Result<()> {
    let backups = ArtifactStore::new(&config.paths.data_dir).backups().list().await?;
    println!("── backups ──────────────────────────────────────────");
    if backups.is_empty() {
        println!("  (none)");
    }
    for entry in &backups {
        println!("  {}  {:>8} bytes", entry.id, entry.size);
    }
    Ok(())
}

pub(crate) async fn run_rollback(config: &AppConfig, backup_id: Option<&str>, force: bool) -> Result<()> {
    let target = BackupTarget::from_arg(backup_id);
    let artifacts = ArtifactStore::new(&config.paths.data_dir);
    let entry = artifacts.backups().resolve(&target).await?;

    println!("⚠️  destructive operation: rollback");
    println!("- document: {}", config.paths.output_path);
    println!("- restore backup: {} ({} bytes)", entry.id, entry.size);

    if !force {
        if !io::stdin().is_terminal() {
            bail!("refusing rollback in non-interactive mode without --force");
        }
        print!("This replaces the current document. Type 'ROLLBACK' to continue: ");
        io::stdout().flush()?;

        let mut confirmation = String::new();
        io::stdin().read_line(&mut confirmation)?;
        if confirmation.trim() != "ROLLBACK" {
            println!("rollback cancelled");
            return Ok(());
        }
    }

    let restored = artifacts
        .rollback(&BackupTarget::Id(entry.id.clone()), Path::new(&config.paths.output_path))
        .await?;
    info!(backup_id = %restored.entry.id, "rollback complete");
    println!("restored {} from backup {}", config.paths.output_path, restored.entry.id);
    Ok(())
}

// ── audit / trace ────────────────────────────────────────────────────────────

pub(crate) async fn run_audit(config: &AppConfig, list: bool, stats: bool, axiom_id: Option<&str>) -> Result<()> {
    let data = ArtifactStore::new(&config.paths.data_dir).audit_data().await?;
    warn_on_drift(&data);

    if let Some(key) = axiom_id {
        print_chain(&data.chain(key)?);
        return Ok(());
    }

    if list || !stats {
        println!("── axioms ───────────────────────────────────────────");
        if data.axioms.is_empty() {
            println!("  (none) run `soul synthesize` first");
        }
        for axiom in &data.axioms {
            println!(
                "  {:<2} {:<8} [{:<8}] n={:<3} {}",
                axiom.symbol.as_deref().unwrap_or("·"),
                axiom.id_short(),
                axiom.tier.slug(),
                axiom.n_count,
                truncate_str(&axiom.text, 72)
            );
        }
    }

    if stats {
        let s = data.stats();
        println!("── audit stats ──────────────────────────────────────");
        println!("  axioms:      {}", s.axioms);
        for (tier, count) in &s.by_tier {
            println!("    {}: {count}", tier.slug());
        }
        println!("  principles:  {} ({} not promoted)", s.principles, s.unpromoted_principles);
        println!("  signals:     {}", s.signals);
        if let Some(ratio) = s.compression_ratio {
            println!("  compression: {ratio:.1}:1");
        }
        println!("  broken links: {}", s.broken_links);
        println!("  drifted chains: {}", s.drifted_chains);
        println!("── by dimension ─────────────────────────────────────");
        for (dimension, count) in &s.by_dimension {
            println!("  {}: {count}", dimension.label());
        }
    }
    Ok(())
}

fn warn_on_drift(data: &AuditData) {
    let drifted = data.drifted();
    if !drifted.is_empty() {
        warn!(axioms = drifted.len(), "provenance changed since the document was written");
        println!(
            "⚠ {} axiom(s) no longer match the provenance recorded with the document; rerun `soul synthesize`",
            drifted.len()
        );
    }
}

fn print_chain(chain: &ProvenanceChain) {
    println!("── provenance {} ──", chain.axiom_id);
    println!("  [{}] {}", chain.tier.slug(), chain.axiom_text);
    for principle in &chain.principles {
        println!("  ├─ {} (n={}) {}", principle.principle_id, principle.n_count, truncate_str(&principle.text, 60));
        for source in &principle.sources {
            println!(
                "  │   └─ {}:{} @ {}  \"{}\"",
                source.file,
                source.line,
                source.extracted_at.format("%Y-%m-%d"),
                truncate_str(&source.text, 48)
            );
        }
    }
    for broken in &chain.broken_links {
        println!("  ⚠ missing {:?} {} (referenced by {})", broken.kind, broken.missing_id, broken.referenced_by);
    }
}

pub(crate) async fn run_trace(config: &AppConfig, axiom_id: &str) -> Result<()> {
    let data = ArtifactStore::new(&config.paths.data_dir).audit_data().await?;
    warn_on_drift(&data);
    let path = data.trace(axiom_id)?;

    println!("── trace {} ──", path.symbol.as_deref().unwrap_or(&path.axiom_id));
    println!("  axiom:     [{}] {}", path.tier.slug(), path.axiom_text);
    match &path.principle {
        Some(p) => println!("  principle: {} (n={}) {}", p.principle_id, p.n_count, p.text),
        None => println!("  principle: (unresolved)"),
    }
    for source in &path.sources {
        println!("  source:    {}:{}  \"{}\"", source.file, source.line, truncate_str(&source.text, 60));
    }
    for broken in &path.broken_links {
        println!("  ⚠ missing {:?} {}", broken.kind, broken.missing_id);
    }
    Ok(())
}

// ── config ───────────────────────────────────────────────────────────────────

pub(crate) fn run_config(config: &AppConfig, path: &Path, write: bool) -> Result<()> {
    if write {
        config.save_to(path)?;
        println!("wrote {}", path.display());
    } else {
        print!("{}", config.to_toml()?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn judgment_falls_back_without_a_model() {
        let mut config = AppConfig::default();
        assert_eq!(classifier_kind(&config).unwrap(), ClassifierKind::Cosine);
        config.synthesis.classifier = "judgment".into();
        assert_eq!(classifier_kind(&config).unwrap(), ClassifierKind::Lexical);
        config.synthesis.classifier = "lexical".into();
        assert_eq!(classifier_kind(&config).unwrap(), ClassifierKind::Lexical);
    }

    #[test]
    fn format_parsing_accepts_aliases() {
        assert_eq!(parse_format("cjk-math").unwrap(), NotationFormat::Math);
        assert!(parse_format("sanskrit").is_err());
    }

    #[tokio::test]
    async fn rollback_and_status_survive_malformed_signals() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.paths.data_dir = dir.path().join(".soul").to_string_lossy().to_string();
        config.paths.memory_dir = dir.path().join("memory").to_string_lossy().to_string();
        config.paths.output_path = dir.path().join("SOUL.md").to_string_lossy().to_string();

        let artifacts = ArtifactStore::new(&config.paths.data_dir);
        let doc = PathBuf::from(&config.paths.output_path);
        std::fs::write(&doc, "known good").unwrap();
        let receipt = artifacts.backups().backup(&doc, &artifacts.versioned_paths()).await.unwrap();
        artifacts.backups().write_document(receipt, b"broken").await.unwrap();
        std::fs::write(artifacts.path(soul_synthesis::artifacts::SIGNALS_FILE), "[{\"id\": 1}]").unwrap();

        run_status(&config, false).await.unwrap();
        run_rollback(&config, None, true).await.unwrap();
        assert_eq!(std::fs::read_to_string(&doc).unwrap(), "known good");
    }
}
