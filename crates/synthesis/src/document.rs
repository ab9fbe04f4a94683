//! Soul document rendering and line diffs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::provenance::ProvenanceChain;
use crate::schema::{Axiom, AxiomTier, NotationFormat};
use crate::state::RunMetrics;

pub const DOCUMENT_TITLE: &str = "# SOUL";

pub struct DocumentInput<'a> {
    pub axioms: &'a [Axiom],
    pub chains: &'a [ProvenanceChain],
    pub metrics: &'a RunMetrics,
    pub format: NotationFormat,
    pub generated_at: DateTime<Utc>,
}

/// Render the full document: title, tier sections, provenance, metrics.
pub fn render(input: &DocumentInput<'_>) -> String {
    let mut content = String::new();
    content.push_str(DOCUMENT_TITLE);
    content.push_str("\n\n");
    content.push_str(&format!(
        "_Generated {} · notation: {}_\n",
        input.generated_at.format("%Y-%m-%d %H:%M UTC"),
        input.format.slug()
    ));

    for tier in [AxiomTier::Core, AxiomTier::Domain, AxiomTier::Emerging] {
        content.push_str(&format!("\n## {} Axioms\n\n", tier.label()));
        let mut any = false;
        for axiom in input.axioms.iter().filter(|a| a.tier == tier) {
            any = true;
            content.push_str(&format!(
                "- **{}** {} _(n={}, {})_ `{}`\n",
                axiom.symbol.as_deref().unwrap_or("·"),
                axiom.canonical.render(input.format),
                axiom.n_count,
                axiom.dimension.label(),
                axiom.id_short(),
            ));
        }
        if !any {
            content.push_str("(none)\n");
        }
    }

    content.push_str("\n## Provenance\n\n");
    if input.axioms.is_empty() {
        content.push_str("(none)\n");
    }
    let chains: HashMap<&str, &ProvenanceChain> =
        input.chains.iter().map(|c| (c.axiom_id.as_str(), c)).collect();
    for axiom in input.axioms {
        let label = axiom.symbol.as_deref().unwrap_or_else(|| axiom.id_short());
        match chains.get(axiom.id.as_str()) {
            Some(chain) => {
                let files = chain.distinct_files();
                content.push_str(&format!(
                    "- {label}: {} principle(s), {} signal(s), {} source file(s)",
                    chain.principles.len(),
                    chain.signal_count(),
                    files.len(),
                ));
                if !files.is_empty() {
                    let listed: Vec<&str> = files.into_iter().collect();
                    content.push_str(&format!(" [{}]", listed.join(", ")));
                }
                if !chain.is_intact() {
                    content.push_str(&format!(" ⚠ {} broken link(s)", chain.broken_links.len()));
                }
                content.push('\n');
            }
            None => content.push_str(&format!("- {label}: provenance unavailable\n")),
        }
    }

    let m = input.metrics;
    content.push_str("\n## Metrics\n\n");
    content.push_str(&format!("- Signals: {} ingested, {} skipped\n", m.signals_ingested, m.signals_skipped));
    content.push_str(&format!("- Principles: {}\n", m.principles));
    content.push_str(&format!(
        "- Axioms: {} (core {}, domain {}, emerging {})\n",
        m.axioms, m.core, m.domain, m.emerging
    ));
    if let Some(ratio) = m.compression_ratio() {
        content.push_str(&format!("- Compression: {ratio:.1}:1\n"));
    }
    if let Some(floor) = m.cascade_floor {
        content.push_str(&format!("- Cascade floor: N≥{floor}\n"));
    }
    content.push_str(&format!("- Content processed: {} chars\n", m.content_chars));
    content
}

// ── Diff ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffLine<'a> {
    Same(&'a str),
    Added(&'a str),
    Removed(&'a str),
}

/// Line-level diff via longest common subsequence.
pub fn line_diff<'a>(old: &'a str, new: &'a str) -> Vec<DiffLine<'a>> {
    let a: Vec<&str> = old.lines().collect();
    let b: Vec<&str> = new.lines().collect();
    let (m, n) = (a.len(), b.len());

    // dp[i][j] = LCS length of a[i..] and b[j..]
    let mut dp = vec![vec![0usize; n + 1]; m + 1];
    for i in (0..m).rev() {
        for j in (0..n).rev() {
            dp[i][j] = if a[i] == b[j] {
                dp[i + 1][j + 1] + 1
            } else {
                dp[i + 1][j].max(dp[i][j + 1])
            };
        }
    }

    let mut out = Vec::with_capacity(m.max(n));
    let (mut i, mut j) = (0, 0);
    while i < m && j < n {
        if a[i] == b[j] {
            out.push(DiffLine::Same(a[i]));
            i += 1;
            j += 1;
        } else if dp[i + 1][j] >= dp[i][j + 1] {
            out.push(DiffLine::Removed(a[i]));
            i += 1;
        } else {
            out.push(DiffLine::Added(b[j]));
            j += 1;
        }
    }
    out.extend(a[i..].iter().copied().map(DiffLine::Removed));
    out.extend(b[j..].iter().copied().map(DiffLine::Added));
    out
}

/// Only the changed lines, `+`/`-` prefixed.
pub fn format_diff(diff: &[DiffLine<'_>]) -> String {
    let mut out = String::new();
    for line in diff {
        match line {
            DiffLine::Same(_) => {}
            DiffLine::Added(l) => {
                out.push_str("+ ");
                out.push_str(l);
                out.push('\n');
            }
            DiffLine::Removed(l) => {
                out.push_str("- ");
                out.push_str(l);
                out.push('\n');
            }
        }
    }
    out
}
