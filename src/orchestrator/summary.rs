// azmigrate/src/orchestrator/summary.rs
use std::fmt::Write;

use super::WorkflowOutcome;

const UNIT_WIDTH: usize = 48;

fn clip(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let kept: String = text.chars().take(width.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}

/// Human-readable end-of-run summary printed to stdout.
pub fn render_summary(outcome: &WorkflowOutcome) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n=== {} summary ===", outcome.workflow);

    if let Some(fatal) = &outcome.fatal {
        let _ = writeln!(
            out,
            "❌ aborted during {} [{}]: {}",
            fatal.stage, fatal.code, fatal.message
        );
    }

    if let Some(plan) = &outcome.plan {
        let _ = writeln!(out, "\nPlan ({} unit(s)):", plan.len());
        for entry in plan.entries() {
            let _ = writeln!(
                out,
                "  {:<width$} {}",
                clip(&entry.unit.identity(), UNIT_WIDTH),
                entry.reason,
                width = UNIT_WIDTH
            );
        }
    }

    if !outcome.report.results.is_empty() {
        let _ = writeln!(
            out,
            "\n  {:<width$} {:<10} {:>8} {:>10}  DETAIL",
            "UNIT",
            "STATUS",
            "ATTEMPTS",
            "TIME(ms)",
            width = UNIT_WIDTH
        );
        for result in &outcome.report.results {
            let _ = writeln!(
                out,
                "  {:<width$} {:<10} {:>8} {:>10}  {}",
                clip(&result.unit, UNIT_WIDTH),
                result.status,
                result.attempts,
                result.duration_ms,
                result.error.as_deref().unwrap_or(""),
                width = UNIT_WIDTH
            );
        }
    }

    if !outcome.reconciliations.is_empty() {
        let _ = writeln!(out, "\nVerification:");
        for finding in &outcome.reconciliations {
            let mark = if finding.matched { "✓" } else { "✗" };
            let _ = writeln!(
                out,
                "  {} {:<width$} {}",
                mark,
                clip(&finding.unit, UNIT_WIDTH),
                finding.detail,
                width = UNIT_WIDTH
            );
        }
    }

    let counts = &outcome.report.counts;
    let _ = writeln!(
        out,
        "\nTotal: {}  Succeeded: {}  Failed: {}  Skipped: {}  Mismatches: {}{}",
        counts.total,
        counts.succeeded,
        counts.failed,
        counts.skipped,
        outcome.mismatches(),
        if outcome.report.cancelled { "  (cancelled)" } else { "" }
    );
    let verdict = if outcome.is_success() {
        "✅ completed successfully"
    } else {
        "❌ completed with problems"
    };
    let _ = writeln!(out, "{}", verdict);
    out
}
