//! Report rendering

use std::fmt::Write as _;

use gpuval_core::{ProbeResult, ProbeStatus, ResultLedger};

pub fn glyph(status: ProbeStatus) -> &'static str {
    match status {
        ProbeStatus::Passed => "✅",
        ProbeStatus::Failed => "❌",
        ProbeStatus::Warning => "⚠️",
        ProbeStatus::Unknown => "❓",
    }
}

fn render_line(out: &mut String, result: &ProbeResult, verbose: bool) {
    let _ = writeln!(out, "{} {}: {}", glyph(result.status), result.name, result.message);
    if verbose && !result.detail.is_empty() {
        for line in result.detail.to_string().lines() {
            let _ = writeln!(out, "    {}", line);
        }
    }
}

/// One glyph line per ledger entry, in ledger order
pub fn render_text(ledger: &ResultLedger, verbose: bool) -> String {
    let mut out = String::new();
    for result in ledger {
        render_line(&mut out, result, verbose);
    }
    let _ = writeln!(
        out,
        "\n{} passed, {} failed, {} warnings, {} unknown",
        ledger.count(ProbeStatus::Passed),
        ledger.count(ProbeStatus::Failed),
        ledger.count(ProbeStatus::Warning),
        ledger.count(ProbeStatus::Unknown),
    );
    out
}

pub fn render_json(ledger: &ResultLedger) -> serde_json::Result<String> {
    serde_json::to_string_pretty(ledger)
}
