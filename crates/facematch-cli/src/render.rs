//! Terminal output. Every function returns the text; `main` prints it.

use crate::session::{Dashboard, ScanResult, SearchOutcome};
use facematch_core::{ConfidenceTier, FaceRecord, RecordId};
use serde_json::json;

pub fn outcome(outcome: &SearchOutcome) -> String {
    let mut lines = Vec::new();
    for fault in &outcome.faults {
        lines.push(format!(
            "  warning: record {} skipped ({})",
            fault.id, fault.mismatch
        ));
    }

    if outcome.matches.is_empty() {
        lines.push(format!(
            "No similar faces found among {} stored faces.",
            outcome.compared
        ));
        return lines.join("\n");
    }

    lines.push(format!(
        "{} similar face(s) among {} compared:",
        outcome.matches.len(),
        outcome.compared
    ));
    for (rank, m) in outcome.matches.iter().enumerate() {
        lines.push(format!(
            "  {:>2}. #{:<6} distance {:.4}  {:<16} {}",
            rank + 1,
            m.id,
            m.distance,
            m.tier.label(),
            m.timestamp
        ));
        let preview: Vec<String> = m.preview.iter().map(|v| format!("{v:.3}")).collect();
        lines.push(format!("      [{} ...]", preview.join(", ")));
    }
    lines.join("\n")
}

pub fn scan_result(result: &ScanResult) -> String {
    [
        format!("Scan #{}", result.record.id),
        record_line(&result.record),
        outcome(&result.outcome),
    ]
    .join("\n")
}

pub fn record_line(record: &FaceRecord) -> String {
    let descriptor = match &record.descriptor {
        Some(d) if !d.is_empty() => format!("{} values", d.len()),
        _ => "no descriptor".to_string(),
    };
    format!(
        "  #{:<6} {:<24} {:<8} {}",
        record.id,
        record.timestamp,
        record.kind.as_deref().unwrap_or("-"),
        descriptor
    )
}

/// Single JSON document for `--json enroll`: the new id and its matches.
pub fn enrolled_json(id: RecordId, outcome: &SearchOutcome) -> serde_json::Value {
    json!({
        "id": id,
        "matches": outcome.matches,
    })
}

pub fn dashboard(dashboard: &Dashboard) -> String {
    let mut lines = vec![format!("Total faces: {}", dashboard.total), String::new()];

    lines.push("Recent activity:".to_string());
    if dashboard.recent.is_empty() {
        lines.push("  none yet".to_string());
    }
    lines.extend(dashboard.recent.iter().map(record_line));

    lines.push(String::new());
    lines.push(format!(
        "Scans over the last {} days:",
        dashboard.daily_scans.len()
    ));
    for (day, count) in &dashboard.daily_scans {
        lines.push(format!("  {day}  {:>4}  {}", count, "#".repeat(*count)));
    }

    lines.push(String::new());
    lines.push("Closest-match quality:".to_string());
    for tier in ConfidenceTier::ALL {
        lines.push(format!("  {:<16} {}", tier.label(), dashboard.tiers.get(tier)));
    }
    if let Some(rate) = dashboard.tiers.excellent_rate() {
        lines.push(format!("  excellent rate   {rate:.1}%"));
    }
    if dashboard.corrupt > 0 {
        lines.push(format!(
            "  {} record(s) with a descriptor of the wrong length",
            dashboard.corrupt
        ));
    }
    lines.join("\n")
}
