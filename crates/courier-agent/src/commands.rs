//! `courier runs` subcommands. Each returns the text to print.

use anyhow::{Result, bail};
use courier_core::format::format_duration_short;
use courier_core::{RunId, SubagentRunRecord, now_ms};
use courier_runtime::{SubagentRegistry, build_stats_line};

fn status(record: &SubagentRunRecord) -> &'static str {
    match (&record.outcome, record.ended_at) {
        (_, None) => "running",
        (Some(outcome), Some(_)) => match outcome.status {
            courier_core::RunStatus::Ok => "ok",
            courier_core::RunStatus::Error => "error",
            courier_core::RunStatus::Timeout => "timeout",
            courier_core::RunStatus::Unknown => "unknown",
        },
        (None, Some(_)) => "unknown",
    }
}

fn row(record: &SubagentRunRecord, now: i64) -> String {
    let runtime = format_duration_short(record.elapsed_ms(now));
    format!(
        "{}\t{}\t{}\t{}\t{}",
        record.run_id,
        status(record),
        runtime,
        record.requester_session_key,
        record.display_label()
    )
}

/// One line per run, oldest first.
pub fn list(registry: &SubagentRegistry, requester: Option<&str>) -> String {
    let runs = match requester {
        Some(key) => registry.list_runs_for_requester(key),
        None => registry.list_runs(),
    };
    if runs.is_empty() {
        return "No subagent runs.".to_owned();
    }
    let now = now_ms();
    runs.iter().map(|r| row(r, now)).collect::<Vec<_>>().join("\n")
}

/// Full record as pretty JSON plus its stats line.
pub fn show(registry: &SubagentRegistry, run_id: &str) -> Result<String> {
    let Some(record) = registry.get_run(&RunId::from(run_id)) else {
        bail!("No subagent run with id {run_id}");
    };
    let json = serde_json::to_string_pretty(&record)?;
    Ok(format!("{json}\n{}", build_stats_line(&record, now_ms())))
}

/// Remove a run.
pub fn delete(registry: &SubagentRegistry, run_id: &str) -> Result<String> {
    match registry.delete_run(&RunId::from(run_id)) {
        Some(record) => Ok(format!("Deleted run {} ({})", record.run_id, record.display_label())),
        None => bail!("No subagent run with id {run_id}"),
    }
}

/// Evict expired runs now.
pub async fn sweep(registry: &SubagentRegistry) -> String {
    let evicted = registry.sweep().await;
    match evicted.len() {
        0 => "No expired runs.".to_owned(),
        n => {
            let ids: Vec<&str> = evicted.iter().map(|r| r.run_id.as_str()).collect();
            format!("Archived {n} run(s): {}", ids.join(", "))
        }
    }
}
