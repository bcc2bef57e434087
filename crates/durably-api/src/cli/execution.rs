//! CLI execution subcommands.
//!
//! Start approval-workflow executions, deliver callback reports by hand,
//! re-invoke suspended executions and inspect checkpoint logs.

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::{Value, json};

use durably_core::repository::idempotency::IdempotencyStore;
use durably_core::workflow::{CallbackReport, ExecutionEvent, RunOutcome};
use durably_types::execution::{
    Checkpoint, CheckpointOutcome, Execution, ExecutionId, ExecutionStatus, PendingWait,
};

use crate::state::AppState;

fn parse_id(raw: &str) -> Result<ExecutionId> {
    raw.parse()
        .with_context(|| format!("Invalid execution ID: '{raw}'"))
}

fn parse_json(raw: &str, what: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("{what} is not valid JSON"))
}

/// The report `durably approve` delivers.
fn approval_report(payload: Option<&str>, command: bool) -> Result<CallbackReport> {
    let value = match payload {
        Some(raw) => parse_json(raw, "--payload")?,
        None if command => json!({ "success": true }),
        None => json!({ "approved": true }),
    };
    Ok(CallbackReport::Success(value))
}

fn format_status(status: ExecutionStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        ExecutionStatus::Running => cell.fg(Color::Yellow),
        ExecutionStatus::Succeeded => cell.fg(Color::Green),
        ExecutionStatus::Failed => cell.fg(Color::Red),
    }
}

fn short_id(id: &ExecutionId) -> String {
    id.to_string().chars().take(8).collect()
}

fn print_outcome(id: &ExecutionId, outcome: &RunOutcome, json: bool) -> Result<()> {
    if json {
        let mut value = serde_json::to_value(outcome)?;
        if let Some(map) = value.as_object_mut() {
            map.insert("executionId".to_string(), json!(id));
        }
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!();
    match outcome {
        RunOutcome::Suspended { waits } => {
            println!(
                "  {} Execution {} suspended",
                style("…").yellow().bold(),
                style(id).cyan()
            );
            for wait in waits {
                print_wait(wait);
            }
        }
        RunOutcome::Succeeded { result } => {
            println!(
                "  {} Execution {} succeeded",
                style("✓").green().bold(),
                style(id).cyan()
            );
            println!("  Result: {result}");
        }
        RunOutcome::Failed { error } => {
            println!(
                "  {} Execution {} failed",
                style("✗").red().bold(),
                style(id).cyan()
            );
            println!("  Error: {}", style(error).red());
        }
    }
    println!();
    Ok(())
}

fn print_wait(wait: &PendingWait) {
    let mut line = format!("  - {} ({})", style(&wait.name).bold(), wait.kind);
    if let Some(token) = &wait.callback_token {
        line.push_str(&format!(" token {}", style(token).yellow()));
    }
    if let Some(at) = wait.wake_at {
        line.push_str(&format!(" wakes {}", at.format("%Y-%m-%d %H:%M:%S")));
    }
    if let Some(deadline) = wait.deadline {
        line.push_str(&format!(" deadline {}", deadline.format("%Y-%m-%d %H:%M:%S")));
    }
    println!("{line}");
}

// ---------------------------------------------------------------------------
// Start / report / wake
// ---------------------------------------------------------------------------

/// `durably start [--input JSON]`
pub async fn start(state: &AppState, input: Option<&str>, json: bool) -> Result<()> {
    let input = match input {
        Some(raw) => parse_json(raw, "--input")?,
        None => json!({}),
    };
    let (id, outcome) = state.engine.start(state.workflow.as_ref(), input).await?;
    print_outcome(&id, &outcome, json)
}

/// `durably approve <token> [--payload JSON | --command]`
pub async fn approve(
    state: &AppState,
    token: &str,
    payload: Option<&str>,
    command: bool,
    json: bool,
) -> Result<()> {
    let report = approval_report(payload, command)?;
    let (id, outcome) = state
        .engine
        .deliver(state.workflow.as_ref(), token, report)
        .await?;
    print_outcome(&id, &outcome, json)
}

/// `durably reject <token> [--reason R]`
pub async fn reject(state: &AppState, token: &str, reason: Option<String>, json: bool) -> Result<()> {
    let (id, outcome) = state
        .engine
        .deliver(state.workflow.as_ref(), token, CallbackReport::Failure(reason))
        .await?;
    print_outcome(&id, &outcome, json)
}

/// `durably wake [<execution_id>]`
pub async fn wake(state: &AppState, execution_id: Option<&str>, json: bool) -> Result<()> {
    if let Some(raw) = execution_id {
        let id = parse_id(raw)?;
        let outcome = state
            .engine
            .run(state.workflow.as_ref(), &id, Some(ExecutionEvent::Wake))
            .await?;
        return print_outcome(&id, &outcome, json);
    }

    let woken = state.engine.wake_due(state.workflow.as_ref()).await?;
    if json {
        let out: Vec<_> = woken
            .iter()
            .map(|(id, outcome)| json!({ "executionId": id, "outcome": outcome.label() }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    if woken.is_empty() {
        println!("  No executions are due.");
    } else {
        for (id, outcome) in &woken {
            println!("  {} {}", style(short_id(id)).cyan(), outcome.label());
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

/// `durably status [<execution_id>] [--status S] [--limit N]`
pub async fn status(
    state: &AppState,
    execution_id: Option<&str>,
    status: Option<&str>,
    limit: u32,
    json: bool,
) -> Result<()> {
    if let Some(raw) = execution_id {
        let id = parse_id(raw)?;
        let execution = state
            .engine
            .repository()
            .get_execution(&id)
            .await?
            .with_context(|| format!("Execution {id} not found"))?;
        return display_execution(&execution, json);
    }

    let status = status
        .map(str::parse::<ExecutionStatus>)
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let executions = state
        .engine
        .repository()
        .list_executions(status, limit)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&executions)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!();
        println!("  No executions found.");
        println!("  Start one with: {}", style("durably start").dim());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Execution").fg(Color::Cyan),
            Cell::new("Workflow"),
            Cell::new("Status"),
            Cell::new("Started"),
            Cell::new("Completed"),
        ]);

    for e in &executions {
        let completed = e
            .completed_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(e.id.to_string()),
            Cell::new(&e.workflow_name),
            format_status(e.status),
            Cell::new(e.started_at.format("%Y-%m-%d %H:%M").to_string()),
            Cell::new(completed),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn display_execution(execution: &Execution, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(execution)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {}",
        style("Execution:").bold(),
        style(execution.id).cyan()
    );
    println!("  Workflow: {}", execution.workflow_name);
    println!("  Status: {}", execution.status);
    println!("  Started: {}", execution.started_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(completed) = execution.completed_at {
        println!("  Completed: {}", completed.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(result) = &execution.result {
        println!("  Result: {result}");
    }
    if let Some(err) = &execution.error {
        println!("  Error: {}", style(err).red());
    }
    println!();
    Ok(())
}

/// `durably checkpoints <execution_id>`
pub async fn checkpoints(state: &AppState, execution_id: &str, json: bool) -> Result<()> {
    let id = parse_id(execution_id)?;
    let repo = state.engine.repository();
    repo.get_execution(&id)
        .await?
        .with_context(|| format!("Execution {id} not found"))?;
    let log = repo.list_checkpoints(&id).await?;
    let waits = repo.list_pending_waits(&id).await?;

    if json {
        let out = json!({ "checkpoints": log, "pendingWaits": waits });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    if log.is_empty() {
        println!("  No checkpoints recorded for {}.", style(short_id(&id)).cyan());
    } else {
        println!("{}", checkpoint_table(&log));
    }

    if !waits.is_empty() {
        println!();
        println!("  {}", style("── Pending waits ──").dim());
        for wait in &waits {
            print_wait(wait);
        }
    }
    println!();
    Ok(())
}

fn checkpoint_table(log: &[Checkpoint]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Kind"),
            Cell::new("Outcome"),
            Cell::new("Attempts"),
            Cell::new("Detail"),
        ]);

    for c in log {
        let (outcome, detail) = match &c.outcome {
            CheckpointOutcome::Succeeded { result } => {
                (Cell::new("succeeded").fg(Color::Green), result.to_string())
            }
            CheckpointOutcome::Failed { failure } => (
                Cell::new("failed").fg(Color::Red),
                format!("{:?}: {}", failure.kind, failure.message),
            ),
        };
        table.add_row(vec![
            Cell::new(c.seq),
            Cell::new(&c.name),
            Cell::new(c.kind.as_str()),
            outcome,
            Cell::new(c.attempts),
            Cell::new(detail),
        ]);
    }
    table
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

/// `durably purge-markers`
pub async fn purge_markers(state: &AppState, json: bool) -> Result<()> {
    let removed = state
        .markers
        .purge_expired(state.engine.clock().now())
        .await?;
    tracing::info!(removed, "purged expired idempotency markers");

    if json {
        println!("{}", serde_json::to_string_pretty(&json!({ "removed": removed }))?);
    } else {
        println!();
        println!(
            "  {} Removed {} expired marker(s)",
            style("✓").green().bold(),
            removed
        );
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use durably_core::workflow::NoopWakeScheduler;

    use super::*;

    #[test]
    fn approval_report_defaults() {
        assert_eq!(
            approval_report(None, false).unwrap(),
            CallbackReport::Success(json!({"approved": true}))
        );
        assert_eq!(
            approval_report(None, true).unwrap(),
            CallbackReport::Success(json!({"success": true}))
        );
        assert_eq!(
            approval_report(Some(r#"{"approved":false}"#), false).unwrap(),
            CallbackReport::Success(json!({"approved": false}))
        );
        assert!(approval_report(Some("not json"), false).is_err());
    }

    #[test]
    fn invalid_execution_id_is_rejected() {
        assert!(parse_id("nope").is_err());
    }

    #[tokio::test]
    async fn commands_drive_an_execution_to_rejection() {
        let state = AppState::for_tests(Arc::new(NoopWakeScheduler)).await;
        start(&state, Some(r#"{"origin":"cli"}"#), true).await.unwrap();

        let executions = state
            .engine
            .repository()
            .list_executions(None, 10)
            .await
            .unwrap();
        assert_eq!(executions.len(), 1);
        let id = executions[0].id;
        assert_eq!(executions[0].input, json!({"origin": "cli"}));

        let waits = state.engine.repository().list_pending_waits(&id).await.unwrap();
        let token = waits[0].callback_token.clone().unwrap();
        reject(&state, &token, Some("not today".to_string()), true)
            .await
            .unwrap();

        let execution = state
            .engine
            .repository()
            .get_execution(&id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);

        // The token is resolved now.
        assert!(approve(&state, &token, None, false, true).await.is_err());

        checkpoints(&state, &id.to_string(), true).await.unwrap();
        status(&state, None, Some("failed"), 5, true).await.unwrap();
        assert!(status(&state, None, Some("bogus"), 5, true).await.is_err());
        purge_markers(&state, true).await.unwrap();
        wake(&state, None, true).await.unwrap();
    }
}
