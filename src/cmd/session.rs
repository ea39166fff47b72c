//! Thread commands: `tend start`, `resume`, `show`, `threads`, `history`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use tend::blackboard::{Blackboard, Draft, Status};
use tend::capability::command::CommandCapability;
use tend::checkpoint::{Checkpoint, SqliteCheckpointStore};
use tend::config::TendConfig;
use tend::db::DbHandle;
use tend::engine::{GraphEngine, RunOutcome};
use tend::history::SqliteHistory;
use tend::interrupt::Decision;

use super::super::ResumeCommands;

/// Engine over the project's SQLite database and configured agent command.
pub fn open_engine(config: &TendConfig) -> Result<GraphEngine> {
    let db_path = config.db_path();
    let db = DbHandle::open(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    let agent = Arc::new(CommandCapability::new(config.command_config()));

    let engine = GraphEngine::builder(
        agent.clone(),
        agent,
        Arc::new(SqliteCheckpointStore::new(db.clone())),
    )
    .with_history(Arc::new(SqliteHistory::new(db)))
    .with_policy(config.toml.policy())
    .with_config(config.toml.engine_config())
    .build()?;
    Ok(engine)
}

pub async fn cmd_start(config: &TendConfig, intent: &str) -> Result<()> {
    let engine = open_engine(config)?;
    let thread_id = engine.start(intent).await?;
    println!("Thread {}", console::style(&thread_id).bold());

    let outcome = engine.run_to_next_interrupt(&thread_id).await?;
    print_outcome(&thread_id, &outcome)
}

pub async fn cmd_resume(
    config: &TendConfig,
    thread_id: &str,
    command: &ResumeCommands,
) -> Result<()> {
    let decision = match command {
        ResumeCommands::Approve { draft } => Decision::Approve {
            modified_draft: draft.as_deref().map(load_draft).transpose()?,
        },
        ResumeCommands::Revise { feedback } => Decision::Revise {
            feedback: feedback.clone(),
        },
    };

    let engine = open_engine(config)?;
    let checkpoint = engine.interrupts().resume(thread_id, decision).await?;
    println!(
        "Decision recorded. Thread is now {}.",
        console::style(checkpoint.snapshot.status).bold()
    );

    if checkpoint.is_finished() {
        print_final(&checkpoint.snapshot);
        return Ok(());
    }
    let outcome = engine.run_to_next_interrupt(thread_id).await?;
    print_outcome(thread_id, &outcome)
}

pub async fn cmd_show(config: &TendConfig, thread_id: &str, json: bool) -> Result<()> {
    let engine = open_engine(config)?;
    let checkpoint = engine.get(thread_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&checkpoint)?);
        return Ok(());
    }

    print_checkpoint(thread_id, &checkpoint);
    Ok(())
}

pub async fn cmd_threads(config: &TendConfig) -> Result<()> {
    let engine = open_engine(config)?;
    let threads = engine.list().await?;

    if threads.is_empty() {
        println!("No threads yet. Run `tend start \"<request>\"` to open one.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<16}  {:>4}  {:<12}  INTENT",
        "THREAD", "STATUS", "ITER", "NEXT"
    );
    for t in threads {
        let next = if t.pending.is_empty() {
            "-".to_string()
        } else {
            t.pending
                .iter()
                .map(|n| n.as_str())
                .collect::<Vec<_>>()
                .join(",")
        };
        println!(
            "{:<36}  {:<16}  {:>4}  {:<12}  {}",
            t.thread_id,
            t.status.as_str(),
            t.iteration_count,
            next,
            truncate(&t.user_intent, 48)
        );
    }
    Ok(())
}

pub async fn cmd_history(config: &TendConfig) -> Result<()> {
    let engine = open_engine(config)?;
    let entries = engine.history().list().await?;

    if entries.is_empty() {
        println!("No history recorded.");
        return Ok(());
    }

    for entry in entries {
        let status = entry.status.as_str();
        let styled = match entry.status {
            Status::Approved | Status::Completed => console::style(status).green(),
            Status::Failed => console::style(status).red(),
            _ => console::style(status).yellow(),
        };
        println!(
            "{}  {:<16}  {}  {}",
            entry.created_at.format("%Y-%m-%d %H:%M"),
            styled,
            entry.thread_id,
            truncate(&entry.user_intent, 48)
        );
        if let Some(artifact) = entry.final_artifact {
            println!("    {}", console::style(artifact.title).dim());
        }
    }
    Ok(())
}

/// Report where a run stopped. Failed runs exit non-zero.
pub fn print_outcome(thread_id: &str, outcome: &RunOutcome) -> Result<()> {
    match outcome {
        RunOutcome::Interrupted { checkpoint, .. } => {
            let board = &checkpoint.snapshot;
            println!();
            println!(
                "{}",
                console::style("Awaiting human review").bold().cyan()
            );
            print_scores(board);
            if let Some(draft) = &board.current_draft {
                println!();
                print!("{}", draft.to_markdown());
            }
            println!();
            println!("Next steps:");
            println!("  tend resume {} approve [--draft FILE]", thread_id);
            println!("  tend resume {} revise --feedback \"...\"", thread_id);
            Ok(())
        }
        RunOutcome::Finished(checkpoint) => {
            print_final(&checkpoint.snapshot);
            Ok(())
        }
        RunOutcome::Failed { checkpoint, message } => {
            println!(
                "  {} {}",
                console::style("Error:").red().bold(),
                message
            );
            print_scores(&checkpoint.snapshot);
            anyhow::bail!("Thread {} failed: {}", thread_id, message)
        }
    }
}

pub fn print_final(board: &Blackboard) {
    println!();
    println!(
        "{} after {} iteration(s)",
        console::style(format!("Finished: {}", board.status)).bold().green(),
        board.iteration_count
    );
    print_scores(board);
    if let Some(draft) = &board.current_draft {
        println!();
        print!("{}", draft.to_markdown());
    }
}

fn print_scores(board: &Blackboard) {
    let score = |s: Option<u8>| s.map_or("-".to_string(), |v| v.to_string());
    println!(
        "  iteration {}  safety {}  empathy {}",
        board.iteration_count,
        score(board.safety_score),
        score(board.empathy_score)
    );
}

fn print_checkpoint(thread_id: &str, checkpoint: &Checkpoint) {
    let board = &checkpoint.snapshot;
    println!("{}", console::style(format!("Thread {}", thread_id)).bold());
    println!("  intent:  {}", board.user_intent);
    println!("  status:  {}", board.status);
    println!("  step:    {}", checkpoint.step_seq);
    if checkpoint.pending.is_empty() {
        println!("  next:    -");
    } else {
        let next: Vec<_> = checkpoint.pending.iter().map(|n| n.as_str()).collect();
        println!("  next:    {}", next.join(", "));
    }
    print_scores(board);

    if !board.scratchpad.is_empty() {
        println!();
        println!("Notes:");
        for note in &board.scratchpad {
            println!(
                "  [{}] {}: {}",
                note.timestamp.format("%H:%M:%S"),
                console::style(&note.agent_name).bold(),
                note.content
            );
        }
    }
    if let Some(draft) = &board.current_draft {
        println!();
        print!("{}", draft.to_markdown());
    }
}

fn load_draft(path: &Path) -> Result<Draft> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read draft file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a valid draft JSON file", path.display()))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
