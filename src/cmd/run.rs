//! Autonomous run command: `tend run`.

use anyhow::Result;

use tend::config::TendConfig;

use super::session::{open_engine, print_outcome};

/// Start a thread and drive it to the end without pausing at the gate.
pub async fn cmd_run(config: &TendConfig, intent: &str) -> Result<()> {
    let engine = open_engine(config)?;
    let thread_id = engine.start(intent).await?;
    println!(
        "{} {}",
        console::style("Running thread").bold().cyan(),
        thread_id
    );

    let outcome = engine.run_to_completion(&thread_id).await?;
    print_outcome(&thread_id, &outcome)
}
