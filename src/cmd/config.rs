//! Configuration view and validation commands: `tend config`.

use std::path::Path;

use anyhow::{Context, Result};

use tend::config::{CONFIG_FILE, TendConfig, TendToml, default_config_template, tend_dir};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<&ConfigCommands>) -> Result<()> {
    let tend_dir = tend_dir(project_dir);
    let config_path = tend_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("tend Configuration");
            println!("==================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No tend.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            let config = TendConfig::new(project_dir.to_path_buf())?;
            let toml = &config.toml;

            println!("[engine]");
            println!("  node_timeout_secs = {}", toml.engine.node_timeout_secs);
            println!(
                "  interrupt_before_gate = {}",
                toml.engine.interrupt_before_gate
            );
            println!();

            println!("[policy]");
            println!("  safety_threshold = {}", toml.policy.safety_threshold);
            println!("  empathy_threshold = {}", toml.policy.empathy_threshold);
            println!("  max_iterations = {}", toml.policy.max_iterations);
            println!();

            println!("[agent]");
            println!("  command = \"{}\"", toml.agent.command);
            println!("  args = {:?}", toml.agent.args);
            println!();

            println!("[server]");
            println!("  host = \"{}\"", toml.server.host);
            println!("  port = {}", toml.server.port);
            println!();

            println!("[logging]");
            println!("  level = \"{}\"", toml.logging.level);
            println!("  format = \"{}\"", toml.logging.format);
            println!();

            println!("Effective values (with env overrides):");
            println!("  db_path = \"{}\"", config.db_path().display());
            if let Some(dir) = config.log_settings(None, false).log_dir {
                println!("  log_dir = \"{}\"", dir.display());
            }
            println!();

            if !config_path.exists() {
                println!("Run 'tend config init' to create a tend.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No tend.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = TendToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
                println!();
                anyhow::bail!("{} configuration warning(s)", warnings.len());
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("tend.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&tend_dir).with_context(|| {
                format!("Failed to create directory: {}", tend_dir.display())
            })?;
            std::fs::write(&config_path, default_config_template()).with_context(|| {
                format!("Failed to write config file: {}", config_path.display())
            })?;

            println!("Created tend.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [policy] thresholds and max_iterations");
            println!("  - [agent] the command used for drafting and review");
            println!("  - [logging] level, format and log_dir");
            println!();
        }
    }

    Ok(())
}
