//! scanmux - fan-in multiplexer for deposit scanners
//!
//! CLI entry point for replaying recorded deposits through the multiplexer.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::info;

use scanmux::cli::{Cli, Command, OutputFormat};
use scanmux::config::{APP_DIR, Config, parse_log_level};
use scanmux::replay::{Replay, ReplayInput, ReplaySummary};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => parse_log_level(s)?,
        None => tracing::Level::INFO,
    };
    let log_file = fs::File::create(log_dir.join("scanmux.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!(?level, "Logging initialized");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;
    config.validate().context("Invalid configuration")?;

    match cli.command {
        Command::Replay { inputs, format } => cmd_replay(&config, &inputs, format).await,
        Command::Config => cmd_config(&config),
    }
}

/// Replay deposit files and print every aggregated deposit
async fn cmd_replay(config: &Config, inputs: &[ReplayInput], format: OutputFormat) -> Result<()> {
    info!(input_count = inputs.len(), ?format, "cmd_replay: called");
    let replay = Replay::prepare(config, inputs).await?;

    let mux = replay.multiplexer();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down multiplexer");
            mux.shutdown().await;
        }
    });

    let summary = replay
        .run(|deposit| {
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string(deposit)?),
                OutputFormat::Text => println!(
                    "{} {} -> {} {}",
                    deposit.coin_type.cyan(),
                    deposit.id(),
                    deposit.address,
                    deposit.value.to_string().green()
                ),
            }
            Ok(())
        })
        .await?;

    print_summary(&summary, format)
}

fn print_summary(summary: &ReplaySummary, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({ "summary": summary });
            println!("{}", serde_json::to_string(&json)?);
        }
        OutputFormat::Text => {
            println!();
            println!("{}", "Replay summary".bold());
            for (coin_type, count) in &summary.stats.forwarded {
                println!("  {:<8} {}", coin_type, count);
            }
            println!("  {:<8} {}", "total", summary.stats.total_forwarded);
            if summary.rejected > 0 {
                println!("  {} {}", "rejected".red(), summary.rejected);
            }
        }
    }
    Ok(())
}

/// Print the effective configuration as YAML
fn cmd_config(config: &Config) -> Result<()> {
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}
