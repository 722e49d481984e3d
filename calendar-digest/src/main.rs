use std::path::PathBuf;

use anyhow::Context;
use calendar_digest::{AppConfig, PipelineSettings, RunOrchestrator, RunQueue};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "calendar-digest", version, about = "Summarize calendars and task boards into per-user reports")]
struct Cli {
    /// Configuration document (.toml or .json)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Directory the reports are written to
    #[arg(long, default_value = "reports")]
    output_dir: PathBuf,

    /// Text prepended to every summarization prompt
    #[arg(long, default_value = "templates/summary_context.md")]
    context: PathBuf,

    /// HTML report template
    #[arg(long, default_value = "templates/report_template.html")]
    template: PathBuf,

    /// Summarize with the built-in offline backend instead of Gemini
    #[arg(long)]
    offline_summarizer: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every configured user, starting from an empty output directory
    Run,
    /// Run one user, optionally limited to one source
    User {
        #[arg(long)]
        name: String,
        #[arg(long)]
        source: Option<String>,
    },
    /// Validate the configuration and print what it contains
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("invalid configuration in {}", cli.config.display()))?;

    if let Command::Check = cli.command {
        print_config(&config);
        return Ok(());
    }

    let settings = PipelineSettings::new(&cli.output_dir).with_template(&cli.template);
    let orchestrator =
        RunOrchestrator::from_config(config, settings, &cli.context, cli.offline_summarizer).await?;

    match cli.command {
        Command::Run => {
            let batch = orchestrator.run_batch().await;
            for report in &batch.completed {
                info!(
                    user = %report.user,
                    "{} event(s), {} card(s), {} failed source(s), state {}",
                    report.calendar_items,
                    report.board_items,
                    report.failed_sources.len(),
                    report.state()
                );
                for path in &report.artifacts {
                    println!("{}", path.display());
                }
            }
            for failure in &batch.failed {
                error!(user = %failure.user, "{}", failure.reason);
            }
        }
        Command::User { name, source } => {
            let queue = RunQueue::start(orchestrator);
            let handle = queue.submit(name.clone(), source)?;
            info!(job = %handle.id(), "Submitted run for {}", name);
            let outcome = handle.wait().await;
            queue.shutdown().await;
            let report = outcome?;
            println!("{}: {}", report.user, report.state());
            for path in &report.artifacts {
                println!("{}", path.display());
            }
            if report.artifacts.is_empty() {
                error!(user = %report.user, "No report file could be written to {}", cli.output_dir.display());
            }
        }
        Command::Check => {}
    }

    Ok(())
}

fn print_config(config: &AppConfig) {
    println!("{} user(s) configured", config.users.len());
    for user in &config.users {
        println!(
            "  {} -> {} ({} day window, {} source(s))",
            user.name,
            user.notify_address.as_deref().unwrap_or("no notify address"),
            user.window_days,
            user.sources.len()
        );
        for source in &user.sources {
            println!("    [{}] {}", source.kind(), source.name());
        }
    }
    let summarizer = if config.summarizer_key.is_some() { "configured" } else { "not configured" };
    let delivery = if config
        .email_sender
        .as_ref()
        .and_then(|sender| sender.smtp_settings())
        .is_some()
    {
        "configured"
    } else {
        "not configured"
    };
    println!("Summarizer: {}; email delivery: {}", summarizer, delivery);
}
