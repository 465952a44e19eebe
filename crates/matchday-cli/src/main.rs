use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "matchday-cli")]
#[command(about = "Keep a team's fixture list and results in step with the results provider")]
struct Cli {
    /// Print the pass summary as pretty JSON instead of one line.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fill missing fixture ids by matching against the provider.
    Resolve,
    /// Run one reconciliation pass.
    Sync,
    /// Reconcile on the SYNC_CRON schedule until Ctrl-C.
    Watch,
    /// Merge the team's upcoming fixtures into the local list.
    Seed {
        #[arg(long, default_value_t = matchday_sync::DEFAULT_SEED_COUNT)]
        count: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Resolve => {
            let summary = matchday_sync::run_resolve_from_env().await?;
            if cli.json {
                print_json(&summary)?;
            } else {
                println!(
                    "resolve complete: run_id={} resolved={} ambiguous={} not_found={} already_resolved={}",
                    summary.run_id,
                    summary.resolved,
                    summary.ambiguous,
                    summary.not_found,
                    summary.already_resolved
                );
            }
        }
        Commands::Sync => {
            let summary = matchday_sync::run_reconcile_once_from_env().await?;
            if cli.json {
                print_json(&summary)?;
            } else {
                println!(
                    "sync complete: run_id={} checked={} polled={} committed={} failures={} unreadable={}",
                    summary.run_id,
                    summary.fixtures_checked,
                    summary.polled,
                    summary.committed,
                    summary.failures.len(),
                    summary.ingest_failures.len()
                );
            }
        }
        Commands::Watch => matchday_sync::run_watch_from_env().await?,
        Commands::Seed { count } => {
            let summary = matchday_sync::run_seed_from_env(count).await?;
            if cli.json {
                print_json(&summary)?;
            } else {
                println!(
                    "seed complete: run_id={} received={} added={} adopted={} already_known={}",
                    summary.run_id,
                    summary.received,
                    summary.added,
                    summary.adopted,
                    summary.already_known
                );
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(summary: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(summary).context("rendering summary")?;
    println!("{rendered}");
    Ok(())
}

/// Logs go to stderr so stdout stays the summary. `MATCHDAY_LOG_FORMAT=json` for JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("MATCHDAY_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
