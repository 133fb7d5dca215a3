//! classbot binary. Config comes from env (.env is loaded first) and optional CLI args.

use anyhow::Result;
use clap::Parser;
use classbot::{load_config, run_bot, run_console, run_tick, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { token } => {
            let config = load_config(token)?;
            run_bot(config).await
        }
        Commands::Tick { at } => {
            let config = load_config(None)?;
            let report = run_tick(config, at).await?;
            println!(
                "fired={} closed={} skipped={} failed_deliveries={}",
                report.fired, report.closed, report.skipped, report.failed_deliveries
            );
            Ok(())
        }
        Commands::Console { user } => {
            let config = load_config(None)?;
            run_console(config, user).await
        }
    }
}
