use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use live_notice::commands::CONSOLE_HELP;
use live_notice::logging;
use live_notice::{AppConfig, ConsoleCommand, LiveNotice};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "live-notice", version, about = "Bilibili live/offline notifier")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long, env = "LIVE_NOTICE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the monitor with an interactive console (default)
    Run,
    /// Look up one uid and exit
    Check { uid: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    let _guard = logging::init_logging(config.log_dir.as_deref(), args.verbose)?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(&config).await,
        Command::Check { uid } => check(&config, &uid).await,
    }
}

async fn run(config: &AppConfig) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    if let Some(dir) = &config.log_dir {
        logging::start_retention_cleanup(dir.clone(), cancel.child_token());
    }

    let service = LiveNotice::from_config(config);
    service.start().await.context("starting monitor")?;
    println!("{CONSOLE_HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                // stdin closed; keep monitoring until interrupted.
                tokio::signal::ctrl_c().await?;
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read console input");
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match ConsoleCommand::parse(&line) {
            Ok(ConsoleCommand::Quit) => break,
            Ok(command) => println!("{}", service.execute(command, "console").await),
            Err(e) => println!("{e}"),
        }
    }

    service.shutdown().await;
    cancel.cancel();
    Ok(())
}

async fn check(config: &AppConfig, uid: &str) -> anyhow::Result<()> {
    let service = LiveNotice::from_config(config);
    let reply = service.check(uid).await;
    service.shutdown().await;

    if !reply.is_ok() {
        anyhow::bail!("{reply}");
    }
    println!("{reply}");
    Ok(())
}
