mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands, LockCommands};
use commands::StackContext;
use stack_provider::Error as StackError;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(stack_error) = e.downcast_ref::<StackError>() {
            eprintln!("Error: {}", stack_error);
            if let Some(suggestion) = stack_error.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let out = output::CliOutput;

    let command = match cli.command {
        // The worker needs no stack file.
        Commands::Serve { port, dir } => {
            stack_provider::serve::run(port, dir).await?;
            return Ok(());
        }
        command => command,
    };

    let ctx = StackContext::load(cli.stack).await?;

    match command {
        Commands::Deploy { hold } => commands::run_deploy(&ctx, hold, &out).await,
        Commands::Drift { json } => commands::run_drift(&ctx, json, &out).await,
        Commands::Refresh => commands::run_refresh(&ctx, &out).await,
        Commands::Lock(LockCommands::Status) => commands::run_lock_status(&ctx, &out).await,
        Commands::Lock(LockCommands::Release) => commands::run_lock_release(&ctx, &out).await,
        Commands::Audit { limit } => commands::run_audit(&ctx, limit, &out).await,
        Commands::Serve { .. } => Ok(()),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
