//! tabrelay: offline runtime for the extension background core.
//! Replays recorded bus traces, inspects checkpoints and manages picker
//! tokens against a state directory.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::BufReader;

use tabrelay_background::{FileStore, KeyValueStore};
use tabrelay_core::PlatformProfile;

mod cli;
mod harness;
mod inspect;
mod replay;
mod token;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("TABRELAY_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let state_dir = args.state_dir.unwrap_or_else(cli::default_state_dir);
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&state_dir));
    let mut stdout = std::io::stdout().lock();

    match args.command {
        cli::Command::Replay(opts) => {
            let profile = PlatformProfile::for_variant(args.platform);
            tracing::info!(platform = %profile.variant, state_dir = %state_dir.display(), "tabrelay replay starting");
            let mut replay =
                replay::Replay::new(profile, store, &opts.css, state_dir.join("downloads"));
            let stats = if opts.input == "-" {
                let input = BufReader::new(tokio::io::stdin());
                replay.run(input, &mut stdout).await?
            } else {
                let file = tokio::fs::File::open(&opts.input)
                    .await
                    .with_context(|| format!("failed to open {}", opts.input))?;
                replay.run(BufReader::new(file), &mut stdout).await?
            };
            let clock = replay.background().router().snapshot().await.clock();
            tracing::info!(
                events = stats.events,
                skipped = stats.skipped,
                outputs = stats.outputs,
                clock,
                "tabrelay replay finished"
            );
        }
        cli::Command::Inspect => {
            inspect::run(store.as_ref(), &mut stdout).await?;
        }
        cli::Command::Token { action } => {
            if !token::run(store, action, &mut stdout).await? {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
