//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tabrelay_core::PlatformVariant;

#[derive(Parser)]
#[command(name = "tabrelay", about = "browser extension background message relay")]
pub struct Cli {
    /// Directory holding checkpoints and tokens
    /// (default: $XDG_STATE_HOME/tabrelay or /tmp/tabrelay-$USER)
    #[arg(long, global = true, env = "TABRELAY_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Browser platform to emulate
    #[arg(
        long,
        global = true,
        env = "TABRELAY_PLATFORM",
        default_value = "chromium-mv3"
    )]
    pub platform: PlatformVariant,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Feed a newline-delimited JSON bus trace through the background
    Replay(ReplayOpts),
    /// Print the checkpointed document registry
    Inspect,
    /// Issue, check or revoke picker tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(clap::Args)]
pub struct ReplayOpts {
    /// Trace file, or `-` for stdin
    #[arg(default_value = "-")]
    pub input: String,

    /// Stylesheet served as the instruction for every document
    #[arg(long, default_value = "html { filter: invert(1) hue-rotate(180deg); }")]
    pub css: String,
}

#[derive(Subcommand)]
pub enum TokenAction {
    Issue {
        tab_id: i64,
    },
    /// Exit status 1 when the token is not valid
    Validate {
        tab_id: i64,
        token: String,
    },
    Invalidate {
        tab_id: i64,
    },
}

/// Default state directory, per user.
pub fn default_state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(dir).join("tabrelay");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/tabrelay-{user}"))
}
