//! `tabrelay token`: manage picker tokens in the state directory.

use std::io::Write;
use std::sync::Arc;

use tabrelay_background::{KeyValueStore, TokenGuard};

use crate::cli::TokenAction;

/// Run one token action. Returns `false` when a validated token was
/// rejected.
pub async fn run<W: Write>(
    store: Arc<dyn KeyValueStore>,
    action: TokenAction,
    out: &mut W,
) -> anyhow::Result<bool> {
    let guard = TokenGuard::new(store);
    match action {
        TokenAction::Issue { tab_id } => {
            let token = guard.issue(tab_id).await;
            writeln!(out, "{token}")?;
            Ok(true)
        }
        TokenAction::Validate { tab_id, token } => {
            let valid = guard.validate(tab_id, &token).await;
            writeln!(out, "{}", if valid { "valid" } else { "invalid" })?;
            Ok(valid)
        }
        TokenAction::Invalidate { tab_id } => {
            guard.invalidate(tab_id).await?;
            Ok(true)
        }
    }
}
