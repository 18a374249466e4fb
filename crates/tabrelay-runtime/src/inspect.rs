//! `tabrelay inspect`: print the checkpointed document registry.

use std::io::Write;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;

use tabrelay_background::checkpoint::read_blob;
use tabrelay_background::router::REGISTRY_STORAGE_KEY;
use tabrelay_background::{KeyValueStore, RegistryState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryReport {
    pub saved_at: DateTime<Utc>,
    pub age_secs: i64,
    pub clock: u64,
    pub documents: usize,
    pub state: RegistryState,
}

/// Decode the registry checkpoint, if one was ever written.
pub async fn report(
    store: &dyn KeyValueStore,
    now: DateTime<Utc>,
) -> anyhow::Result<Option<RegistryReport>> {
    let Some(blob) = read_blob(store, REGISTRY_STORAGE_KEY)
        .await
        .context("failed to read registry checkpoint")?
    else {
        return Ok(None);
    };
    let state: RegistryState =
        serde_json::from_value(blob.state).context("registry checkpoint is malformed")?;
    Ok(Some(RegistryReport {
        saved_at: blob.saved_at,
        age_secs: (now - blob.saved_at).num_seconds(),
        clock: state.clock(),
        documents: state.document_count(),
        state,
    }))
}

pub async fn run<W: Write>(store: &dyn KeyValueStore, out: &mut W) -> anyhow::Result<()> {
    match report(store, Utc::now()).await? {
        Some(report) => {
            serde_json::to_writer_pretty(&mut *out, &report)?;
            writeln!(out)?;
        }
        None => writeln!(out, "no registry checkpoint")?,
    }
    Ok(())
}
