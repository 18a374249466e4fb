//! Error types for the background crate.

use tabrelay_core::{FrameId, InboundKind, TabId};
use thiserror::Error;

/// Durable key-value store failures. Never fatal: checkpoints rebuild
/// themselves from later document events.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Extension bus failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    /// The destination tab/frame is gone. Expected during teardown.
    #[error("no receiving end in tab {tab_id} frame {frame_id}")]
    NoReceiver { tab_id: TabId, frame_id: FrameId },

    #[error("operation not supported on this platform: {0}")]
    Unsupported(&'static str),

    #[error("bus transport error: {0}")]
    Transport(String),
}

/// Network loader failure, surfaced to the caller as `FETCH_RESPONSE.error`.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct FetchError(pub String);

/// Programming-error assertions: the message cannot be serviced and is
/// dropped after being logged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("{kind}: sender is missing {field}")]
    MissingSender {
        kind: InboundKind,
        field: &'static str,
    },

    #[error("{kind}: no document recorded for tab {tab_id} frame {frame_id}")]
    UnknownDocument {
        kind: InboundKind,
        tab_id: TabId,
        frame_id: FrameId,
    },
}

/// Token guard failures. Validation never fails: an unreadable store is a
/// rejected token.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token storage failed: {0}")]
    Store(#[from] StoreError),
}
