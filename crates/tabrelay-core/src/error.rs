//! Error types for the core vocabulary.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("unknown platform variant: {0}")]
    UnknownPlatform(String),

    #[error("unknown document state: {0}")]
    UnknownDocumentState(String),
}
