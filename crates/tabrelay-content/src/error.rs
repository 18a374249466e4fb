use thiserror::Error;

/// Failures sending to the background.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortError {
    /// The extension was disabled, removed or updated under this page.
    #[error("extension context invalidated")]
    ContextInvalidated,

    #[error("message passing failed: {0}")]
    Transport(String),
}
