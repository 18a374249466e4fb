//! tabrelay-content: the page side of the extension bus.
//! Maps page lifecycle events to background messages, applies pushed
//! styling instructions, and shuts itself down when the background is gone.

pub mod error;
pub mod session;

pub use error::PortError;
pub use session::{BackgroundPort, ContentSession, PageStyler, StyleKind};
