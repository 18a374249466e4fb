//! tabrelay-core: shared vocabulary of the background message relay.
//! Document identity and lifecycle records, the closed message unions that
//! cross the extension bus, and the platform capability profile.

pub mod error;
pub mod message;
pub mod platform;
pub mod types;
pub mod url;

pub use error::CoreError;
pub use message::{FromContent, FromUi, Inbound, InboundKind, Reply, ToContent, ToUi};
pub use platform::{DocumentIdSource, PlatformProfile, PlatformVariant};
pub use types::{
    BrowserTab, DocumentId, DocumentRecord, DocumentState, FrameId, FrameTarget, MessageSender,
    SenderTab, TOP_FRAME_ID, TabId, TabInfo,
};
