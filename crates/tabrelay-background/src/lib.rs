//! tabrelay-background: the privileged side of the extension bus.
//! Tracks every (tab, frame) document, routes content-script and UI
//! messages, re-delivers themed instructions across document lifecycle
//! transitions, and checkpoints its registry so a suspended process
//! resumes with the same view of which documents are alive.

pub mod background;
pub mod checkpoint;
pub mod error;
pub mod keepalive;
pub mod ports;
pub mod registry;
pub mod router;
pub mod store;
pub mod token_guard;
pub mod ui_hub;

pub use background::{Background, BackgroundParts, BusEvent, Envelope};
pub use checkpoint::{Checkpoint, CheckpointState};
pub use error::{BusError, FetchError, RouterError, StoreError, TokenError};
pub use keepalive::KeepaliveShim;
pub use ports::{FileLoader, FileSaver, KeyValueStore, LoaderFactory, Responder, TabsApi, ThemeHooks};
pub use registry::RegistryState;
pub use router::{Router, RouterParts};
pub use store::{FileStore, MemoryStore};
pub use token_guard::TokenGuard;
pub use ui_hub::{DevFixKind, ExtensionHost, UiHub, UiPort};

pub use tabrelay_core as core;
