//! Collaborator seams: the browser runtime, durable storage, the theming
//! subsystem and the network loader. Everything behind these traits is
//! external; the background only relies on the contracts below.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;

use tabrelay_core::message::FetchParams;
use tabrelay_core::{BrowserTab, FrameTarget, Reply, TabId, ToContent};

use crate::error::{BusError, FetchError, StoreError};

// ─── Durable storage ──────────────────────────────────────────────

/// Durable key-value storage that survives process restarts.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key).await
    }
}

// ─── Browser tabs / bus ───────────────────────────────────────────

/// The browser's tab API and targeted push half of the message bus.
#[async_trait]
pub trait TabsApi: Send + Sync {
    async fn query_tabs(&self) -> Result<Vec<BrowserTab>, BusError>;

    async fn active_tab(&self) -> Result<Option<BrowserTab>, BusError>;

    /// Push a message to one frame of a tab.
    async fn send_message(
        &self,
        tab_id: TabId,
        message: ToContent,
        target: FrameTarget,
    ) -> Result<(), BusError>;

    /// Read `location.href` of a tab's top frame by running a probe in it.
    /// Only needed on platforms where tab URLs are not readable.
    async fn probe_top_frame_url(&self, _tab_id: TabId) -> Result<String, BusError> {
        Err(BusError::Unsupported("probe_top_frame_url"))
    }

    /// Inject the content script into every frame of a tab.
    async fn inject_content_script(&self, tab_id: TabId) -> Result<(), BusError>;
}

// ─── Theming subsystem ────────────────────────────────────────────

/// Instruction callbacks supplied by the theming subsystem.
#[async_trait]
pub trait ThemeHooks: Send + Sync {
    /// Instruction for a freshly connected document. May consult async
    /// configuration; `None` means nothing to apply.
    async fn connection_message(
        &self,
        tab_url: &str,
        url: &str,
        is_top_frame: bool,
    ) -> Option<ToContent>;

    /// Current instruction for a document, computed synchronously.
    fn tab_message(&self, tab_url: &str, url: &str, is_top_frame: bool) -> ToContent;

    fn on_color_scheme_change(&self, is_dark: bool);
}

// ─── Network loader / downloads ───────────────────────────────────

#[async_trait]
pub trait FileLoader: Send + Sync {
    async fn get(&self, params: &FetchParams) -> Result<String, FetchError>;
}

/// Builds the network loader on first use.
pub type LoaderFactory = Box<dyn Fn() -> Arc<dyn FileLoader> + Send + Sync>;

/// Drives a synthetic in-page download.
pub trait FileSaver: Send + Sync {
    fn save(&self, name: &str, content: &str) -> Result<(), BusError>;
}

// ─── Direct reply ─────────────────────────────────────────────────

/// One-shot reply channel of a single inbound request.
///
/// Replying is optional and happens at most once; later attempts and
/// replies to a caller that stopped waiting are dropped.
#[derive(Debug, Default)]
pub struct Responder {
    tx: Option<oneshot::Sender<Reply>>,
}

impl Responder {
    /// A responder plus the receiving end the bus waits on.
    pub fn channel() -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A responder for messages whose sender does not expect a reply.
    pub fn none() -> Self {
        Self { tx: None }
    }

    pub fn is_pending(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Returns `true` if the reply reached a waiting caller.
    pub fn respond(&mut self, reply: Reply) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn responder_delivers_once() {
        let (mut responder, rx) = Responder::channel();
        assert!(responder.is_pending());
        assert!(responder.respond(Reply::Keepalive));
        assert!(!responder.is_pending());
        assert!(!responder.respond(Reply::Data(Value::Null)));
        assert_eq!(rx.await.expect("reply"), Reply::Keepalive);
    }

    #[tokio::test]
    async fn dropped_responder_closes_channel() {
        let (responder, rx) = Responder::channel();
        drop(responder);
        assert!(rx.await.is_err());
    }

    #[test]
    fn none_responder_is_never_pending() {
        let mut responder = Responder::none();
        assert!(!responder.is_pending());
        assert!(!responder.respond(Reply::Keepalive));
    }

    #[test]
    fn reply_to_departed_caller_is_dropped() {
        let (mut responder, rx) = Responder::channel();
        drop(rx);
        assert!(!responder.is_pending());
        assert!(!responder.respond(Reply::Keepalive));
    }
}
