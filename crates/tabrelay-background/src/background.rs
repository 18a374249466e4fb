//! The background process: one router, one UI hub, one token guard and the
//! keepalive shim, fed from a single event channel.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use tabrelay_core::{FromUi, Inbound, MessageSender, PlatformProfile, TabId};

use crate::keepalive::KeepaliveShim;
use crate::ports::{FileSaver, KeyValueStore, LoaderFactory, Responder, TabsApi, ThemeHooks};
use crate::router::{Router, RouterParts};
use crate::token_guard::TokenGuard;
use crate::ui_hub::{ExtensionHost, UiHub, UiPort};

/// One inbound message with its bus metadata.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub message: Inbound,
    pub sender: MessageSender,
    /// Long-lived UI connection the message came through, if any.
    pub port: Option<UiPort>,
}

impl Envelope {
    pub fn new(message: impl Into<Inbound>, sender: MessageSender) -> Self {
        Self {
            message: message.into(),
            sender,
            port: None,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: UiPort) -> Self {
        self.port = Some(port);
        self
    }
}

/// Everything the browser can tell the background about.
#[derive(Debug)]
pub enum BusEvent {
    Message(Envelope, Responder),
    TabRemoved(TabId),
    /// Settings changed somewhere; push the new instruction to documents.
    Broadcast { only_active_tab: bool },
    /// Extension installed or updated; inject into tabs that lack the script.
    UpdateContentScript { run_on_protected_pages: bool },
}

pub struct BackgroundParts {
    pub tabs: Arc<dyn TabsApi>,
    pub theme: Arc<dyn ThemeHooks>,
    pub store: Arc<dyn KeyValueStore>,
    pub host: Arc<dyn ExtensionHost>,
    pub loader_factory: LoaderFactory,
    pub saver: Option<Arc<dyn FileSaver>>,
}

pub struct Background {
    router: Router,
    hub: UiHub,
    tokens: TokenGuard,
    shim: KeepaliveShim,
}

impl Background {
    pub fn new(profile: PlatformProfile, parts: BackgroundParts) -> Self {
        let tokens =
            TokenGuard::new(Arc::clone(&parts.store)).with_tabs(Arc::clone(&parts.tabs));
        let router = Router::new(
            profile,
            RouterParts {
                tabs: parts.tabs,
                theme: parts.theme,
                store: parts.store,
                loader_factory: parts.loader_factory,
                saver: parts.saver,
            },
        );
        Self {
            hub: UiHub::new(parts.host, router.clone()),
            router,
            tokens,
            shim: KeepaliveShim::new(&profile),
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn hub(&self) -> &UiHub {
        &self.hub
    }

    pub fn tokens(&self) -> &TokenGuard {
        &self.tokens
    }

    /// Route one message. Assertion failures are logged and the message is
    /// dropped.
    pub async fn dispatch(&self, envelope: Envelope, mut responder: Responder) {
        let kind = envelope.message.kind();
        debug!(tag = %kind, tab_id = ?envelope.sender.tab_id(), frame_id = ?envelope.sender.frame_id, "inbound message");

        if let Some(reply) = self.shim.reply_for(kind) {
            responder.respond(reply);
        }

        match &envelope.message {
            Inbound::Ui(ui) if !matches!(ui, FromUi::SaveFile { .. } | FromUi::ColorSchemeChange { .. }) => {
                self.hub.handle(ui, envelope.port.as_ref(), responder).await;
            }
            message => {
                if let Err(e) = self.router.handle(message, &envelope.sender, responder).await {
                    warn!(tag = %kind, error = %e, "dropping message");
                }
            }
        }
    }

    pub async fn handle_event(&self, event: BusEvent) {
        match event {
            BusEvent::Message(envelope, responder) => self.dispatch(envelope, responder).await,
            BusEvent::TabRemoved(tab_id) => self.router.on_tab_removed(tab_id).await,
            BusEvent::Broadcast { only_active_tab } => self.router.broadcast(only_active_tab).await,
            BusEvent::UpdateContentScript {
                run_on_protected_pages,
            } => self.router.update_content_script(run_on_protected_pages).await,
        }
    }

    /// Main event loop. Runs until every sender of the channel is dropped.
    pub async fn run(&self, mut events: mpsc::Receiver<BusEvent>) {
        info!(platform = %self.router.profile().variant, "background: event loop started");
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        info!("background: event channel closed, shutting down");
    }
}
