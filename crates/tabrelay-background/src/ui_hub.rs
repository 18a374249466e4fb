//! UI hub: answers popup/devtools queries, forwards settings commands to the
//! extension host, and fans out change notifications to subscribed UI ports.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use tabrelay_core::{FromUi, Reply, ToUi};

use crate::ports::Responder;
use crate::router::Router;

/// Which family of developer fixtures a dev command edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DevFixKind {
    DynamicTheme,
    Inversion,
    StaticThemes,
}

/// Settings/theme/config owner. Everything about what the settings mean
/// lives on the other side of this trait.
#[async_trait]
pub trait ExtensionHost: Send + Sync {
    /// Full extension data snapshot, as sent in `CHANGES`.
    async fn extension_data(&self) -> Value;

    async fn devtools_data(&self) -> Value;

    async fn change_settings(&self, settings: Value);

    async fn set_theme(&self, theme: Value);

    async fn toggle_active_tab(&self);

    /// Apply developer fixture text. `Err` carries the parse message shown
    /// to the developer.
    async fn apply_dev_fixes(&self, kind: DevFixKind, text: String) -> Result<(), String>;

    async fn reset_dev_fixes(&self, kind: DevFixKind);
}

/// A connected UI surface that can receive pushed changes.
#[derive(Debug, Clone)]
pub struct UiPort {
    pub id: u64,
    pub tx: mpsc::UnboundedSender<ToUi>,
}

impl UiPort {
    pub fn new(id: u64) -> (Self, mpsc::UnboundedReceiver<ToUi>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }
}

pub struct UiHub {
    host: Arc<dyn ExtensionHost>,
    router: Router,
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<ToUi>>>,
}

impl UiHub {
    pub fn new(host: Arc<dyn ExtensionHost>, router: Router) -> Self {
        Self {
            host,
            router,
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Handle a UI message. `port` is the connection it arrived on, needed
    /// only by the subscription commands.
    pub async fn handle(&self, message: &FromUi, port: Option<&UiPort>, mut responder: Responder) {
        match message {
            FromUi::GetData => {
                responder.respond(Reply::Data(self.data_with_active_tab().await));
            }
            FromUi::GetDevtoolsData => {
                responder.respond(Reply::Data(self.host.devtools_data().await));
            }
            FromUi::ChangeSettings(settings) => {
                self.host.change_settings(settings.clone()).await;
                self.after_change(false).await;
            }
            FromUi::SetTheme(theme) => {
                self.host.set_theme(theme.clone()).await;
                self.after_change(false).await;
            }
            FromUi::ToggleActiveTab => {
                self.host.toggle_active_tab().await;
                self.after_change(true).await;
            }
            FromUi::SubscribeToChanges => match port {
                Some(port) => self.subscribe(port),
                None => warn!("subscribe request without a UI port"),
            },
            FromUi::UnsubscribeFromChanges => {
                if let Some(port) = port {
                    self.unsubscribe(port.id);
                }
            }
            FromUi::ApplyDevDynamicThemeFixes(text) => {
                self.apply_dev(DevFixKind::DynamicTheme, text, &mut responder).await;
            }
            FromUi::ApplyDevInversionFixes(text) => {
                self.apply_dev(DevFixKind::Inversion, text, &mut responder).await;
            }
            FromUi::ApplyDevStaticThemes(text) => {
                self.apply_dev(DevFixKind::StaticThemes, text, &mut responder).await;
            }
            FromUi::ResetDevDynamicThemeFixes => self.reset_dev(DevFixKind::DynamicTheme).await,
            FromUi::ResetDevInversionFixes => self.reset_dev(DevFixKind::Inversion).await,
            FromUi::ResetDevStaticThemes => self.reset_dev(DevFixKind::StaticThemes).await,
            // Routed to the document router.
            FromUi::SaveFile { .. } | FromUi::ColorSchemeChange { .. } => {}
        }
    }

    pub fn subscribe(&self, port: &UiPort) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.insert(port.id, port.tx.clone());
            debug!(port = port.id, "ui port subscribed");
        }
    }

    pub fn unsubscribe(&self, port_id: u64) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.remove(&port_id);
            debug!(port = port_id, "ui port unsubscribed");
        }
    }

    /// Push `CHANGES` to every subscriber. Ports whose UI went away are
    /// dropped.
    pub fn publish_changes(&self, data: Value) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return;
        };
        subscribers.retain(|id, tx| {
            let alive = tx.send(ToUi::Changes(data.clone())).is_ok();
            if !alive {
                debug!(port = id, "dropping closed ui port");
            }
            alive
        });
    }

    /// Extension snapshot plus what the router knows about the active tab.
    async fn data_with_active_tab(&self) -> Value {
        let mut data = self.host.extension_data().await;
        let active_tab = self.router.active_tab_info().await;
        if let (Value::Object(map), Ok(info)) = (&mut data, serde_json::to_value(active_tab)) {
            map.insert("activeTab".to_owned(), info);
        }
        data
    }

    async fn after_change(&self, only_active_tab: bool) {
        self.router.broadcast(only_active_tab).await;
        let data = self.data_with_active_tab().await;
        self.publish_changes(data);
    }

    async fn apply_dev(&self, kind: DevFixKind, text: &str, responder: &mut Responder) {
        match self.host.apply_dev_fixes(kind, text.to_owned()).await {
            Ok(()) => {
                responder.respond(Reply::Data(Value::Null));
                self.after_change(false).await;
            }
            Err(error) => {
                debug!(?kind, error = %error, "dev fixes rejected");
                responder.respond(Reply::Error(error));
            }
        }
    }

    async fn reset_dev(&self, kind: DevFixKind) {
        self.host.reset_dev_fixes(kind).await;
        self.after_change(false).await;
    }
}
