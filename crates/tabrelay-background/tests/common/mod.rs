//! Recording fakes for the background's collaborators.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;

use tabrelay_background::core::message::FetchParams;
use tabrelay_background::core::{
    BrowserTab, FrameTarget, MessageSender, PlatformProfile, Reply, TabId, ToContent,
};
use tabrelay_background::ui_hub::DevFixKind;
use tabrelay_background::{
    Background, BackgroundParts, BusError, ExtensionHost, FetchError, FileLoader, FileSaver,
    KeyValueStore, LoaderFactory, MemoryStore, Responder, Router, RouterParts, TabsApi,
    ThemeHooks,
};

// ─── Tabs ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub tab_id: TabId,
    pub message: ToContent,
    pub target: FrameTarget,
}

#[derive(Default)]
pub struct FakeTabs {
    tabs: Mutex<Vec<BrowserTab>>,
    sent: Mutex<Vec<Sent>>,
    injected: Mutex<Vec<TabId>>,
    probes: Mutex<HashMap<TabId, String>>,
    held: Mutex<HashMap<TabId, Arc<Notify>>>,
}

impl FakeTabs {
    pub fn set_tabs(&self, tabs: Vec<BrowserTab>) {
        *self.tabs.lock().unwrap() = tabs;
    }

    pub fn set_probe(&self, tab_id: TabId, url: &str) {
        self.probes.lock().unwrap().insert(tab_id, url.to_owned());
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, tab_id: TabId) -> Vec<Sent> {
        self.sent().into_iter().filter(|s| s.tab_id == tab_id).collect()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn injected(&self) -> Vec<TabId> {
        self.injected.lock().unwrap().clone()
    }

    /// Pushes to `tab_id` stay pending until the returned gate is notified.
    pub fn hold_pushes_to(&self, tab_id: TabId) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.held.lock().unwrap().insert(tab_id, Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl TabsApi for FakeTabs {
    async fn query_tabs(&self) -> Result<Vec<BrowserTab>, BusError> {
        Ok(self.tabs.lock().unwrap().clone())
    }

    async fn active_tab(&self) -> Result<Option<BrowserTab>, BusError> {
        Ok(self.tabs.lock().unwrap().iter().find(|t| t.active).cloned())
    }

    async fn send_message(
        &self,
        tab_id: TabId,
        message: ToContent,
        target: FrameTarget,
    ) -> Result<(), BusError> {
        let frame_id = target.frame_id;
        let gate = self.held.lock().unwrap().get(&tab_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.sent.lock().unwrap().push(Sent {
            tab_id,
            message,
            target,
        });
        let known = self.tabs.lock().unwrap().iter().any(|t| t.id == tab_id);
        if known {
            Ok(())
        } else {
            Err(BusError::NoReceiver { tab_id, frame_id })
        }
    }

    async fn probe_top_frame_url(&self, tab_id: TabId) -> Result<String, BusError> {
        self.probes
            .lock()
            .unwrap()
            .get(&tab_id)
            .cloned()
            .ok_or(BusError::NoReceiver { tab_id, frame_id: 0 })
    }

    async fn inject_content_script(&self, tab_id: TabId) -> Result<(), BusError> {
        self.injected.lock().unwrap().push(tab_id);
        Ok(())
    }
}

pub fn tab(id: TabId, url: &str, active: bool) -> BrowserTab {
    BrowserTab {
        id,
        url: Some(url.to_owned()),
        active,
        discarded: false,
    }
}

// ─── Theme ────────────────────────────────────────────────────────

/// Serves `ADD_CSS_FILTER` instructions whose css names the current theme
/// generation and the document URL.
pub struct FakeTheme {
    generation: Mutex<String>,
    schemes: Mutex<Vec<bool>>,
    connect_enabled: Mutex<bool>,
}

impl Default for FakeTheme {
    fn default() -> Self {
        Self {
            generation: Mutex::new("v1".to_owned()),
            schemes: Mutex::new(Vec::new()),
            connect_enabled: Mutex::new(true),
        }
    }
}

impl FakeTheme {
    pub fn set_generation(&self, generation: &str) {
        *self.generation.lock().unwrap() = generation.to_owned();
    }

    /// Make `connection_message` return nothing.
    pub fn disable_connect(&self) {
        *self.connect_enabled.lock().unwrap() = false;
    }

    pub fn color_schemes(&self) -> Vec<bool> {
        self.schemes.lock().unwrap().clone()
    }

    pub fn instruction(&self, url: &str) -> ToContent {
        css(&format!("{}:{url}", self.generation.lock().unwrap()))
    }
}

pub fn css(text: &str) -> ToContent {
    ToContent::AddCssFilter {
        css: text.to_owned(),
        detect_dark_theme: false,
    }
}

#[async_trait]
impl ThemeHooks for FakeTheme {
    async fn connection_message(
        &self,
        _tab_url: &str,
        url: &str,
        _is_top_frame: bool,
    ) -> Option<ToContent> {
        tokio::task::yield_now().await;
        let enabled = *self.connect_enabled.lock().unwrap();
        enabled.then(|| self.instruction(url))
    }

    fn tab_message(&self, _tab_url: &str, url: &str, _is_top_frame: bool) -> ToContent {
        self.instruction(url)
    }

    fn on_color_scheme_change(&self, is_dark: bool) {
        self.schemes.lock().unwrap().push(is_dark);
    }
}

// ─── Loader / saver ───────────────────────────────────────────────

#[derive(Default)]
pub struct FakeLoader {
    responses: Mutex<HashMap<String, Result<String, String>>>,
    calls: AtomicUsize,
}

impl FakeLoader {
    pub fn respond(&self, url: &str, response: Result<&str, &str>) {
        self.responses.lock().unwrap().insert(
            url.to_owned(),
            response.map(str::to_owned).map_err(str::to_owned),
        );
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileLoader for FakeLoader {
    async fn get(&self, params: &FetchParams) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().unwrap().get(&params.url) {
            Some(Ok(data)) => Ok(data.clone()),
            Some(Err(error)) => Err(FetchError(error.clone())),
            None => Err(FetchError(format!("404 {}", params.url))),
        }
    }
}

#[derive(Default)]
pub struct FakeSaver {
    saved: Mutex<Vec<(String, String)>>,
}

impl FakeSaver {
    pub fn saved(&self) -> Vec<(String, String)> {
        self.saved.lock().unwrap().clone()
    }
}

impl FileSaver for FakeSaver {
    fn save(&self, name: &str, content: &str) -> Result<(), BusError> {
        self.saved
            .lock()
            .unwrap()
            .push((name.to_owned(), content.to_owned()));
        Ok(())
    }
}

// ─── Extension host ───────────────────────────────────────────────

#[derive(Default)]
pub struct FakeHost {
    pub calls: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ExtensionHost for FakeHost {
    async fn extension_data(&self) -> Value {
        json!({"isEnabled": true, "settings": {"enabled": true}})
    }

    async fn devtools_data(&self) -> Value {
        json!({"dynamicFixesText": ""})
    }

    async fn change_settings(&self, settings: Value) {
        self.record(format!("change_settings {settings}"));
    }

    async fn set_theme(&self, theme: Value) {
        self.record(format!("set_theme {theme}"));
    }

    async fn toggle_active_tab(&self) {
        self.record("toggle_active_tab".to_owned());
    }

    async fn apply_dev_fixes(&self, kind: DevFixKind, text: String) -> Result<(), String> {
        self.record(format!("apply {kind:?}"));
        if text.contains("bad") {
            Err(format!("cannot parse {kind:?} fixes"))
        } else {
            Ok(())
        }
    }

    async fn reset_dev_fixes(&self, kind: DevFixKind) {
        self.record(format!("reset {kind:?}"));
    }
}

// ─── Harness ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct Harness {
    pub tabs: Arc<FakeTabs>,
    pub theme: Arc<FakeTheme>,
    pub store: Arc<MemoryStore>,
    pub loader: Arc<FakeLoader>,
    pub saver: Arc<FakeSaver>,
    pub host: Arc<FakeHost>,
    pub loaders_built: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    fn loader_factory(&self) -> LoaderFactory {
        let loader = Arc::clone(&self.loader);
        let built = Arc::clone(&self.loaders_built);
        Box::new(move || {
            built.fetch_add(1, Ordering::SeqCst);
            Arc::clone(&loader) as Arc<dyn FileLoader>
        })
    }

    pub fn router(&self, profile: PlatformProfile) -> Router {
        Router::new(
            profile,
            RouterParts {
                tabs: Arc::clone(&self.tabs) as Arc<dyn TabsApi>,
                theme: Arc::clone(&self.theme) as Arc<dyn ThemeHooks>,
                store: Arc::clone(&self.store) as Arc<dyn KeyValueStore>,
                loader_factory: self.loader_factory(),
                saver: Some(Arc::clone(&self.saver) as Arc<dyn FileSaver>),
            },
        )
    }

    pub fn background(&self, profile: PlatformProfile) -> Background {
        Background::new(
            profile,
            BackgroundParts {
                tabs: Arc::clone(&self.tabs) as Arc<dyn TabsApi>,
                theme: Arc::clone(&self.theme) as Arc<dyn ThemeHooks>,
                store: Arc::clone(&self.store) as Arc<dyn KeyValueStore>,
                host: Arc::clone(&self.host) as Arc<dyn ExtensionHost>,
                loader_factory: self.loader_factory(),
                saver: Some(Arc::clone(&self.saver) as Arc<dyn FileSaver>),
            },
        )
    }
}

/// Let spawned and deferred deliveries run.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

pub fn top(tab_id: TabId, url: &str) -> MessageSender {
    MessageSender::frame(tab_id, url, 0, url)
}

pub fn sub(tab_id: TabId, tab_url: &str, frame_id: i64, url: &str) -> MessageSender {
    MessageSender::frame(tab_id, tab_url, frame_id, url)
}

/// Wait for the direct reply of a request, if any was given.
pub async fn reply_of(rx: tokio::sync::oneshot::Receiver<Reply>) -> Option<Reply> {
    rx.await.ok()
}

pub fn responder() -> (Responder, tokio::sync::oneshot::Receiver<Reply>) {
    Responder::channel()
}
