//! Message router: interprets inbound messages by tag, drives the document
//! registry, and decides which themed instruction goes to which document.
//!
//! Every registry mutation loads the checkpoint first and saves after, so
//! the router stays correct when the process is suspended between two
//! messages. The registry lock is never held across a checkpoint write or
//! a tabs API call.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, OnceCell};
use tracing::{debug, info, warn};

use tabrelay_core::message::{FetchParams, FromContent, FromUi};
use tabrelay_core::url::{can_inject_script, host_or_protocol};
use tabrelay_core::{
    BrowserTab, DocumentRecord, FrameId, FrameTarget, Inbound, InboundKind, MessageSender,
    PlatformProfile, Reply, TOP_FRAME_ID, TabId, TabInfo, ToContent,
};

use crate::checkpoint::Checkpoint;
use crate::error::{FetchError, RouterError};
use crate::ports::{
    FileLoader, FileSaver, KeyValueStore, LoaderFactory, Responder, TabsApi, ThemeHooks,
};
use crate::registry::{RegistryState, UnknownDocument};

/// Storage key of the registry checkpoint.
pub const REGISTRY_STORAGE_KEY: &str = "document-registry-state";

/// Stand-in URL when a tab's URL cannot be determined.
pub const ABOUT_BLANK: &str = "about:blank";

/// Collaborators the router is wired to.
pub struct RouterParts {
    pub tabs: Arc<dyn TabsApi>,
    pub theme: Arc<dyn ThemeHooks>,
    pub store: Arc<dyn KeyValueStore>,
    /// Builds the network loader on the first FETCH.
    pub loader_factory: LoaderFactory,
    /// `None` when no download driver exists in this process.
    pub saver: Option<Arc<dyn FileSaver>>,
}

struct Inner {
    profile: PlatformProfile,
    registry: Mutex<RegistryState>,
    checkpoint: Checkpoint<RegistryState>,
    tabs: Arc<dyn TabsApi>,
    theme: Arc<dyn ThemeHooks>,
    loader: OnceCell<Arc<dyn FileLoader>>,
    loader_factory: LoaderFactory,
    saver: Option<Arc<dyn FileSaver>>,
}

/// Background-side dispatcher. Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct Router {
    inner: Arc<Inner>,
}

impl Router {
    pub fn new(profile: PlatformProfile, parts: RouterParts) -> Self {
        let checkpoint = Checkpoint::new(REGISTRY_STORAGE_KEY, Arc::clone(&parts.store));
        Self {
            inner: Arc::new(Inner {
                profile,
                registry: Mutex::new(RegistryState::new()),
                checkpoint,
                tabs: parts.tabs,
                theme: parts.theme,
                loader: OnceCell::new(),
                loader_factory: parts.loader_factory,
                saver: parts.saver,
            }),
        }
    }

    pub fn profile(&self) -> &PlatformProfile {
        &self.inner.profile
    }

    // ─── Dispatch ─────────────────────────────────────────────────

    /// Handle one inbound message. Errors are assertion failures: the
    /// caller logs them and drops the message.
    pub async fn handle(
        &self,
        message: &Inbound,
        sender: &MessageSender,
        responder: Responder,
    ) -> Result<(), RouterError> {
        let kind = message.kind();
        match message {
            Inbound::Content(FromContent::DocumentConnect { is_dark }) => {
                self.color_scheme_report(*is_dark, sender);
                self.on_connect(kind, sender, responder).await
            }
            Inbound::Content(FromContent::DocumentForget) => {
                let tab_id = require(kind, sender.tab_id(), "tab")?;
                let frame_id = require(kind, sender.frame_id, "frameId")?;
                self.record_forget(tab_id, frame_id).await;
                Ok(())
            }
            Inbound::Content(FromContent::DocumentFreeze) => {
                let tab_id = require(kind, sender.tab_id(), "tab")?;
                let frame_id = require(kind, sender.frame_id, "frameId")?;
                self.record_freeze(kind, tab_id, frame_id).await
            }
            Inbound::Content(FromContent::DocumentResume { is_dark }) => {
                self.color_scheme_report(*is_dark, sender);
                self.on_resume(kind, sender, responder).await
            }
            Inbound::Content(FromContent::DarkThemeDetected) => {
                let tab_id = require(kind, sender.tab_id(), "tab")?;
                let frame_id = require(kind, sender.frame_id, "frameId")?;
                self.record_dark_theme_detected(kind, tab_id, frame_id).await
            }
            Inbound::Content(FromContent::Fetch { id, params }) => {
                self.on_fetch(kind, id, params, sender, responder)
            }
            Inbound::Content(FromContent::ColorSchemeChange { is_dark })
            | Inbound::Ui(FromUi::ColorSchemeChange { is_dark }) => {
                self.color_scheme_report(*is_dark, sender);
                Ok(())
            }
            Inbound::Ui(FromUi::SaveFile { name, content }) => {
                self.on_save_file(name, content);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// A tab was closed: its top document and every sub-frame are gone.
    pub async fn on_tab_removed(&self, tab_id: TabId) {
        self.record_forget(tab_id, TOP_FRAME_ID).await;
    }

    // ─── Handlers ─────────────────────────────────────────────────

    /// Sub-frame reports are dropped: CSS can override `prefers-color-scheme`
    /// inside frames, so only the top frame speaks for the tab.
    fn color_scheme_report(&self, is_dark: bool, sender: &MessageSender) {
        if sender.is_top_frame() {
            self.inner.theme.on_color_scheme_change(is_dark);
        } else {
            debug!(frame_id = ?sender.frame_id, "ignoring sub-frame color scheme report");
        }
    }

    async fn on_connect(
        &self,
        kind: InboundKind,
        sender: &MessageSender,
        responder: Responder,
    ) -> Result<(), RouterError> {
        let tab_id = require(kind, sender.tab_id(), "tab")?;
        let frame_id = require(kind, sender.frame_id, "frameId")?;
        let url = require(kind, sender.url.clone(), "url")?;
        let tab_url = sender.tab_url().unwrap_or(&url).to_owned();
        let document_id = self.inner.profile.document_id_of(sender);

        // Instruction computation and the registry write are independent
        // tasks; neither waits for the other.
        let router = self.clone();
        let (task_url, task_document_id) = (url.clone(), document_id.clone());
        tokio::spawn(async move {
            let mut responder = responder;
            let message = router
                .inner
                .theme
                .connection_message(&tab_url, &task_url, frame_id == TOP_FRAME_ID)
                .await;
            if let Some(message) = message {
                router
                    .deliver(task_document_id.as_deref(), tab_id, frame_id, message, &mut responder)
                    .await;
            }
        });

        self.record_connect(tab_id, frame_id, document_id, url).await;
        Ok(())
    }

    async fn on_resume(
        &self,
        kind: InboundKind,
        sender: &MessageSender,
        mut responder: Responder,
    ) -> Result<(), RouterError> {
        let tab_id = require(kind, sender.tab_id(), "tab")?;
        let frame_id = require(kind, sender.frame_id, "frameId")?;
        let url = require(kind, sender.url.clone(), "url")?;
        let document_id = self.inner.profile.document_id_of(sender);

        // Catch-up is decided before the record is overwritten, so a document
        // that missed a broadcast while frozen is never left stale. It goes
        // out once the registry is released.
        let mut registry = self.registry().await;
        let catch_up = registry.missed_broadcast(tab_id, frame_id).then(|| {
            debug!(tab_id, frame_id, clock = registry.clock(), "resumed document missed a broadcast");
            let tab_url = sender.tab_url().unwrap_or(&url);
            self.inner
                .theme
                .tab_message(tab_url, &url, frame_id == TOP_FRAME_ID)
        });
        registry.resume(tab_id, frame_id, document_id.clone(), Some(url));
        self.commit(registry).await;

        if let Some(message) = catch_up {
            self.deliver(document_id.as_deref(), tab_id, frame_id, message, &mut responder)
                .await;
        }
        Ok(())
    }

    fn on_fetch(
        &self,
        kind: InboundKind,
        id: &str,
        params: &FetchParams,
        sender: &MessageSender,
        responder: Responder,
    ) -> Result<(), RouterError> {
        let tab_id = require(kind, sender.tab_id(), "tab")?;
        let frame_id = require(kind, sender.frame_id, "frameId")?;
        let document_id = self.inner.profile.document_id_of(sender);
        let router = self.clone();
        let (id, params) = (id.to_owned(), params.clone());

        tokio::spawn(async move {
            let mut responder = responder;
            let (data, error) = if router.inner.profile.blocks_chrome_scheme_fetch
                && params.url.starts_with("chrome://")
            {
                // The embedded runtime forbids add-ons from loading these.
                (None, None)
            } else {
                match router.loader().await.get(&params).await {
                    Ok(data) => (Some(data), None),
                    Err(FetchError(error)) => {
                        debug!(url = %params.url, error = %error, "fetch failed");
                        (None, Some(error))
                    }
                }
            };
            let response = ToContent::FetchResponse { id, data, error };
            router
                .deliver(document_id.as_deref(), tab_id, frame_id, response, &mut responder)
                .await;
        });
        Ok(())
    }

    /// Service workers have no document to drive a download from, so on
    /// those platforms the request is dropped.
    fn on_save_file(&self, name: &str, content: &str) {
        if !self.inner.profile.background_can_save_file {
            debug!(platform = %self.inner.profile.variant, "save-file unavailable in background, ignoring");
            return;
        }
        match &self.inner.saver {
            Some(saver) => {
                if let Err(e) = saver.save(name, content) {
                    warn!(name, error = %e, "save-file failed");
                }
            }
            None => warn!(name, "save-file requested but no file saver is configured"),
        }
    }

    // ─── Registry transitions ─────────────────────────────────────

    async fn record_connect(
        &self,
        tab_id: TabId,
        frame_id: FrameId,
        document_id: Option<String>,
        url: String,
    ) {
        let mut registry = self.registry().await;
        registry.connect(tab_id, frame_id, document_id, Some(url));
        debug!(tab_id, frame_id, "document connected");
        self.commit(registry).await;
    }

    async fn record_forget(&self, tab_id: TabId, frame_id: FrameId) {
        let mut registry = self.registry().await;
        let removed = registry.forget(tab_id, frame_id);
        debug!(tab_id, frame_id, removed, "document forgotten");
        self.commit(registry).await;
    }

    async fn record_freeze(
        &self,
        kind: InboundKind,
        tab_id: TabId,
        frame_id: FrameId,
    ) -> Result<(), RouterError> {
        let mut registry = self.registry().await;
        registry
            .freeze(tab_id, frame_id)
            .map_err(|e| unknown(kind, e))?;
        debug!(tab_id, frame_id, "document frozen");
        self.commit(registry).await;
        Ok(())
    }

    async fn record_dark_theme_detected(
        &self,
        kind: InboundKind,
        tab_id: TabId,
        frame_id: FrameId,
    ) -> Result<(), RouterError> {
        let mut registry = self.registry().await;
        registry
            .mark_dark_theme_detected(tab_id, frame_id)
            .map_err(|e| unknown(kind, e))?;
        self.commit(registry).await;
        Ok(())
    }

    // ─── Broadcast ────────────────────────────────────────────────

    /// Push the current instruction to every tracked `Active`/`Passive`
    /// document.
    ///
    /// With `only_active_tab`, only tabs sharing the active tab's host (or
    /// protocol) are updated, so all open tabs of one site change together.
    /// The focused tab's top frame is delivered inline; every other frame is
    /// deferred to a later tick so many open tabs cannot starve the loop.
    /// Tabs API calls happen outside the registry lock.
    pub async fn broadcast(&self, only_active_tab: bool) {
        let open_tabs = match self.inner.tabs.query_tabs().await {
            Ok(tabs) => tabs,
            Err(e) => {
                warn!(error = %e, "tab query failed, broadcasting to no tabs");
                Vec::new()
            }
        };

        let active_host = if only_active_tab {
            let active = match open_tabs.iter().find(|tab| tab.active).cloned() {
                Some(tab) => Some(tab),
                None => self.active_tab().await,
            };
            Some(host_or_protocol(&self.tab_url(active.as_ref()).await))
        } else {
            None
        };

        let known: Vec<(&BrowserTab, Option<String>)> = {
            let registry = self.registry().await;
            open_tabs
                .iter()
                .filter(|tab| registry.has_tab(tab.id))
                .map(|tab| (tab, self.known_tab_url(&registry, tab)))
                .collect()
        };
        let mut tab_urls = HashMap::with_capacity(known.len());
        for (tab, url) in known {
            let url = match url {
                Some(url) => url,
                None => self.probe_tab_url(tab.id).await,
            };
            if let Some(host) = &active_host {
                if host_or_protocol(&url) != *host {
                    continue;
                }
            }
            tab_urls.insert(tab.id, url);
        }

        let mut registry = self.registry().await;
        let clock = registry.advance_clock();
        let mut pushes = Vec::new();
        for tab in &open_tabs {
            let Some(tab_url) = tab_urls.get(&tab.id) else {
                continue;
            };
            for (frame_id, record) in registry.receiving_frames(tab.id) {
                let url = record.url.as_deref().unwrap_or(ABOUT_BLANK);
                pushes.push(Push {
                    tab_id: tab.id,
                    message: self
                        .inner
                        .theme
                        .tab_message(tab_url, url, frame_id == TOP_FRAME_ID),
                    target: self.target(frame_id, record.document_id.as_deref()),
                    inline: tab.active && frame_id == TOP_FRAME_ID,
                });
                registry.stamp(tab.id, frame_id);
            }
        }
        self.commit(registry).await;

        let inline = pushes.iter().filter(|push| push.inline).count();
        info!(clock, only_active_tab, inline, deferred = pushes.len() - inline, "broadcast dispatched");
        for push in pushes {
            if push.inline {
                let _ = self
                    .inner
                    .tabs
                    .send_message(push.tab_id, push.message, push.target)
                    .await;
            } else {
                let tabs = Arc::clone(&self.inner.tabs);
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    let _ = tabs.send_message(push.tab_id, push.message, push.target).await;
                });
            }
        }
    }

    // ─── Queries ──────────────────────────────────────────────────

    /// The content script is present in the active tab.
    pub async fn can_access_active_tab(&self) -> bool {
        let Some(tab) = self.active_tab().await else {
            return false;
        };
        self.registry().await.has_tab(tab.id)
    }

    /// Dark theme flag of the active tab's top document. `None` when there
    /// is no active tab or the flag was never raised.
    pub async fn is_active_tab_dark_theme_detected(&self) -> Option<bool> {
        let tab = self.active_tab().await?;
        let registry = self.registry().await;
        registry
            .get(tab.id, TOP_FRAME_ID)
            .filter(|record| record.dark_theme_detected)
            .map(|_| true)
    }

    pub async fn active_tab_url(&self) -> String {
        let tab = self.active_tab().await;
        self.tab_url(tab.as_ref()).await
    }

    /// Active-tab facts for UI snapshots.
    pub async fn active_tab_info(&self) -> TabInfo {
        let tab = self.active_tab().await;
        let url = self.tab_url(tab.as_ref()).await;
        let registry = self.registry().await;
        let top = tab
            .as_ref()
            .and_then(|tab| registry.get(tab.id, TOP_FRAME_ID));
        TabInfo {
            url,
            id: tab.as_ref().map(|tab| tab.id),
            document_id: top.and_then(|record| record.document_id.clone()),
            is_injected: tab.as_ref().map(|tab| registry.has_tab(tab.id)),
            is_dark_theme_detected: top
                .filter(|record| record.dark_theme_detected)
                .map(|_| true),
        }
    }

    pub async fn document(&self, tab_id: TabId, frame_id: FrameId) -> Option<DocumentRecord> {
        self.registry().await.get(tab_id, frame_id).cloned()
    }

    /// Copy of the whole registry.
    pub async fn snapshot(&self) -> RegistryState {
        self.registry().await.clone()
    }

    /// Inject the content script into open tabs it is missing from.
    pub async fn update_content_script(&self, run_on_protected_pages: bool) {
        let tabs = match self.inner.tabs.query_tabs().await {
            Ok(tabs) => tabs,
            Err(e) => {
                warn!(error = %e, "tab query failed, skipping content script update");
                return;
            }
        };
        let profile = self.inner.profile;
        let missing: Vec<BrowserTab> = {
            let registry = self.registry().await;
            tabs.into_iter()
                .filter(|tab| {
                    profile.injects_without_url_check
                        || run_on_protected_pages
                        || can_inject_script(tab.url.as_deref())
                })
                .filter(|tab| !registry.has_tab(tab.id))
                .filter(|tab| !tab.discarded)
                .collect()
        };
        for tab in missing {
            if let Err(e) = self.inner.tabs.inject_content_script(tab.id).await {
                info!(tab_id = tab.id, error = %e, "could not update content script in tab");
            }
        }
    }

    // ─── Plumbing ─────────────────────────────────────────────────

    /// Lock the registry, restoring the checkpoint on first use.
    async fn registry(&self) -> MutexGuard<'_, RegistryState> {
        let mut registry = self.inner.registry.lock().await;
        self.inner.checkpoint.load(&mut registry).await;
        registry
    }

    /// Release the registry and persist what it held.
    async fn commit(&self, registry: MutexGuard<'_, RegistryState>) {
        let snapshot = self.inner.checkpoint.snapshot(&registry);
        drop(registry);
        if let Some(snapshot) = snapshot {
            self.inner.checkpoint.write(snapshot).await;
        }
    }

    async fn loader(&self) -> Arc<dyn FileLoader> {
        let loader = self
            .inner
            .loader
            .get_or_init(|| async { (self.inner.loader_factory)() })
            .await;
        Arc::clone(loader)
    }

    async fn active_tab(&self) -> Option<BrowserTab> {
        match self.inner.tabs.active_tab().await {
            Ok(tab) => tab,
            Err(e) => {
                debug!(error = %e, "active tab query failed");
                None
            }
        }
    }

    /// URL of a tab. Platforms that cannot read tab URLs use the recorded
    /// top-frame URL, then a probe. `about:blank`-like tabs may report an
    /// empty URL, so that is the fallback everywhere.
    async fn tab_url(&self, tab: Option<&BrowserTab>) -> String {
        let Some(tab) = tab else {
            return ABOUT_BLANK.to_owned();
        };
        let known = {
            let registry = self.registry().await;
            self.known_tab_url(&registry, tab)
        };
        match known {
            Some(url) => url,
            None => self.probe_tab_url(tab.id).await,
        }
    }

    /// The tab URL when it can be had without calling the tabs API.
    fn known_tab_url(&self, registry: &RegistryState, tab: &BrowserTab) -> Option<String> {
        if self.inner.profile.reads_tab_url_from_registry {
            return registry
                .get(tab.id, TOP_FRAME_ID)
                .map(|top| top.url.clone().unwrap_or_else(|| ABOUT_BLANK.to_owned()));
        }
        match tab.url.as_deref() {
            Some(url) if !url.is_empty() => Some(url.to_owned()),
            _ => Some(ABOUT_BLANK.to_owned()),
        }
    }

    async fn probe_tab_url(&self, tab_id: TabId) -> String {
        self.inner
            .tabs
            .probe_top_frame_url(tab_id)
            .await
            .unwrap_or_else(|_| ABOUT_BLANK.to_owned())
    }

    fn target(&self, frame_id: FrameId, document_id: Option<&str>) -> FrameTarget {
        FrameTarget {
            frame_id,
            document_id: document_id
                .filter(|_| self.inner.profile.targets_document_id)
                .map(str::to_owned),
        }
    }

    /// Send an instruction to one document: as the direct reply when the
    /// request is still waiting, and as an independent targeted push.
    /// A failed push means the frame is gone, which is not an error here.
    async fn deliver(
        &self,
        document_id: Option<&str>,
        tab_id: TabId,
        frame_id: FrameId,
        message: ToContent,
        responder: &mut Responder,
    ) {
        responder.respond(Reply::Content(message.clone()));
        let target = self.target(frame_id, document_id);
        let _ = self.inner.tabs.send_message(tab_id, message, target).await;
    }
}

/// One broadcast delivery, decided under the registry lock and sent after.
struct Push {
    tab_id: TabId,
    message: ToContent,
    target: FrameTarget,
    inline: bool,
}

fn require<T>(kind: InboundKind, value: Option<T>, field: &'static str) -> Result<T, RouterError> {
    value.ok_or(RouterError::MissingSender { kind, field })
}

fn unknown(kind: InboundKind, e: UnknownDocument) -> RouterError {
    RouterError::UnknownDocument {
        kind,
        tab_id: e.tab_id,
        frame_id: e.frame_id,
    }
}
