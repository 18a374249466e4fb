//! One document's messaging session with the background.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use tabrelay_core::{FromContent, PlatformProfile, ToContent};

use crate::error::PortError;

// ─── Ports ────────────────────────────────────────────────────────

/// Send half of the bus, as seen from a page.
#[async_trait]
pub trait BackgroundPort: Send + Sync {
    /// Send a message and wait for the direct reply, if the background
    /// gave one.
    async fn send(&self, message: FromContent) -> Result<Option<ToContent>, PortError>;
}

/// Where an injected stylesheet came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleKind {
    Filter,
    Static,
}

/// DOM-side styling operations.
pub trait PageStyler: Send {
    fn apply_style(&mut self, css: &str, kind: StyleKind);
    fn apply_svg_filter(&mut self, svg_matrix: &str, svg_reverse_matrix: &str);
    fn apply_dynamic_theme(&mut self, theme: &Value, fixes: Option<&Value>, is_iframe: bool);
    fn remove_style(&mut self);
    fn remove_svg_filter(&mut self);
    fn remove_dynamic_theme(&mut self);
    fn start_dark_theme_detector(&mut self);
    fn stop_dark_theme_detector(&mut self);
    fn stop_color_scheme_detector(&mut self);
    fn open_picker(&mut self, token: &str);
}

/// Styling a running dark-theme detector will tear down when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Detecting {
    Style,
    SvgFilter,
    DynamicTheme,
}

// ─── ContentSession ───────────────────────────────────────────────

pub struct ContentSession<P, S> {
    profile: PlatformProfile,
    port: P,
    styler: S,
    unloaded: bool,
    lifecycle_listeners: bool,
    detecting: Option<Detecting>,
    picker_open: bool,
}

impl<P: BackgroundPort, S: PageStyler> ContentSession<P, S> {
    pub fn new(profile: PlatformProfile, port: P, styler: S) -> Self {
        Self {
            profile,
            port,
            styler,
            unloaded: false,
            lifecycle_listeners: false,
            detecting: None,
            picker_open: false,
        }
    }

    pub fn styler(&self) -> &S {
        &self.styler
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn is_unloaded(&self) -> bool {
        self.unloaded
    }

    /// Whether pagehide/freeze/resume are being observed.
    pub fn listens_to_lifecycle(&self) -> bool {
        self.lifecycle_listeners
    }

    /// Announce the document. Mail views have no lifecycle events to observe.
    pub async fn start(&mut self, is_dark: bool) {
        self.lifecycle_listeners = self.profile.has_page_lifecycle;
        self.send(FromContent::DocumentConnect { is_dark }).await;
    }

    /// A page kept in the back/forward cache is not gone.
    pub async fn page_hide(&mut self, persisted: bool) {
        if self.lifecycle_listeners && !persisted {
            self.send(FromContent::DocumentForget).await;
        }
    }

    pub async fn freeze(&mut self) {
        if self.lifecycle_listeners {
            self.send(FromContent::DocumentFreeze).await;
        }
    }

    pub async fn resume(&mut self, is_dark: bool) {
        if self.lifecycle_listeners {
            self.send(FromContent::DocumentResume { is_dark }).await;
        }
    }

    pub async fn color_scheme_changed(&mut self, is_dark: bool) {
        self.send(FromContent::ColorSchemeChange { is_dark }).await;
    }

    /// The detector found the page already dark: drop our styling.
    pub async fn dark_theme_detected(&mut self) {
        match self.detecting.take() {
            Some(Detecting::Style) => self.styler.remove_style(),
            Some(Detecting::SvgFilter) => {
                self.styler.remove_style();
                self.styler.remove_svg_filter();
            }
            Some(Detecting::DynamicTheme) => self.styler.remove_dynamic_theme(),
            None => {}
        }
        self.send(FromContent::DarkThemeDetected).await;
    }

    /// Apply a message pushed by the background.
    pub fn on_message(&mut self, message: &ToContent) {
        debug!(tag = message.tag(), "background message");
        match message {
            ToContent::AddCssFilter {
                css,
                detect_dark_theme,
            }
            | ToContent::AddStaticTheme {
                css,
                detect_dark_theme,
            } => {
                let kind = match message {
                    ToContent::AddStaticTheme { .. } => StyleKind::Static,
                    _ => StyleKind::Filter,
                };
                self.styler.remove_dynamic_theme();
                self.styler.apply_style(css, kind);
                self.watch_dark_theme(*detect_dark_theme, Detecting::Style);
            }
            ToContent::AddSvgFilter {
                css,
                svg_matrix,
                svg_reverse_matrix,
                detect_dark_theme,
            } => {
                self.styler.remove_dynamic_theme();
                self.styler.apply_svg_filter(svg_matrix, svg_reverse_matrix);
                self.styler.apply_style(css, StyleKind::Filter);
                self.watch_dark_theme(*detect_dark_theme, Detecting::SvgFilter);
            }
            ToContent::AddDynamicTheme {
                theme,
                fixes,
                is_iframe,
                detect_dark_theme,
            } => {
                self.styler.remove_style();
                self.styler.apply_dynamic_theme(theme, fixes.as_ref(), *is_iframe);
                self.watch_dark_theme(*detect_dark_theme, Detecting::DynamicTheme);
            }
            ToContent::CleanUp | ToContent::UnsupportedSender => {
                self.remove_styling();
                self.styler.stop_dark_theme_detector();
                self.detecting = None;
            }
            ToContent::OpenPicker(token) => {
                if !self.picker_open {
                    self.picker_open = true;
                    self.styler.open_picker(token);
                }
            }
            ToContent::FetchResponse { .. } => {}
        }
    }

    /// Stop talking to the background for good.
    pub fn cleanup(&mut self) {
        self.unloaded = true;
        self.lifecycle_listeners = false;
        self.detecting = None;
        self.styler.stop_dark_theme_detector();
        self.styler.stop_color_scheme_detector();
    }

    fn watch_dark_theme(&mut self, enabled: bool, target: Detecting) {
        if enabled {
            self.detecting = Some(target);
            self.styler.start_dark_theme_detector();
        }
    }

    fn remove_styling(&mut self) {
        self.styler.remove_style();
        self.styler.remove_svg_filter();
        self.styler.remove_dynamic_theme();
    }

    async fn send(&mut self, message: FromContent) {
        if self.unloaded {
            return;
        }
        match self.port.send(message).await {
            Ok(Some(ToContent::UnsupportedSender)) => {
                info!("background rejected this sender, cleaning up");
                self.remove_styling();
                self.cleanup();
            }
            // Instructions also arrive as pushes; the direct reply is only
            // inspected for rejection.
            Ok(_) => {}
            Err(PortError::ContextInvalidated) => {
                info!("extension context invalidated, cleaning up");
                self.remove_styling();
                self.cleanup();
            }
            Err(e) => warn!(error = %e, "unexpected error during message passing"),
        }
    }
}
