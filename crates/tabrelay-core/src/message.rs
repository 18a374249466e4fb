//! Closed message unions exchanged over the extension bus.
//!
//! Every message carries exactly one `type` tag; the payload (under
//! `data`) is fully determined by the tag. Tag strings are the wire
//! contract shared with the content scripts and UI surfaces.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

// ─── Content script → background ──────────────────────────────────

/// How a proxied fetch result is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseType {
    #[serde(rename = "data-url")]
    DataUrl,
    #[serde(rename = "text")]
    Text,
}

/// Resource fetch parameters forwarded to the network loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchParams {
    pub url: String,
    pub response_type: ResponseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FromContent {
    #[serde(rename = "cs-frame-connect", rename_all = "camelCase")]
    DocumentConnect { is_dark: bool },
    #[serde(rename = "cs-frame-forget")]
    DocumentForget,
    #[serde(rename = "cs-frame-freeze")]
    DocumentFreeze,
    #[serde(rename = "cs-frame-resume", rename_all = "camelCase")]
    DocumentResume { is_dark: bool },
    #[serde(rename = "cs-dark-theme-detected")]
    DarkThemeDetected,
    #[serde(rename = "cs-dark-theme-not-detected")]
    DarkThemeNotDetected,
    #[serde(rename = "cs-color-scheme-change", rename_all = "camelCase")]
    ColorSchemeChange { is_dark: bool },
    #[serde(rename = "cs-fetch")]
    Fetch {
        id: String,
        #[serde(flatten)]
        params: FetchParams,
    },
}

// ─── Background → content script ──────────────────────────────────

/// Themed instructions and replies pushed to a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ToContent {
    #[serde(rename = "bg-add-css-filter", rename_all = "camelCase")]
    AddCssFilter { css: String, detect_dark_theme: bool },
    #[serde(rename = "bg-add-svg-filter", rename_all = "camelCase")]
    AddSvgFilter {
        css: String,
        svg_matrix: String,
        svg_reverse_matrix: String,
        detect_dark_theme: bool,
    },
    #[serde(rename = "bg-add-static-theme", rename_all = "camelCase")]
    AddStaticTheme { css: String, detect_dark_theme: bool },
    #[serde(rename = "bg-add-dynamic-theme", rename_all = "camelCase")]
    AddDynamicTheme {
        theme: Value,
        fixes: Option<Value>,
        #[serde(rename = "isIFrame")]
        is_iframe: bool,
        detect_dark_theme: bool,
    },
    #[serde(rename = "bg-clean-up")]
    CleanUp,
    #[serde(rename = "bg-fetch-response")]
    FetchResponse {
        id: String,
        data: Option<String>,
        error: Option<String>,
    },
    #[serde(rename = "bg-unsupported-sender")]
    UnsupportedSender,
    /// Carries the one-time picker token.
    #[serde(rename = "bg-open-picker")]
    OpenPicker(String),
}

impl ToContent {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::AddCssFilter { .. } => "bg-add-css-filter",
            Self::AddSvgFilter { .. } => "bg-add-svg-filter",
            Self::AddStaticTheme { .. } => "bg-add-static-theme",
            Self::AddDynamicTheme { .. } => "bg-add-dynamic-theme",
            Self::CleanUp => "bg-clean-up",
            Self::FetchResponse { .. } => "bg-fetch-response",
            Self::UnsupportedSender => "bg-unsupported-sender",
            Self::OpenPicker(_) => "bg-open-picker",
        }
    }
}

// ─── UI → background ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FromUi {
    #[serde(rename = "ui-get-data")]
    GetData,
    #[serde(rename = "ui-get-devtools-data")]
    GetDevtoolsData,
    #[serde(rename = "ui-change-settings")]
    ChangeSettings(Value),
    #[serde(rename = "ui-set-theme")]
    SetTheme(Value),
    #[serde(rename = "ui-toggle-active-tab")]
    ToggleActiveTab,
    #[serde(rename = "ui-subscribe-to-changes")]
    SubscribeToChanges,
    #[serde(rename = "ui-unsubscribe-from-changes")]
    UnsubscribeFromChanges,
    #[serde(rename = "ui-save-file")]
    SaveFile { name: String, content: String },
    #[serde(rename = "ui-color-scheme-change", rename_all = "camelCase")]
    ColorSchemeChange { is_dark: bool },
    #[serde(rename = "ui-apply-dev-dynamic-theme-fixes")]
    ApplyDevDynamicThemeFixes(String),
    #[serde(rename = "ui-reset-dev-dynamic-theme-fixes")]
    ResetDevDynamicThemeFixes,
    #[serde(rename = "ui-apply-dev-inversion-fixes")]
    ApplyDevInversionFixes(String),
    #[serde(rename = "ui-reset-dev-inversion-fixes")]
    ResetDevInversionFixes,
    #[serde(rename = "ui-apply-dev-static-themes")]
    ApplyDevStaticThemes(String),
    #[serde(rename = "ui-reset-dev-static-themes")]
    ResetDevStaticThemes,
}

// ─── Background → UI ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ToUi {
    /// Full extension data snapshot.
    #[serde(rename = "bg-changes")]
    Changes(Value),
}

// ─── Inbound union ────────────────────────────────────────────────

/// Anything the background's bus listener may receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    Content(FromContent),
    Ui(FromUi),
}

impl From<FromContent> for Inbound {
    fn from(message: FromContent) -> Self {
        Self::Content(message)
    }
}

impl From<FromUi> for Inbound {
    fn from(message: FromUi) -> Self {
        Self::Ui(message)
    }
}

/// Payload-free discriminant of [`Inbound`], used for allow-lists and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundKind {
    DocumentConnect,
    DocumentForget,
    DocumentFreeze,
    DocumentResume,
    DarkThemeDetected,
    DarkThemeNotDetected,
    ContentColorSchemeChange,
    Fetch,
    GetData,
    GetDevtoolsData,
    ChangeSettings,
    SetTheme,
    ToggleActiveTab,
    SubscribeToChanges,
    UnsubscribeFromChanges,
    SaveFile,
    UiColorSchemeChange,
    ApplyDevDynamicThemeFixes,
    ResetDevDynamicThemeFixes,
    ApplyDevInversionFixes,
    ResetDevInversionFixes,
    ApplyDevStaticThemes,
    ResetDevStaticThemes,
}

impl InboundKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DocumentConnect => "cs-frame-connect",
            Self::DocumentForget => "cs-frame-forget",
            Self::DocumentFreeze => "cs-frame-freeze",
            Self::DocumentResume => "cs-frame-resume",
            Self::DarkThemeDetected => "cs-dark-theme-detected",
            Self::DarkThemeNotDetected => "cs-dark-theme-not-detected",
            Self::ContentColorSchemeChange => "cs-color-scheme-change",
            Self::Fetch => "cs-fetch",
            Self::GetData => "ui-get-data",
            Self::GetDevtoolsData => "ui-get-devtools-data",
            Self::ChangeSettings => "ui-change-settings",
            Self::SetTheme => "ui-set-theme",
            Self::ToggleActiveTab => "ui-toggle-active-tab",
            Self::SubscribeToChanges => "ui-subscribe-to-changes",
            Self::UnsubscribeFromChanges => "ui-unsubscribe-from-changes",
            Self::SaveFile => "ui-save-file",
            Self::UiColorSchemeChange => "ui-color-scheme-change",
            Self::ApplyDevDynamicThemeFixes => "ui-apply-dev-dynamic-theme-fixes",
            Self::ResetDevDynamicThemeFixes => "ui-reset-dev-dynamic-theme-fixes",
            Self::ApplyDevInversionFixes => "ui-apply-dev-inversion-fixes",
            Self::ResetDevInversionFixes => "ui-reset-dev-inversion-fixes",
            Self::ApplyDevStaticThemes => "ui-apply-dev-static-themes",
            Self::ResetDevStaticThemes => "ui-reset-dev-static-themes",
        }
    }
}

impl fmt::Display for InboundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Inbound {
    pub fn kind(&self) -> InboundKind {
        match self {
            Self::Content(message) => match message {
                FromContent::DocumentConnect { .. } => InboundKind::DocumentConnect,
                FromContent::DocumentForget => InboundKind::DocumentForget,
                FromContent::DocumentFreeze => InboundKind::DocumentFreeze,
                FromContent::DocumentResume { .. } => InboundKind::DocumentResume,
                FromContent::DarkThemeDetected => InboundKind::DarkThemeDetected,
                FromContent::DarkThemeNotDetected => InboundKind::DarkThemeNotDetected,
                FromContent::ColorSchemeChange { .. } => InboundKind::ContentColorSchemeChange,
                FromContent::Fetch { .. } => InboundKind::Fetch,
            },
            Self::Ui(message) => match message {
                FromUi::GetData => InboundKind::GetData,
                FromUi::GetDevtoolsData => InboundKind::GetDevtoolsData,
                FromUi::ChangeSettings(_) => InboundKind::ChangeSettings,
                FromUi::SetTheme(_) => InboundKind::SetTheme,
                FromUi::ToggleActiveTab => InboundKind::ToggleActiveTab,
                FromUi::SubscribeToChanges => InboundKind::SubscribeToChanges,
                FromUi::UnsubscribeFromChanges => InboundKind::UnsubscribeFromChanges,
                FromUi::SaveFile { .. } => InboundKind::SaveFile,
                FromUi::ColorSchemeChange { .. } => InboundKind::UiColorSchemeChange,
                FromUi::ApplyDevDynamicThemeFixes(_) => InboundKind::ApplyDevDynamicThemeFixes,
                FromUi::ResetDevDynamicThemeFixes => InboundKind::ResetDevDynamicThemeFixes,
                FromUi::ApplyDevInversionFixes(_) => InboundKind::ApplyDevInversionFixes,
                FromUi::ResetDevInversionFixes => InboundKind::ResetDevInversionFixes,
                FromUi::ApplyDevStaticThemes(_) => InboundKind::ApplyDevStaticThemes,
                FromUi::ResetDevStaticThemes => InboundKind::ResetDevStaticThemes,
            },
        }
    }
}

// ─── Direct replies ───────────────────────────────────────────────

/// Payload handed to the bus's reply callback for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// A themed instruction or fetch response for the requesting frame.
    Content(ToContent),
    /// `{data: ...}` answer to a UI query.
    Data(Value),
    /// `{error: ...}` answer to a UI command the host rejected.
    Error(String),
    /// Neutral answer that only exists to close the reply channel.
    Keepalive,
}

/// Wire value of the keepalive reply's `type`.
pub const KEEPALIVE_SENTINEL: &str = "¯\\_(ツ)_/¯";

impl Serialize for Reply {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Content(message) => message.serialize(serializer),
            Self::Data(data) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("data", data)?;
                map.end()
            }
            Self::Error(error) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", error)?;
                map.end()
            }
            Self::Keepalive => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("type", KEEPALIVE_SENTINEL)?;
                map.end()
            }
        }
    }
}
