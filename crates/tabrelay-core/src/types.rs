use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

// ─── Identity ─────────────────────────────────────────────────────

pub type TabId = i64;
pub type FrameId = i64;

/// Browser-assigned document identifier (`documentId` on Chromium,
/// `contextId` on Firefox). Only used for best-effort targeting.
pub type DocumentId = String;

/// The tab's main document.
pub const TOP_FRAME_ID: FrameId = 0;

// ─── Document lifecycle ───────────────────────────────────────────

/// Page Lifecycle states. Only `Active`, `Passive` and `Frozen` are
/// transitioned today; the rest are reserved.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentState {
    #[default]
    Active,
    Passive,
    Hidden,
    Frozen,
    Terminated,
    Discarded,
}

impl DocumentState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Passive => "passive",
            Self::Hidden => "hidden",
            Self::Frozen => "frozen",
            Self::Terminated => "terminated",
            Self::Discarded => "discarded",
        }
    }

    /// Whether a broadcast should be delivered to a document in this state.
    pub fn receives_broadcast(self) -> bool {
        matches!(self, Self::Active | Self::Passive)
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "passive" => Ok(Self::Passive),
            "hidden" => Ok(Self::Hidden),
            "frozen" => Ok(Self::Frozen),
            "terminated" => Ok(Self::Terminated),
            "discarded" => Ok(Self::Discarded),
            _ => Err(CoreError::UnknownDocumentState(s.to_owned())),
        }
    }
}

/// One live (tab, frame) document as seen by the background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub document_id: Option<DocumentId>,
    /// `None` while frozen: the URL is unknowable until resume.
    pub url: Option<String>,
    pub state: DocumentState,
    /// Registry clock value of the last broadcast this document received.
    pub timestamp: u64,
    pub dark_theme_detected: bool,
}

impl DocumentRecord {
    /// A freshly connected (or resumed) document.
    pub fn active(document_id: Option<DocumentId>, url: Option<String>, timestamp: u64) -> Self {
        Self {
            document_id,
            url,
            state: DocumentState::Active,
            timestamp,
            dark_theme_detected: false,
        }
    }
}

// ─── Bus-facing descriptors ───────────────────────────────────────

/// Tab half of the bus sender descriptor.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderTab {
    pub id: Option<TabId>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub active: bool,
}

/// Who sent an inbound message. UI surfaces have no tab; content scripts
/// carry tab, frame, frame URL and (platform permitting) a document id.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSender {
    #[serde(default)]
    pub tab: Option<SenderTab>,
    #[serde(default)]
    pub frame_id: Option<FrameId>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub document_id: Option<String>,
    #[serde(default)]
    pub context_id: Option<String>,
}

impl MessageSender {
    /// Sender descriptor for a content script.
    pub fn frame(tab_id: TabId, tab_url: &str, frame_id: FrameId, url: &str) -> Self {
        Self {
            tab: Some(SenderTab {
                id: Some(tab_id),
                url: Some(tab_url.to_owned()),
                active: false,
            }),
            frame_id: Some(frame_id),
            url: Some(url.to_owned()),
            document_id: None,
            context_id: None,
        }
    }

    #[must_use]
    pub fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    #[must_use]
    pub fn with_context_id(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    pub fn tab_id(&self) -> Option<TabId> {
        self.tab.as_ref().and_then(|t| t.id)
    }

    pub fn tab_url(&self) -> Option<&str> {
        self.tab.as_ref().and_then(|t| t.url.as_deref())
    }

    /// Only the top frame's reports are authoritative for tab-wide signals.
    pub fn is_top_frame(&self) -> bool {
        self.frame_id == Some(TOP_FRAME_ID)
    }
}

/// A tab as reported by the browser's tab query API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserTab {
    pub id: TabId,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub discarded: bool,
}

/// Push destination inside a tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTarget {
    pub frame_id: FrameId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<DocumentId>,
}

/// Active-tab facts the background can vouch for, merged into the UI
/// data snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub url: String,
    pub id: Option<TabId>,
    pub document_id: Option<DocumentId>,
    pub is_injected: Option<bool>,
    pub is_dark_theme_detected: Option<bool>,
}
