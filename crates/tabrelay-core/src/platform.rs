//! Platform capability profile.
//!
//! Build variants differ only in a handful of capabilities; the document
//! state machine is identical across them. The profile is a value handed to
//! the background at construction, never a global.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::types::MessageSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlatformVariant {
    ChromiumMv2,
    ChromiumMv3,
    Firefox,
    Thunderbird,
}

impl PlatformVariant {
    pub const ALL: [Self; 4] = [
        Self::ChromiumMv2,
        Self::ChromiumMv3,
        Self::Firefox,
        Self::Thunderbird,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChromiumMv2 => "chromium-mv2",
            Self::ChromiumMv3 => "chromium-mv3",
            Self::Firefox => "firefox",
            Self::Thunderbird => "thunderbird",
        }
    }
}

impl fmt::Display for PlatformVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformVariant {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chromium-mv2" | "chrome-mv2" => Ok(Self::ChromiumMv2),
            "chromium-mv3" | "chrome-mv3" | "chromium" | "chrome" => Ok(Self::ChromiumMv3),
            "firefox" => Ok(Self::Firefox),
            "thunderbird" => Ok(Self::Thunderbird),
            _ => Err(CoreError::UnknownPlatform(s.to_owned())),
        }
    }
}

/// Which sender field carries the browser's document identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentIdSource {
    DocumentId,
    ContextId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformProfile {
    pub variant: PlatformVariant,
    pub document_id_source: DocumentIdSource,
    /// Pushes may name a document id in addition to the frame id.
    pub targets_document_id: bool,
    /// The background can drive a synthetic download for SAVE_FILE.
    pub background_can_save_file: bool,
    /// `chrome://` resources must not be fetched (embedded mail runtime).
    pub blocks_chrome_scheme_fetch: bool,
    /// Every inbound message needs some synchronous reply.
    pub requires_keepalive_reply: bool,
    /// Tab URLs are not readable; the registry's top-frame URL stands in.
    pub reads_tab_url_from_registry: bool,
    /// Documents report freeze/resume/pagehide.
    pub has_page_lifecycle: bool,
    /// Content script may be injected without checking the tab URL.
    pub injects_without_url_check: bool,
}

impl PlatformProfile {
    pub fn for_variant(variant: PlatformVariant) -> Self {
        match variant {
            PlatformVariant::ChromiumMv2 => Self {
                variant,
                document_id_source: DocumentIdSource::DocumentId,
                targets_document_id: true,
                background_can_save_file: true,
                blocks_chrome_scheme_fetch: false,
                requires_keepalive_reply: true,
                reads_tab_url_from_registry: false,
                has_page_lifecycle: true,
                injects_without_url_check: false,
            },
            PlatformVariant::ChromiumMv3 => Self {
                variant,
                document_id_source: DocumentIdSource::DocumentId,
                targets_document_id: true,
                background_can_save_file: false,
                blocks_chrome_scheme_fetch: false,
                requires_keepalive_reply: false,
                reads_tab_url_from_registry: true,
                has_page_lifecycle: true,
                injects_without_url_check: true,
            },
            PlatformVariant::Firefox => Self {
                variant,
                document_id_source: DocumentIdSource::ContextId,
                targets_document_id: false,
                background_can_save_file: true,
                blocks_chrome_scheme_fetch: false,
                requires_keepalive_reply: false,
                reads_tab_url_from_registry: false,
                has_page_lifecycle: true,
                injects_without_url_check: false,
            },
            PlatformVariant::Thunderbird => Self {
                variant,
                document_id_source: DocumentIdSource::ContextId,
                targets_document_id: false,
                background_can_save_file: true,
                blocks_chrome_scheme_fetch: true,
                requires_keepalive_reply: false,
                reads_tab_url_from_registry: false,
                has_page_lifecycle: false,
                injects_without_url_check: false,
            },
        }
    }

    pub fn chromium_mv2() -> Self {
        Self::for_variant(PlatformVariant::ChromiumMv2)
    }

    pub fn chromium_mv3() -> Self {
        Self::for_variant(PlatformVariant::ChromiumMv3)
    }

    pub fn firefox() -> Self {
        Self::for_variant(PlatformVariant::Firefox)
    }

    pub fn thunderbird() -> Self {
        Self::for_variant(PlatformVariant::Thunderbird)
    }

    /// Document identity of a sender, read from the field this platform uses.
    pub fn document_id_of(&self, sender: &MessageSender) -> Option<String> {
        match self.document_id_source {
            DocumentIdSource::DocumentId => sender.document_id.clone(),
            DocumentIdSource::ContextId => sender.context_id.clone(),
        }
    }
}

impl Default for PlatformProfile {
    fn default() -> Self {
        Self::chromium_mv3()
    }
}

impl FromStr for PlatformProfile {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<PlatformVariant>().map(Self::for_variant)
    }
}
