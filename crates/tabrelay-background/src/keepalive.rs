//! Neutral replies for messages nobody answers.
//!
//! Chromium MV2 logs a closed-conduit error whenever a listener leaves a
//! message unanswered. On that platform every message outside the allow-list
//! of asynchronously answered kinds gets the sentinel reply immediately.

use tabrelay_core::{InboundKind, PlatformProfile, Reply};

/// Kinds another component replies to. Answering them here would race the
/// real reply.
pub const ANSWERED_KINDS: [InboundKind; 8] = [
    InboundKind::GetData,
    InboundKind::GetDevtoolsData,
    InboundKind::ApplyDevDynamicThemeFixes,
    InboundKind::ApplyDevInversionFixes,
    InboundKind::ApplyDevStaticThemes,
    InboundKind::DocumentConnect,
    InboundKind::DocumentResume,
    InboundKind::Fetch,
];

#[derive(Debug, Clone, Copy)]
pub struct KeepaliveShim {
    enabled: bool,
}

impl KeepaliveShim {
    pub fn new(profile: &PlatformProfile) -> Self {
        Self {
            enabled: profile.requires_keepalive_reply,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The sentinel reply for `kind`, if this platform needs one.
    pub fn reply_for(&self, kind: InboundKind) -> Option<Reply> {
        (self.enabled && !ANSWERED_KINDS.contains(&kind)).then_some(Reply::Keepalive)
    }
}
