//! Document registry: every known (tab, frame) document and the logical
//! clock used to detect documents that missed a broadcast.
//!
//! Pure state transitions. Locking, checkpointing and message delivery are
//! the router's job.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tabrelay_core::{DocumentId, DocumentRecord, DocumentState, FrameId, TOP_FRAME_ID, TabId};

use crate::checkpoint::CheckpointState;

/// Missing-record outcome of a transition that requires an existing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownDocument {
    pub tab_id: TabId,
    pub frame_id: FrameId,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryState {
    tabs: BTreeMap<TabId, BTreeMap<FrameId, DocumentRecord>>,
    /// Bumped once per broadcast cycle.
    timestamp: u64,
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clock(&self) -> u64 {
        self.timestamp
    }

    pub fn get(&self, tab_id: TabId, frame_id: FrameId) -> Option<&DocumentRecord> {
        self.tabs.get(&tab_id).and_then(|frames| frames.get(&frame_id))
    }

    pub fn has_tab(&self, tab_id: TabId) -> bool {
        self.tabs.contains_key(&tab_id)
    }

    pub fn tab_ids(&self) -> impl Iterator<Item = TabId> + '_ {
        self.tabs.keys().copied()
    }

    pub fn frames(&self, tab_id: TabId) -> impl Iterator<Item = (FrameId, &DocumentRecord)> + '_ {
        self.tabs
            .get(&tab_id)
            .into_iter()
            .flat_map(|frames| frames.iter().map(|(id, record)| (*id, record)))
    }

    pub fn document_count(&self) -> usize {
        self.tabs.values().map(BTreeMap::len).sum()
    }

    /// Insert or replace the document as `Active`, stamped with the current clock.
    pub fn connect(
        &mut self,
        tab_id: TabId,
        frame_id: FrameId,
        document_id: Option<DocumentId>,
        url: Option<String>,
    ) {
        let record = DocumentRecord::active(document_id, url, self.timestamp);
        self.tabs.entry(tab_id).or_default().insert(frame_id, record);
    }

    /// Resume replaces the record outright, exactly like a fresh connect.
    pub fn resume(
        &mut self,
        tab_id: TabId,
        frame_id: FrameId,
        document_id: Option<DocumentId>,
        url: Option<String>,
    ) {
        self.connect(tab_id, frame_id, document_id, url);
    }

    /// Remove one frame; forgetting the top frame forgets the whole tab.
    /// Returns the number of records removed.
    pub fn forget(&mut self, tab_id: TabId, frame_id: FrameId) -> usize {
        if frame_id == TOP_FRAME_ID {
            return self.tabs.remove(&tab_id).map_or(0, |frames| frames.len());
        }
        let Some(frames) = self.tabs.get_mut(&tab_id) else {
            return 0;
        };
        let removed = usize::from(frames.remove(&frame_id).is_some());
        if frames.is_empty() {
            self.tabs.remove(&tab_id);
        }
        removed
    }

    pub fn freeze(&mut self, tab_id: TabId, frame_id: FrameId) -> Result<(), UnknownDocument> {
        let record = self.get_mut(tab_id, frame_id)?;
        record.state = DocumentState::Frozen;
        record.url = None;
        Ok(())
    }

    pub fn mark_dark_theme_detected(
        &mut self,
        tab_id: TabId,
        frame_id: FrameId,
    ) -> Result<(), UnknownDocument> {
        self.get_mut(tab_id, frame_id)?.dark_theme_detected = true;
        Ok(())
    }

    /// Whether a resuming document missed a broadcast while it was away.
    /// A document the registry has never seen missed every broadcast so far.
    pub fn missed_broadcast(&self, tab_id: TabId, frame_id: FrameId) -> bool {
        match self.get(tab_id, frame_id) {
            Some(record) => record.timestamp < self.timestamp,
            None => self.timestamp > 0,
        }
    }

    /// Start a broadcast cycle. Returns the new clock value.
    pub fn advance_clock(&mut self) -> u64 {
        self.timestamp += 1;
        self.timestamp
    }

    /// Record that a document received the broadcast of the current cycle.
    pub fn stamp(&mut self, tab_id: TabId, frame_id: FrameId) {
        let clock = self.timestamp;
        if let Ok(record) = self.get_mut(tab_id, frame_id) {
            record.timestamp = clock;
        }
    }

    /// Frames of a tab that a broadcast should reach.
    pub fn receiving_frames(&self, tab_id: TabId) -> Vec<(FrameId, DocumentRecord)> {
        self.frames(tab_id)
            .filter(|(_, record)| record.state.receives_broadcast())
            .map(|(id, record)| (id, record.clone()))
            .collect()
    }

    fn get_mut(
        &mut self,
        tab_id: TabId,
        frame_id: FrameId,
    ) -> Result<&mut DocumentRecord, UnknownDocument> {
        self.tabs
            .get_mut(&tab_id)
            .and_then(|frames| frames.get_mut(&frame_id))
            .ok_or(UnknownDocument { tab_id, frame_id })
    }
}

impl CheckpointState for RegistryState {
    fn merge_persisted(&mut self, persisted: Self) {
        for (tab_id, frames) in persisted.tabs {
            let live = self.tabs.entry(tab_id).or_default();
            for (frame_id, record) in frames {
                live.entry(frame_id).or_insert(record);
            }
        }
        self.timestamp = self.timestamp.max(persisted.timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Option<String> {
        Some(s.to_owned())
    }

    #[test]
    fn connect_creates_active_record() {
        let mut reg = RegistryState::new();
        reg.connect(1, 0, Some("d1".into()), url("https://example.com"));
        let record = reg.get(1, 0).expect("record");
        assert_eq!(record.state, DocumentState::Active);
        assert_eq!(record.url.as_deref(), Some("https://example.com"));
        assert!(!record.dark_theme_detected);
        assert_eq!(record.timestamp, 0);
    }

    #[test]
    fn connect_stamps_current_clock() {
        let mut reg = RegistryState::new();
        reg.advance_clock();
        reg.advance_clock();
        reg.connect(1, 3, None, url("https://a.com/frame"));
        assert_eq!(reg.get(1, 3).expect("record").timestamp, 2);
    }

    #[test]
    fn freeze_nulls_url() {
        let mut reg = RegistryState::new();
        reg.connect(1, 0, None, url("https://example.com"));
        reg.freeze(1, 0).expect("freeze");
        let record = reg.get(1, 0).expect("record");
        assert_eq!(record.state, DocumentState::Frozen);
        assert_eq!(record.url, None);
    }

    #[test]
    fn freeze_unknown_document_fails() {
        let mut reg = RegistryState::new();
        assert_eq!(reg.freeze(4, 2), Err(UnknownDocument { tab_id: 4, frame_id: 2 }));
    }

    #[test]
    fn resume_replaces_record() {
        let mut reg = RegistryState::new();
        reg.connect(1, 0, None, url("https://example.com"));
        reg.mark_dark_theme_detected(1, 0).expect("mark");
        reg.freeze(1, 0).expect("freeze");
        reg.resume(1, 0, Some("d2".into()), url("https://example.com"));
        let record = reg.get(1, 0).expect("record");
        assert_eq!(record.state, DocumentState::Active);
        assert_eq!(record.url.as_deref(), Some("https://example.com"));
        assert_eq!(record.document_id.as_deref(), Some("d2"));
        assert!(!record.dark_theme_detected);
    }

    #[test]
    fn forget_top_frame_cascades() {
        let mut reg = RegistryState::new();
        reg.connect(2, 0, None, url("https://a.com"));
        reg.connect(2, 5, None, url("https://ads.com"));
        assert_eq!(reg.forget(2, 0), 2);
        assert!(!reg.has_tab(2));
        assert_eq!(reg.frames(2).count(), 0);
    }

    #[test]
    fn forget_sub_frame_keeps_siblings() {
        let mut reg = RegistryState::new();
        reg.connect(2, 0, None, url("https://a.com"));
        reg.connect(2, 5, None, url("https://ads.com"));
        assert_eq!(reg.forget(2, 5), 1);
        assert!(reg.get(2, 0).is_some());
        assert!(reg.get(2, 5).is_none());
    }

    #[test]
    fn forget_is_idempotent() {
        let mut reg = RegistryState::new();
        assert_eq!(reg.forget(9, 0), 0);
        assert_eq!(reg.forget(9, 3), 0);
        reg.connect(9, 3, None, None);
        assert_eq!(reg.forget(9, 3), 1);
        assert_eq!(reg.forget(9, 3), 0);
        assert!(!reg.has_tab(9));
    }

    #[test]
    fn last_transition_wins() {
        let mut reg = RegistryState::new();
        reg.connect(1, 1, None, url("https://a.com"));
        reg.freeze(1, 1).expect("freeze");
        reg.resume(1, 1, None, url("https://a.com"));
        reg.freeze(1, 1).expect("freeze");
        assert_eq!(reg.get(1, 1).expect("record").state, DocumentState::Frozen);
        reg.connect(1, 1, None, url("https://b.com"));
        assert_eq!(reg.get(1, 1).expect("record").state, DocumentState::Active);
        reg.forget(1, 1);
        assert!(reg.get(1, 1).is_none());
    }

    #[test]
    fn missed_broadcast_detection() {
        let mut reg = RegistryState::new();
        reg.connect(1, 0, None, url("https://a.com"));
        assert!(!reg.missed_broadcast(1, 0));
        reg.advance_clock();
        assert!(reg.missed_broadcast(1, 0));
        reg.stamp(1, 0);
        assert!(!reg.missed_broadcast(1, 0));
        // Never-seen documents missed everything once a broadcast happened.
        assert!(reg.missed_broadcast(7, 0));
    }

    #[test]
    fn receiving_frames_skip_frozen() {
        let mut reg = RegistryState::new();
        reg.connect(1, 0, None, url("https://a.com"));
        reg.connect(1, 4, None, url("https://a.com/f"));
        reg.freeze(1, 4).expect("freeze");
        let frames: Vec<FrameId> = reg.receiving_frames(1).into_iter().map(|(id, _)| id).collect();
        assert_eq!(frames, vec![0]);
    }

    #[test]
    fn merge_keeps_live_records_and_max_clock() {
        let mut persisted = RegistryState::new();
        persisted.connect(1, 0, None, url("https://old.com"));
        persisted.connect(3, 0, None, url("https://c.com"));
        persisted.timestamp = 5;

        let mut live = RegistryState::new();
        live.connect(1, 0, None, url("https://new.com"));
        live.merge_persisted(persisted);

        assert_eq!(live.get(1, 0).and_then(|r| r.url.as_deref()), Some("https://new.com"));
        assert!(live.get(3, 0).is_some());
        assert_eq!(live.clock(), 5);
    }

    #[test]
    fn serde_roundtrip_keeps_integer_keys() {
        let mut reg = RegistryState::new();
        reg.connect(12, 0, None, url("https://a.com"));
        reg.connect(12, 7, None, url("https://a.com/f"));
        reg.advance_clock();
        let json = serde_json::to_value(&reg).expect("serialize");
        assert_eq!(json["timestamp"], 1);
        assert_eq!(json["tabs"]["12"]["7"]["url"], "https://a.com/f");
        let back: RegistryState = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, reg);
    }
}
