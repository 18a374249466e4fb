//! Per-tab one-time tokens gating the privileged picker UI.
//!
//! Tokens live in an in-process cache and in durable storage, so a token
//! issued before the background was suspended still validates afterwards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use tabrelay_core::{FrameTarget, TOP_FRAME_ID, TabId, ToContent};

use crate::error::TokenError;
use crate::ports::{KeyValueStore, TabsApi};

/// Upper bound of one random segment (2^53 - 1).
const SEGMENT_MAX: u64 = (1 << 53) - 1;

// ─── Token generation ─────────────────────────────────────────────

fn base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_owned();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// One segment: a random integer in base 36 minus its leading digit.
fn segment(rng: &mut impl Rng) -> String {
    let encoded = base36(rng.gen_range(0..SEGMENT_MAX));
    encoded.get(1..).unwrap_or_default().to_owned()
}

pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let first = segment(&mut rng);
    let second = segment(&mut rng);
    first + &second
}

pub fn storage_key(tab_id: TabId) -> String {
    format!("token-{tab_id}")
}

// ─── TokenGuard ───────────────────────────────────────────────────

pub struct TokenGuard {
    cache: Mutex<HashMap<TabId, String>>,
    store: Arc<dyn KeyValueStore>,
    tabs: Option<Arc<dyn TabsApi>>,
}

impl TokenGuard {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            store,
            tabs: None,
        }
    }

    /// Push each issued token to the tab's top frame as `OPEN_PICKER`.
    #[must_use]
    pub fn with_tabs(mut self, tabs: Arc<dyn TabsApi>) -> Self {
        self.tabs = Some(tabs);
        self
    }

    /// Issue a fresh token for a tab, superseding any previous one.
    ///
    /// The cached copy is usable even when persisting fails; such a token
    /// is still pushed but will not survive a restart.
    pub async fn issue(&self, tab_id: TabId) -> String {
        let token = generate_token();
        self.cache_put(tab_id, Some(token.clone()));
        match self
            .store
            .set(&storage_key(tab_id), Value::String(token.clone()))
            .await
        {
            Ok(()) => debug!(tab_id, "picker token issued"),
            Err(e) => warn!(tab_id, error = %e, "picker token issued but not persisted"),
        }

        if let Some(tabs) = &self.tabs {
            let target = FrameTarget {
                frame_id: TOP_FRAME_ID,
                document_id: None,
            };
            if let Err(e) = tabs
                .send_message(tab_id, ToContent::OpenPicker(token.clone()), target)
                .await
            {
                debug!(tab_id, error = %e, "picker token push not delivered");
            }
        }
        token
    }

    /// Whether `candidate` is the token currently issued for the tab.
    pub async fn validate(&self, tab_id: TabId, candidate: &str) -> bool {
        if self.cache_get(tab_id).is_some_and(|token| token == candidate) {
            return true;
        }
        // The process may have restarted since the token was issued.
        let stored = match self.store.get(&storage_key(tab_id)).await {
            Ok(value) => value.and_then(|value| value.as_str().map(str::to_owned)),
            Err(e) => {
                warn!(tab_id, error = %e, "token lookup failed");
                return false;
            }
        };
        let valid = stored.as_deref() == Some(candidate);
        self.cache_put(tab_id, stored);
        valid
    }

    pub async fn invalidate(&self, tab_id: TabId) -> Result<(), TokenError> {
        self.cache_put(tab_id, None);
        self.store.remove(&storage_key(tab_id)).await?;
        debug!(tab_id, "picker token invalidated");
        Ok(())
    }

    fn cache_get(&self, tab_id: TabId) -> Option<String> {
        match self.cache.lock() {
            Ok(cache) => cache.get(&tab_id).cloned(),
            Err(_) => None,
        }
    }

    fn cache_put(&self, tab_id: TabId, token: Option<String>) {
        let Ok(mut cache) = self.cache.lock() else {
            return;
        };
        match token {
            Some(token) => cache.insert(tab_id, token),
            None => cache.remove(&tab_id),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BusError, StoreError};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use tabrelay_core::BrowserTab;

    /// Reads find nothing and writes always fail.
    struct ReadOnlyStore;

    #[async_trait]
    impl KeyValueStore for ReadOnlyStore {
        async fn get(&self, _key: &str) -> Result<Option<Value>, StoreError> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: Value) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("read-only".into()))
        }

        async fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("read-only".into()))
        }
    }

    #[derive(Default)]
    struct PushLog(Mutex<Vec<(TabId, ToContent, FrameTarget)>>);

    #[async_trait]
    impl TabsApi for PushLog {
        async fn query_tabs(&self) -> Result<Vec<BrowserTab>, BusError> {
            Ok(Vec::new())
        }

        async fn active_tab(&self) -> Result<Option<BrowserTab>, BusError> {
            Ok(None)
        }

        async fn send_message(
            &self,
            tab_id: TabId,
            message: ToContent,
            target: FrameTarget,
        ) -> Result<(), BusError> {
            self.0.lock().unwrap().push((tab_id, message, target));
            Ok(())
        }

        async fn inject_content_script(&self, _tab_id: TabId) -> Result<(), BusError> {
            Ok(())
        }
    }

    fn guard(store: &Arc<MemoryStore>) -> TokenGuard {
        TokenGuard::new(Arc::clone(store) as Arc<dyn KeyValueStore>)
    }

    #[test]
    fn base36_encodes() {
        assert_eq!(base36(0), "0");
        assert_eq!(base36(35), "z");
        assert_eq!(base36(36), "10");
        assert_eq!(base36(SEGMENT_MAX), "2gosa7pa2gv");
    }

    #[test]
    fn tokens_are_distinct_and_base36() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert!(!a.is_empty());
        assert!(a.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[tokio::test]
    async fn issue_validate_invalidate() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard(&store);
        let token = guard.issue(7).await;

        assert!(!guard.validate(7, "wrong").await);
        assert!(guard.validate(7, &token).await);
        guard.invalidate(7).await.expect("invalidate");
        assert!(!guard.validate(7, &token).await);
        assert!(store.entries().is_empty());
    }

    #[tokio::test]
    async fn token_is_bound_to_its_tab() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard(&store);
        let token = guard.issue(1).await;
        assert!(!guard.validate(2, &token).await);
    }

    #[tokio::test]
    async fn reissue_supersedes_previous_token() {
        let store = Arc::new(MemoryStore::new());
        let guard = guard(&store);
        let old = guard.issue(3).await;
        let new = guard.issue(3).await;
        assert!(!guard.validate(3, &old).await);
        assert!(guard.validate(3, &new).await);
    }

    #[tokio::test]
    async fn survives_process_restart() {
        let store = Arc::new(MemoryStore::new());
        let token = guard(&store).issue(7).await;
        assert_eq!(store.entries().get("token-7"), Some(&json!(token)));

        let restarted = guard(&store);
        assert!(!restarted.validate(7, "wrong").await);
        assert!(restarted.validate(7, &token).await);

        restarted.invalidate(7).await.expect("invalidate");
        assert!(!guard(&store).validate(7, &token).await);
    }

    #[tokio::test]
    async fn unpersisted_token_is_still_pushed_and_valid() {
        let pushes = Arc::new(PushLog::default());
        let guard = TokenGuard::new(Arc::new(ReadOnlyStore))
            .with_tabs(Arc::clone(&pushes) as Arc<dyn TabsApi>);

        let token = guard.issue(5).await;
        assert!(!token.is_empty());
        let sent = pushes.0.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 5);
        assert_eq!(sent[0].1, ToContent::OpenPicker(token.clone()));
        assert_eq!(sent[0].2.frame_id, TOP_FRAME_ID);
        assert!(guard.validate(5, &token).await);
    }
}
