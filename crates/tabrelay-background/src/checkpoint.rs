//! Checkpoint manager: gives a component crash-resilient persisted state.
//!
//! `load` merges the persisted blob into the live state once per process
//! lifetime; a failed read is retried on the next call, and saves are held
//! back until it succeeds so a partial state never replaces the stored one.
//!
//! Snapshots are numbered when taken and staged in a single slot. One write
//! runs at a time; saves arriving while it is in flight replace each other
//! in the slot, and the next writer stores only the newest. An older
//! snapshot never overwrites a newer one.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex as StdMutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::ports::KeyValueStore;

/// State that can be checkpointed.
pub trait CheckpointState: Serialize + DeserializeOwned + Send {
    /// Fold a persisted copy into the live state. Live data wins where both
    /// know the same entry.
    fn merge_persisted(&mut self, persisted: Self);
}

/// Stored layout: the serialized state plus when it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointBlob {
    pub saved_at: DateTime<Utc>,
    pub state: Value,
}

/// A serialized state waiting to be written.
#[derive(Debug, Clone)]
pub struct Snapshot {
    generation: u64,
    blob: CheckpointBlob,
}

impl Snapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub struct Checkpoint<T> {
    key: String,
    store: Arc<dyn KeyValueStore>,
    loaded: AtomicBool,
    /// The last load attempt could not read the store.
    load_failed: AtomicBool,
    taken: AtomicU64,
    /// Newest snapshot not yet picked up by a writer.
    pending: StdMutex<Option<Snapshot>>,
    /// Generation of the last snapshot that reached the store. Held for the
    /// whole write.
    written: Mutex<u64>,
    _state: PhantomData<fn() -> T>,
}

impl<T: CheckpointState> Checkpoint<T> {
    pub fn new(key: impl Into<String>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            key: key.into(),
            store,
            loaded: AtomicBool::new(false),
            load_failed: AtomicBool::new(false),
            taken: AtomicU64::new(0),
            pending: StdMutex::new(None),
            written: Mutex::new(0),
            _state: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Merge the persisted state into `live` on the first successful call;
    /// later calls are no-ops. Read failures are logged, leave `live`
    /// untouched, and make the next call try again.
    pub async fn load(&self, live: &mut T) {
        if self.is_loaded() {
            return;
        }
        match self.store.get(&self.key).await {
            Ok(Some(value)) => match decode::<T>(value) {
                Ok(persisted) => {
                    live.merge_persisted(persisted);
                    debug!(key = %self.key, "checkpoint restored");
                }
                Err(e) => warn!(key = %self.key, error = %e, "discarding unreadable checkpoint"),
            },
            Ok(None) => debug!(key = %self.key, "no checkpoint stored"),
            Err(e) => {
                warn!(key = %self.key, error = %e, "checkpoint load failed, will retry");
                self.load_failed.store(true, Ordering::Release);
                return;
            }
        }
        self.load_failed.store(false, Ordering::Release);
        self.loaded.store(true, Ordering::Release);
    }

    /// Serialize `live` now. Pair with [`Checkpoint::write`] once any lock
    /// guarding `live` has been released. `None` while the persisted state
    /// could not be read.
    pub fn snapshot(&self, live: &T) -> Option<Snapshot> {
        if self.load_failed.load(Ordering::Acquire) {
            debug!(key = %self.key, "checkpoint not restored yet, holding back save");
            return None;
        }
        match serde_json::to_value(live) {
            Ok(state) => Some(Snapshot {
                generation: self.taken.fetch_add(1, Ordering::AcqRel) + 1,
                blob: CheckpointBlob {
                    saved_at: Utc::now(),
                    state,
                },
            }),
            Err(e) => {
                warn!(key = %self.key, error = %e, "checkpoint serialization failed");
                None
            }
        }
    }

    /// Write a snapshot unless a newer one already reached the store or
    /// another writer picked it up. Failures are logged, never returned.
    pub async fn write(&self, snapshot: Snapshot) {
        self.stage(snapshot);
        let mut written = self.written.lock().await;
        let Some(snapshot) = self.take_pending() else {
            debug!(key = %self.key, "checkpoint coalesced into a concurrent write");
            return;
        };
        if snapshot.generation <= *written {
            debug!(
                key = %self.key,
                generation = snapshot.generation,
                "checkpoint superseded, skipping write"
            );
            return;
        }
        let value = match serde_json::to_value(&snapshot.blob) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %self.key, error = %e, "checkpoint serialization failed");
                return;
            }
        };
        match self.store.set(&self.key, value).await {
            Ok(()) => *written = snapshot.generation,
            Err(e) => warn!(key = %self.key, error = %e, "checkpoint save failed"),
        }
    }

    fn stage(&self, snapshot: Snapshot) {
        let Ok(mut pending) = self.pending.lock() else {
            return;
        };
        if pending
            .as_ref()
            .is_none_or(|staged| staged.generation < snapshot.generation)
        {
            *pending = Some(snapshot);
        }
    }

    fn take_pending(&self) -> Option<Snapshot> {
        self.pending.lock().ok().and_then(|mut pending| pending.take())
    }

    pub async fn save(&self, live: &T) {
        if let Some(snapshot) = self.snapshot(live) {
            self.write(snapshot).await;
        }
    }
}

/// Accepts the blob layout, or a bare state written by older builds.
fn decode<T: DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
    match serde_json::from_value::<CheckpointBlob>(value.clone()) {
        Ok(blob) => serde_json::from_value(blob.state),
        Err(_) => serde_json::from_value(value),
    }
}

/// Read a checkpoint blob without a live owner (inspection tooling).
pub async fn read_blob(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<CheckpointBlob>, crate::error::StoreError> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}
