//! Replays a recorded bus trace through a real `Background`.
//!
//! Input is newline-delimited JSON, one event per line, tagged by `event`:
//!
//! ```text
//! {"event":"tabs","tabs":[{"id":1,"url":"https://a.com","active":true}]}
//! {"event":"message","message":{"type":"cs-frame-connect","data":{"isDark":false}},
//!  "sender":{"tab":{"id":1,"url":"https://a.com"},"frameId":0,"url":"https://a.com"}}
//! {"event":"broadcast","onlyActiveTab":true}
//! {"event":"tab-removed","tabId":1}
//! ```
//!
//! Every reply, push, UI change notification and injection the background
//! produces is written to the output as one JSON line.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use tabrelay_background::core::{BrowserTab, Inbound, MessageSender, PlatformProfile, Reply, TabId, ToUi};
use tabrelay_background::{
    Background, BackgroundParts, BusEvent, Envelope, FileLoader, KeyValueStore, Responder, UiPort,
};

use crate::harness::{DownloadDir, FixedTheme, MemoryHost, OfflineLoader, Push, ReplayTabs};

// ─── Trace format ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum TraceEvent {
    /// Replace the set of open tabs.
    Tabs { tabs: Vec<BrowserTab> },
    Message {
        message: Inbound,
        #[serde(default)]
        sender: MessageSender,
        /// UI connection id, for subscription commands.
        #[serde(default)]
        port: Option<u64>,
    },
    TabRemoved {
        #[serde(rename = "tabId")]
        tab_id: TabId,
    },
    Broadcast {
        #[serde(default, rename = "onlyActiveTab")]
        only_active_tab: bool,
    },
    UpdateContentScript {
        #[serde(default, rename = "runOnProtectedPages")]
        run_on_protected_pages: bool,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Output {
    Reply {
        line: usize,
        reply: Reply,
    },
    Push {
        line: usize,
        #[serde(flatten)]
        push: Push,
    },
    Changes {
        line: usize,
        port: u64,
        data: Value,
    },
    Injected {
        line: usize,
        #[serde(rename = "tabId")]
        tab_id: TabId,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    pub events: usize,
    pub skipped: usize,
    pub outputs: usize,
}

// ─── Replay ───────────────────────────────────────────────────────

pub struct Replay {
    background: Background,
    tabs: Arc<ReplayTabs>,
    ports: HashMap<u64, (UiPort, mpsc::UnboundedReceiver<ToUi>)>,
}

impl Replay {
    pub fn new(
        profile: PlatformProfile,
        store: Arc<dyn KeyValueStore>,
        css: &str,
        downloads: PathBuf,
    ) -> Self {
        let tabs = Arc::new(ReplayTabs::default());
        let background = Background::new(
            profile,
            BackgroundParts {
                tabs: Arc::clone(&tabs) as _,
                theme: Arc::new(FixedTheme::new(css)),
                store,
                host: Arc::new(MemoryHost::default()),
                loader_factory: Box::new(|| Arc::new(OfflineLoader) as Arc<dyn FileLoader>),
                saver: Some(Arc::new(DownloadDir::new(downloads))),
            },
        );
        Self {
            background,
            tabs,
            ports: HashMap::new(),
        }
    }

    pub fn background(&self) -> &Background {
        &self.background
    }

    /// Apply one event and collect everything it produced.
    pub async fn apply(&mut self, line: usize, event: TraceEvent) -> Vec<Output> {
        let mut outputs = Vec::new();
        match event {
            TraceEvent::Tabs { tabs } => self.tabs.set_tabs(tabs),
            TraceEvent::Message {
                message,
                sender,
                port,
            } => {
                let mut envelope = Envelope::new(message, sender);
                if let Some(id) = port {
                    let (port, _) = self.ports.entry(id).or_insert_with(|| UiPort::new(id));
                    envelope = envelope.with_port(port.clone());
                }
                let (responder, rx) = Responder::channel();
                self.background
                    .handle_event(BusEvent::Message(envelope, responder))
                    .await;
                // Resolves once the reply is sent or every holder is done.
                if let Ok(reply) = rx.await {
                    outputs.push(Output::Reply { line, reply });
                }
            }
            TraceEvent::TabRemoved { tab_id } => {
                self.tabs.remove_tab(tab_id);
                self.background
                    .handle_event(BusEvent::TabRemoved(tab_id))
                    .await;
            }
            TraceEvent::Broadcast { only_active_tab } => {
                self.background
                    .handle_event(BusEvent::Broadcast { only_active_tab })
                    .await;
            }
            TraceEvent::UpdateContentScript {
                run_on_protected_pages,
            } => {
                self.background
                    .handle_event(BusEvent::UpdateContentScript {
                        run_on_protected_pages,
                    })
                    .await;
            }
        }

        settle().await;
        outputs.extend(
            self.tabs
                .take_pushes()
                .into_iter()
                .map(|push| Output::Push { line, push }),
        );
        outputs.extend(
            self.tabs
                .take_injected()
                .into_iter()
                .map(|tab_id| Output::Injected { line, tab_id }),
        );
        let mut port_ids: Vec<u64> = self.ports.keys().copied().collect();
        port_ids.sort_unstable();
        for id in port_ids {
            if let Some((_, rx)) = self.ports.get_mut(&id) {
                while let Ok(ToUi::Changes(data)) = rx.try_recv() {
                    outputs.push(Output::Changes {
                        line,
                        port: id,
                        data,
                    });
                }
            }
        }
        outputs
    }

    /// Replay every line of `input`, writing outputs to `out`. Stops at end
    /// of input or on Ctrl-C.
    pub async fn run<R, W>(&mut self, input: R, out: &mut W) -> anyhow::Result<ReplayStats>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut stats = ReplayStats::default();
        let mut lines = input.lines();
        let mut line_no = 0usize;
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line.context("failed to read trace")?,
                _ = tokio::signal::ctrl_c() => {
                    info!("replay: interrupted");
                    break;
                }
            };
            let Some(line) = line else {
                break;
            };
            line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let event: TraceEvent = match serde_json::from_str(trimmed) {
                Ok(event) => event,
                Err(e) => {
                    warn!(line = line_no, error = %e, "skipping unreadable trace line");
                    stats.skipped += 1;
                    continue;
                }
            };
            stats.events += 1;
            for output in self.apply(line_no, event).await {
                serde_json::to_writer(&mut *out, &output)?;
                out.write_all(b"\n")?;
                stats.outputs += 1;
            }
        }
        out.flush()?;
        Ok(stats)
    }
}

/// Let deferred deliveries run before collecting outputs.
async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
