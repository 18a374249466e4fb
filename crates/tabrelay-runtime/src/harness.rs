//! Offline stand-ins for the browser, the theming subsystem and the
//! settings owner, used to drive a real `Background` from a recorded trace.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use tabrelay_background::core::message::{FetchParams, ResponseType};
use tabrelay_background::core::{BrowserTab, FrameTarget, TabId, ToContent};
use tabrelay_background::ui_hub::DevFixKind;
use tabrelay_background::{
    BusError, ExtensionHost, FetchError, FileLoader, FileSaver, TabsApi, ThemeHooks,
};

// ─── Tabs ─────────────────────────────────────────────────────────

/// A push recorded for output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Push {
    pub tab_id: TabId,
    pub target: FrameTarget,
    pub message: ToContent,
}

/// Browser tabs as declared by the trace. Pushes to tabs the trace never
/// declared fail like they would for a closed tab.
#[derive(Default)]
pub struct ReplayTabs {
    tabs: Mutex<Vec<BrowserTab>>,
    pushes: Mutex<Vec<Push>>,
    injected: Mutex<Vec<TabId>>,
}

impl ReplayTabs {
    pub fn set_tabs(&self, tabs: Vec<BrowserTab>) {
        if let Ok(mut current) = self.tabs.lock() {
            *current = tabs;
        }
    }

    pub fn remove_tab(&self, tab_id: TabId) {
        if let Ok(mut current) = self.tabs.lock() {
            current.retain(|tab| tab.id != tab_id);
        }
    }

    pub fn take_pushes(&self) -> Vec<Push> {
        self.pushes
            .lock()
            .map(|mut pushes| std::mem::take(&mut *pushes))
            .unwrap_or_default()
    }

    pub fn take_injected(&self) -> Vec<TabId> {
        self.injected
            .lock()
            .map(|mut injected| std::mem::take(&mut *injected))
            .unwrap_or_default()
    }

    fn snapshot(&self) -> Result<Vec<BrowserTab>, BusError> {
        self.tabs
            .lock()
            .map(|tabs| tabs.clone())
            .map_err(|_| BusError::Transport("tab list poisoned".to_owned()))
    }
}

#[async_trait]
impl TabsApi for ReplayTabs {
    async fn query_tabs(&self) -> Result<Vec<BrowserTab>, BusError> {
        self.snapshot()
    }

    async fn active_tab(&self) -> Result<Option<BrowserTab>, BusError> {
        Ok(self.snapshot()?.into_iter().find(|tab| tab.active))
    }

    async fn send_message(
        &self,
        tab_id: TabId,
        message: ToContent,
        target: FrameTarget,
    ) -> Result<(), BusError> {
        if !self.snapshot()?.iter().any(|tab| tab.id == tab_id) {
            return Err(BusError::NoReceiver {
                tab_id,
                frame_id: target.frame_id,
            });
        }
        if let Ok(mut pushes) = self.pushes.lock() {
            pushes.push(Push {
                tab_id,
                target,
                message,
            });
        }
        Ok(())
    }

    async fn inject_content_script(&self, tab_id: TabId) -> Result<(), BusError> {
        if let Ok(mut injected) = self.injected.lock() {
            injected.push(tab_id);
        }
        Ok(())
    }
}

// ─── Theme ────────────────────────────────────────────────────────

/// Serves one fixed stylesheet to every document.
pub struct FixedTheme {
    css: String,
}

impl FixedTheme {
    pub fn new(css: impl Into<String>) -> Self {
        Self { css: css.into() }
    }

    fn instruction(&self) -> ToContent {
        ToContent::AddCssFilter {
            css: self.css.clone(),
            detect_dark_theme: true,
        }
    }
}

#[async_trait]
impl ThemeHooks for FixedTheme {
    async fn connection_message(
        &self,
        _tab_url: &str,
        _url: &str,
        _is_top_frame: bool,
    ) -> Option<ToContent> {
        Some(self.instruction())
    }

    fn tab_message(&self, _tab_url: &str, _url: &str, _is_top_frame: bool) -> ToContent {
        self.instruction()
    }

    fn on_color_scheme_change(&self, is_dark: bool) {
        info!(is_dark, "system color scheme changed");
    }
}

// ─── Loader / saver ───────────────────────────────────────────────

/// Serves `file://` URLs as text; everything else is refused.
pub struct OfflineLoader;

#[async_trait]
impl FileLoader for OfflineLoader {
    async fn get(&self, params: &FetchParams) -> Result<String, FetchError> {
        let Some(path) = params.url.strip_prefix("file://") else {
            return Err(FetchError(format!("network access disabled: {}", params.url)));
        };
        if params.response_type == ResponseType::DataUrl {
            return Err(FetchError("data URLs are not produced offline".to_owned()));
        }
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| FetchError(format!("{path}: {e}")))
    }
}

/// Writes saved files under a downloads directory.
pub struct DownloadDir {
    dir: PathBuf,
}

impl DownloadDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl FileSaver for DownloadDir {
    fn save(&self, name: &str, content: &str) -> Result<(), BusError> {
        // Only the final path component is honored.
        let file_name = std::path::Path::new(name)
            .file_name()
            .ok_or_else(|| BusError::Transport(format!("invalid file name: {name}")))?;
        std::fs::create_dir_all(&self.dir).map_err(|e| BusError::Transport(e.to_string()))?;
        let path = self.dir.join(file_name);
        std::fs::write(&path, content).map_err(|e| BusError::Transport(e.to_string()))?;
        info!(path = %path.display(), "file saved");
        Ok(())
    }
}

// ─── Extension host ───────────────────────────────────────────────

/// In-memory settings owner. Partial settings and themes are merged into
/// the current objects; developer fixtures must be valid JSON.
pub struct MemoryHost {
    data: Mutex<Value>,
    dev_fixes: Mutex<HashMap<&'static str, Value>>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self {
            data: Mutex::new(json!({
                "isEnabled": true,
                "settings": {"enabled": true, "theme": {}},
            })),
            dev_fixes: Mutex::new(HashMap::new()),
        }
    }
}

fn fix_key(kind: DevFixKind) -> &'static str {
    match kind {
        DevFixKind::DynamicTheme => "dynamicFixesText",
        DevFixKind::Inversion => "filterFixesText",
        DevFixKind::StaticThemes => "staticThemesText",
    }
}

fn merge(target: &mut Value, partial: Value) {
    match (target, partial) {
        (Value::Object(target), Value::Object(partial)) => {
            for (key, value) in partial {
                merge(target.entry(key).or_insert(Value::Null), value);
            }
        }
        (target, partial) => *target = partial,
    }
}

impl MemoryHost {
    fn update(&self, pointer: &str, partial: Value) {
        if let Ok(mut data) = self.data.lock() {
            if let Some(slot) = data.pointer_mut(pointer) {
                merge(slot, partial);
            }
        }
    }
}

#[async_trait]
impl ExtensionHost for MemoryHost {
    async fn extension_data(&self) -> Value {
        self.data.lock().map(|data| data.clone()).unwrap_or(Value::Null)
    }

    async fn devtools_data(&self) -> Value {
        let fixes = self.dev_fixes.lock().map(|f| f.clone()).unwrap_or_default();
        let mut out = serde_json::Map::new();
        for kind in [DevFixKind::DynamicTheme, DevFixKind::Inversion, DevFixKind::StaticThemes] {
            let key = fix_key(kind);
            out.insert(key.to_owned(), fixes.get(key).cloned().unwrap_or(Value::Null));
        }
        Value::Object(out)
    }

    async fn change_settings(&self, settings: Value) {
        self.update("/settings", settings);
    }

    async fn set_theme(&self, theme: Value) {
        self.update("/settings/theme", theme);
    }

    async fn toggle_active_tab(&self) {
        debug!("active tab toggled");
    }

    async fn apply_dev_fixes(&self, kind: DevFixKind, text: String) -> Result<(), String> {
        let parsed: Value = serde_json::from_str(&text).map_err(|e| e.to_string())?;
        if let Ok(mut fixes) = self.dev_fixes.lock() {
            fixes.insert(fix_key(kind), parsed);
        }
        Ok(())
    }

    async fn reset_dev_fixes(&self, kind: DevFixKind) {
        if let Ok(mut fixes) = self.dev_fixes.lock() {
            fixes.remove(fix_key(kind));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_deep() {
        let mut target = json!({"a": {"b": 1, "c": 2}, "d": 3});
        merge(&mut target, json!({"a": {"b": 9}, "e": 4}));
        assert_eq!(target, json!({"a": {"b": 9, "c": 2}, "d": 3, "e": 4}));
    }

    #[tokio::test]
    async fn host_merges_settings_and_theme() {
        let host = MemoryHost::default();
        host.change_settings(json!({"enabled": false})).await;
        host.set_theme(json!({"brightness": 110})).await;
        let data = host.extension_data().await;
        assert_eq!(data["settings"]["enabled"], json!(false));
        assert_eq!(data["settings"]["theme"]["brightness"], json!(110));
    }

    #[tokio::test]
    async fn host_rejects_malformed_fixes() {
        let host = MemoryHost::default();
        assert!(host.apply_dev_fixes(DevFixKind::Inversion, "{".into()).await.is_err());
        host.apply_dev_fixes(DevFixKind::Inversion, "[1]".into())
            .await
            .expect("apply");
        assert_eq!(host.devtools_data().await["filterFixesText"], json!([1]));
        host.reset_dev_fixes(DevFixKind::Inversion).await;
        assert_eq!(host.devtools_data().await["filterFixesText"], Value::Null);
    }

    #[tokio::test]
    async fn offline_loader_reads_files_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.css");
        std::fs::write(&path, "body{}").expect("write");
        let params = |url: String| FetchParams {
            url,
            response_type: ResponseType::Text,
            mime_type: None,
            origin: None,
        };
        let loaded = OfflineLoader
            .get(&params(format!("file://{}", path.display())))
            .await
            .expect("load");
        assert_eq!(loaded, "body{}");
        assert!(OfflineLoader.get(&params("https://a.com".into())).await.is_err());
    }

    #[test]
    fn download_dir_keeps_only_file_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let saver = DownloadDir::new(dir.path().join("downloads"));
        saver.save("../../escape.css", "x").expect("save");
        assert!(dir.path().join("downloads/escape.css").exists());
    }
}
