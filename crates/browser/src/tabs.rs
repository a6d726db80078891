//! Lifecycle and state of agent-owned tabs.
//!
//! The browser identifies targets by opaque string ids; the registry mints
//! the small integer tab ids the rest of the system (and the LLM-facing
//! `__NEW_TAB__` sentinel) speaks, and owns the per-tab state records.

use edith_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::channel::DebuggerChannel;

pub type TabId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabStatus {
    Pending,
    Running,
    Extracting,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabState {
    pub attached: bool,
    pub url: String,
    pub title: String,
    pub task_description: String,
    pub status: TabStatus,
    pub extracted_data: String,
    pub error: Option<String>,
}

/// Partial state update; unset fields keep their current value.
#[derive(Debug, Default, Clone)]
pub struct TabUpdate {
    pub url: Option<String>,
    pub title: Option<String>,
    pub status: Option<TabStatus>,
    pub extracted_data: Option<String>,
    pub error: Option<String>,
}

struct TabEntry {
    target_id: String,
    state: TabState,
}

pub struct TabRegistry {
    channel: Arc<DebuggerChannel>,
    next_id: AtomicU32,
    tabs: Mutex<HashMap<TabId, TabEntry>>,
}

impl TabRegistry {
    pub fn new(channel: Arc<DebuggerChannel>) -> Self {
        Self {
            channel,
            next_id: AtomicU32::new(1),
            tabs: Mutex::new(HashMap::new()),
        }
    }

    pub fn channel(&self) -> &Arc<DebuggerChannel> {
        &self.channel
    }

    /// Open a new tab at `url` and attach the debugger to it.
    pub async fn create_tab(&self, url: &str, task_description: &str) -> Result<TabId> {
        let url = normalize_url(url);
        let result = self
            .channel
            .cdp()
            .send_command("Target.createTarget", json!({"url": url}), None)
            .await?;
        let target_id = result
            .get("targetId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Protocol("createTarget returned no targetId".to_string()))?
            .to_string();

        let tab = self.register(target_id, &url, task_description).await?;
        info!(tab, url = %url, "Created tab");
        Ok(tab)
    }

    /// Take ownership of a target that appeared outside `create_tab`
    /// (a click opened a new window).
    pub async fn adopt_target(&self, target_id: &str, task_description: &str) -> Result<TabId> {
        let tab = self.register(target_id.to_string(), "", task_description).await?;
        info!(tab, target = %target_id, "Adopted new tab");
        Ok(tab)
    }

    async fn register(
        &self,
        target_id: String,
        url: &str,
        task_description: &str,
    ) -> Result<TabId> {
        let tab = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.channel.attach(tab, &target_id).await?;
        let entry = TabEntry {
            target_id,
            state: TabState {
                attached: true,
                url: url.to_string(),
                title: String::new(),
                task_description: task_description.to_string(),
                status: TabStatus::Pending,
                extracted_data: String::new(),
                error: None,
            },
        };
        self.tabs.lock().await.insert(tab, entry);
        Ok(tab)
    }

    pub async fn attach(&self, tab: TabId) -> Result<()> {
        let target_id = {
            let tabs = self.tabs.lock().await;
            tabs.get(&tab)
                .map(|e| e.target_id.clone())
                .ok_or_else(|| Error::Tab(format!("Unknown tab {}", tab)))?
        };
        self.channel.attach(tab, &target_id).await?;
        let mut tabs = self.tabs.lock().await;
        if let Some(entry) = tabs.get_mut(&tab) {
            entry.state.attached = true;
        }
        Ok(())
    }

    /// Idempotent: detaching a tab that is gone or never attached is fine.
    pub async fn detach(&self, tab: TabId) {
        self.channel.detach(tab).await;
        let mut tabs = self.tabs.lock().await;
        if let Some(entry) = tabs.get_mut(&tab) {
            entry.state.attached = false;
        }
    }

    pub async fn detach_all(&self) {
        self.channel.detach_all().await;
        let mut tabs = self.tabs.lock().await;
        for entry in tabs.values_mut() {
            entry.state.attached = false;
        }
    }

    /// Idempotent: closing a tab the browser already removed succeeds.
    pub async fn close_tab(&self, tab: TabId) {
        self.channel.detach(tab).await;
        let target_id = {
            let mut tabs = self.tabs.lock().await;
            tabs.remove(&tab).map(|e| e.target_id)
        };
        if let Some(target_id) = target_id {
            if let Err(e) = self
                .channel
                .cdp()
                .send_command("Target.closeTarget", json!({"targetId": target_id}), None)
                .await
            {
                debug!(tab, error = %e, "closeTarget failed (tab may already be gone)");
            }
        }
    }

    pub async fn close_all(&self) {
        let tabs: Vec<TabId> = self.tabs.lock().await.keys().copied().collect();
        for tab in tabs {
            self.close_tab(tab).await;
        }
    }

    pub async fn update_state(&self, tab: TabId, update: TabUpdate) {
        let mut tabs = self.tabs.lock().await;
        if let Some(entry) = tabs.get_mut(&tab) {
            apply_update(&mut entry.state, update);
        }
    }

    pub async fn get_state(&self, tab: TabId) -> Option<TabState> {
        self.tabs.lock().await.get(&tab).map(|e| e.state.clone())
    }

    pub async fn all_states(&self) -> Vec<(TabId, TabState)> {
        self.tabs
            .lock()
            .await
            .iter()
            .map(|(id, e)| (*id, e.state.clone()))
            .collect()
    }

    pub async fn target_id(&self, tab: TabId) -> Option<String> {
        self.tabs.lock().await.get(&tab).map(|e| e.target_id.clone())
    }

    /// Target ids of the registry's known tabs, for new-window diffing.
    pub async fn known_target_ids(&self) -> Vec<String> {
        self.tabs
            .lock()
            .await
            .values()
            .map(|e| e.target_id.clone())
            .collect()
    }

    /// Every page target the browser currently has, owned by us or not.
    pub async fn list_page_target_ids(&self) -> Result<Vec<String>> {
        let result = self
            .channel
            .cdp()
            .send_command("Target.getTargets", json!({}), None)
            .await?;
        let ids = result
            .get("targetInfos")
            .and_then(|v| v.as_array())
            .map(|infos| {
                infos
                    .iter()
                    .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
                    .filter_map(|t| t.get("targetId").and_then(|v| v.as_str()))
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }
}

fn apply_update(state: &mut TabState, update: TabUpdate) {
    if let Some(url) = update.url {
        state.url = url;
    }
    if let Some(title) = update.title {
        state.title = title;
    }
    if let Some(status) = update.status {
        state.status = status;
    }
    if let Some(data) = update.extracted_data {
        state.extracted_data = data;
    }
    if let Some(error) = update.error {
        state.error = Some(error);
    }
}

/// Bare hostnames become https URLs; anything already carrying a scheme
/// passes through.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return "about:blank".to_string();
    }
    if trimmed.contains("://") || trimmed.starts_with("about:") {
        return trimmed.to_string();
    }
    format!("https://{}", trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("youtube.com"), "https://youtube.com");
        assert_eq!(normalize_url("  amazon.in/deals "), "https://amazon.in/deals");
        assert_eq!(normalize_url("https://example.com"), "https://example.com");
        assert_eq!(normalize_url("http://example.com"), "http://example.com");
        assert_eq!(normalize_url("about:blank"), "about:blank");
        assert_eq!(normalize_url(""), "about:blank");
    }

    #[test]
    fn test_apply_update_is_partial() {
        let mut state = TabState {
            attached: true,
            url: "https://a.com".to_string(),
            title: "A".to_string(),
            task_description: "t".to_string(),
            status: TabStatus::Running,
            extracted_data: String::new(),
            error: None,
        };
        apply_update(
            &mut state,
            TabUpdate {
                status: Some(TabStatus::Done),
                extracted_data: Some("data".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(state.status, TabStatus::Done);
        assert_eq!(state.extracted_data, "data");
        // untouched fields keep their values
        assert_eq!(state.url, "https://a.com");
        assert_eq!(state.title, "A");
        assert!(state.error.is_none());
    }
}
