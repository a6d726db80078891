//! The seam between the agent loop and the browser.
//!
//! The loop talks to a `PageDriver` so its control flow can be exercised
//! against a fake page in tests; `CdpDriver` is the production
//! implementation delegating to the browser controller.

use async_trait::async_trait;
use edith_browser::{BrowserController, PageSnapshot, TabId, TabStatus, TabUpdate};
use edith_core::Result;
use std::sync::Arc;

#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn open_tab(&self, url: &str, task_description: &str) -> Result<(TabId, String)>;
    async fn snapshot(&self, tab: TabId) -> PageSnapshot;
    async fn click(&self, tab: TabId, uid: i64, snapshot: &PageSnapshot) -> String;
    async fn type_text(&self, tab: TabId, uid: i64, text: &str, snapshot: &PageSnapshot)
        -> String;
    async fn press_key(&self, tab: TabId, key: &str) -> String;
    async fn scroll(&self, tab: TabId, direction: &str, amount: i64) -> String;
    async fn select_option(
        &self,
        tab: TabId,
        uid: i64,
        value: &str,
        snapshot: &PageSnapshot,
    ) -> String;
    async fn hover(&self, tab: TabId, uid: i64, snapshot: &PageSnapshot) -> String;
    async fn set_value(
        &self,
        tab: TabId,
        uid: i64,
        value: &str,
        snapshot: &PageSnapshot,
    ) -> String;
    async fn wait_for_page_update(&self, tab: TabId, timeout_ms: u64) -> String;
    async fn navigate(&self, tab: TabId, url: &str) -> String;
    async fn go_back(&self, tab: TabId) -> String;
    async fn screenshot(&self, tab: TabId) -> String;
    async fn update_status(&self, tab: TabId, status: TabStatus);
    async fn set_extracted(&self, tab: TabId, data: &str);
    async fn detach(&self, tab: TabId);
    async fn detach_all(&self);
}

pub struct CdpDriver {
    controller: Arc<BrowserController>,
}

impl CdpDriver {
    pub fn new(controller: Arc<BrowserController>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl PageDriver for CdpDriver {
    async fn open_tab(&self, url: &str, task_description: &str) -> Result<(TabId, String)> {
        self.controller.open_tab(url, task_description).await
    }

    async fn snapshot(&self, tab: TabId) -> PageSnapshot {
        self.controller.snapshot(tab).await
    }

    async fn click(&self, tab: TabId, uid: i64, snapshot: &PageSnapshot) -> String {
        self.controller.click(tab, uid, snapshot).await
    }

    async fn type_text(
        &self,
        tab: TabId,
        uid: i64,
        text: &str,
        snapshot: &PageSnapshot,
    ) -> String {
        self.controller.type_text(tab, uid, text, snapshot).await
    }

    async fn press_key(&self, tab: TabId, key: &str) -> String {
        self.controller.press_key(tab, key).await
    }

    async fn scroll(&self, tab: TabId, direction: &str, amount: i64) -> String {
        self.controller.scroll(tab, direction, amount).await
    }

    async fn select_option(
        &self,
        tab: TabId,
        uid: i64,
        value: &str,
        snapshot: &PageSnapshot,
    ) -> String {
        self.controller.select_option(tab, uid, value, snapshot).await
    }

    async fn hover(&self, tab: TabId, uid: i64, snapshot: &PageSnapshot) -> String {
        self.controller.hover(tab, uid, snapshot).await
    }

    async fn set_value(
        &self,
        tab: TabId,
        uid: i64,
        value: &str,
        snapshot: &PageSnapshot,
    ) -> String {
        self.controller.set_value(tab, uid, value, snapshot).await
    }

    async fn wait_for_page_update(&self, tab: TabId, timeout_ms: u64) -> String {
        self.controller.wait_for_page_update(tab, timeout_ms).await
    }

    async fn navigate(&self, tab: TabId, url: &str) -> String {
        self.controller.navigate(tab, url).await
    }

    async fn go_back(&self, tab: TabId) -> String {
        self.controller.go_back(tab).await
    }

    async fn screenshot(&self, tab: TabId) -> String {
        self.controller.screenshot(tab).await
    }

    async fn update_status(&self, tab: TabId, status: TabStatus) {
        self.controller
            .registry()
            .update_state(
                tab,
                TabUpdate {
                    status: Some(status),
                    ..Default::default()
                },
            )
            .await;
    }

    async fn set_extracted(&self, tab: TabId, data: &str) {
        self.controller
            .registry()
            .update_state(
                tab,
                TabUpdate {
                    status: Some(TabStatus::Done),
                    extracted_data: Some(data.to_string()),
                    ..Default::default()
                },
            )
            .await;
    }

    async fn detach(&self, tab: TabId) {
        self.controller.registry().detach(tab).await;
    }

    async fn detach_all(&self) {
        self.controller.registry().detach_all().await;
    }
}
