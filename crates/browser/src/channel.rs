//! Debugger attachment bookkeeping.
//!
//! Maps agent tab ids to CDP sessions on the shared browser connection.
//! Attach is idempotent per tab; sending on an unattached tab fails with
//! `NotAttached`; externally detached sessions (user opened devtools, tab
//! crashed) are pruned by a watcher task.

use edith_core::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cdp::CdpClient;
use crate::tabs::TabId;

pub struct DebuggerChannel {
    cdp: Arc<CdpClient>,
    /// tab id -> CDP session id for every currently attached tab.
    attached: Mutex<HashMap<TabId, String>>,
}

impl DebuggerChannel {
    pub fn new(cdp: Arc<CdpClient>) -> Arc<Self> {
        let channel = Arc::new(Self {
            cdp,
            attached: Mutex::new(HashMap::new()),
        });
        channel.clone().spawn_detach_watcher();
        channel
    }

    pub fn cdp(&self) -> &Arc<CdpClient> {
        &self.cdp
    }

    /// Attach the debugger to a target. Idempotent: a second attach on an
    /// already attached tab is a no-op.
    pub async fn attach(&self, tab: TabId, target_id: &str) -> Result<()> {
        {
            let attached = self.attached.lock().await;
            if attached.contains_key(&tab) {
                return Ok(());
            }
        }

        let result = self
            .cdp
            .send_command(
                "Target.attachToTarget",
                json!({"targetId": target_id, "flatten": true}),
                None,
            )
            .await?;
        let session_id = result
            .get("sessionId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Protocol("attachToTarget returned no sessionId".to_string()))?
            .to_string();

        for domain in ["Page", "Runtime", "Network"] {
            self.cdp
                .send_command(&format!("{}.enable", domain), json!({}), Some(&session_id))
                .await?;
        }

        info!(tab, session = %session_id, "Debugger attached");
        self.attached.lock().await.insert(tab, session_id);
        Ok(())
    }

    /// Detach from a tab. Idempotent: detaching an unattached (or already
    /// gone) tab succeeds silently.
    pub async fn detach(&self, tab: TabId) {
        let session = self.attached.lock().await.remove(&tab);
        if let Some(session_id) = session {
            if let Err(e) = self
                .cdp
                .send_command(
                    "Target.detachFromTarget",
                    json!({"sessionId": session_id}),
                    None,
                )
                .await
            {
                debug!(tab, error = %e, "Detach failed (target may be gone)");
            }
            info!(tab, "Debugger detached");
        }
    }

    pub async fn detach_all(&self) {
        let tabs: Vec<TabId> = self.attached.lock().await.keys().copied().collect();
        for tab in tabs {
            self.detach(tab).await;
        }
    }

    /// Send a session-scoped command to an attached tab.
    pub async fn send(&self, tab: TabId, method: &str, params: Value) -> Result<Value> {
        let session_id = {
            let attached = self.attached.lock().await;
            attached.get(&tab).cloned()
        };
        let session_id = session_id.ok_or_else(|| {
            Error::Protocol(format!("NotAttached: no debugger session for tab {}", tab))
        })?;
        self.cdp.send_command(method, params, Some(&session_id)).await
    }

    pub async fn is_attached(&self, tab: TabId) -> bool {
        self.attached.lock().await.contains_key(&tab)
    }

    pub async fn attached_tabs(&self) -> Vec<TabId> {
        self.attached.lock().await.keys().copied().collect()
    }

    pub async fn session_id(&self, tab: TabId) -> Option<String> {
        self.attached.lock().await.get(&tab).cloned()
    }

    /// Reflect detachments initiated outside this process (devtools opened,
    /// tab crashed or closed) by pruning the attached set.
    fn spawn_detach_watcher(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut events = self.cdp.subscribe_event("Target.detachedFromTarget").await;
            while let Some(event) = events.recv().await {
                let session = event
                    .params
                    .get("sessionId")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                if let Some(session_id) = session {
                    let mut attached = self.attached.lock().await;
                    let before = attached.len();
                    attached.retain(|_, s| *s != session_id);
                    if attached.len() != before {
                        warn!(session = %session_id, "Debugger session detached externally");
                    }
                }
            }
        });
    }
}
