//! Wait helpers: document readiness, load events, post-keystroke navigation,
//! and network idle. All of these resolve with a diagnostic rather than
//! failing hard — the LLM reads the outcome and decides what to do next.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

use crate::channel::DebuggerChannel;
use crate::snapshot::evaluate;
use crate::tabs::TabId;

/// Poll `document.readyState` every 300ms for up to 3s. Tolerant: gives up
/// quietly so a slow page degrades instead of blocking the run.
pub async fn wait_for_doc_ready(channel: &Arc<DebuggerChannel>, tab: TabId) {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        match evaluate(channel, tab, "document.readyState").await {
            Ok(state) if state.as_str() == Some("complete") => return,
            Ok(_) => {}
            Err(e) => {
                debug!(tab, error = %e, "readyState probe failed");
                return;
            }
        }
        if Instant::now() >= deadline {
            return;
        }
        sleep(Duration::from_millis(300)).await;
    }
}

/// Wait for the page load event (with an early exit when the document is
/// already complete), then let the page settle briefly.
pub async fn wait_for_load(
    channel: &Arc<DebuggerChannel>,
    tab: TabId,
    load_timeout: Duration,
    settle: Duration,
) {
    let session = channel.session_id(tab).await;
    let mut events = channel.cdp().subscribe_event("Page.loadEventFired").await;

    let already_complete = evaluate(channel, tab, "document.readyState")
        .await
        .map(|v| v.as_str() == Some("complete"))
        .unwrap_or(false);

    if !already_complete {
        let _ = timeout(load_timeout, async {
            while let Some(event) = events.recv().await {
                if event.session_id == session {
                    return;
                }
            }
        })
        .await;
    }

    sleep(settle).await;
}

/// After a keystroke that may submit a form: watch the URL for up to 3s;
/// if it changes, wait for the new page to load (≤8s). Returns whether a
/// navigation was observed.
pub async fn wait_for_navigation(
    channel: &Arc<DebuggerChannel>,
    tab: TabId,
    url_before: &str,
) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        sleep(Duration::from_millis(300)).await;
        let current = evaluate(channel, tab, "location.href")
            .await
            .ok()
            .and_then(|v| v.as_str().map(|s| s.to_string()));
        if let Some(url) = current {
            if url != url_before {
                wait_for_load(
                    channel,
                    tab,
                    Duration::from_secs(8),
                    Duration::from_millis(300),
                )
                .await;
                return true;
            }
        }
        if Instant::now() >= deadline {
            return false;
        }
    }
}

/// Wait until no request has been in flight for `IDLE_THRESHOLD`, up to
/// `timeout_ms`. Resolves early (≤1s) when the page makes no requests at all.
pub async fn wait_for_network_idle(
    channel: &Arc<DebuggerChannel>,
    tab: TabId,
    timeout_ms: u64,
) -> String {
    const IDLE_THRESHOLD: Duration = Duration::from_millis(500);

    let session = channel.session_id(tab).await;
    let cdp = channel.cdp();
    let mut started = cdp.subscribe_event("Network.requestWillBeSent").await;
    let mut finished = cdp.subscribe_event("Network.loadingFinished").await;
    let mut failed = cdp.subscribe_event("Network.loadingFailed").await;

    // The domain is enabled at attach time; re-enabling is harmless and
    // covers tabs adopted mid-run.
    let _ = channel.send(tab, "Network.enable", json!({})).await;

    let mut in_flight: i64 = 0;
    let mut saw_activity = false;
    let mut idle_since = Instant::now();
    let started_at = Instant::now();
    let deadline = started_at + Duration::from_millis(timeout_ms);

    loop {
        let now = Instant::now();
        if now >= deadline {
            return format!(
                "Waited {}ms for network idle; {} request(s) still pending",
                timeout_ms,
                in_flight.max(0)
            );
        }
        if in_flight <= 0 && idle_since.elapsed() >= IDLE_THRESHOLD {
            if saw_activity {
                return "Network is idle".to_string();
            }
            // Nothing happened at all: exit early rather than sitting out
            // the full timeout.
            if started_at.elapsed() >= Duration::from_secs(1) {
                return "No network activity observed".to_string();
            }
        }

        let tick = sleep(Duration::from_millis(100));
        tokio::select! {
            event = started.recv() => {
                if let Some(e) = event {
                    if e.session_id == session {
                        in_flight += 1;
                        saw_activity = true;
                    }
                }
            }
            event = finished.recv() => {
                if let Some(e) = event {
                    if e.session_id == session {
                        in_flight -= 1;
                        if in_flight <= 0 { idle_since = Instant::now(); }
                    }
                }
            }
            event = failed.recv() => {
                if let Some(e) = event {
                    if e.session_id == session {
                        in_flight -= 1;
                        if in_flight <= 0 { idle_since = Instant::now(); }
                    }
                }
            }
            _ = tick => {}
        }
    }
}
