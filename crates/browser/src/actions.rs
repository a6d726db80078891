//! Semantic action primitives.
//!
//! Every primitive resolves to a `String`: either a confirmation or an
//! error-shaped message the LLM can read and recover from. Nothing here
//! returns `Err` to the caller — a tab closing mid-action or a rejected
//! debugger command becomes text, and the run continues.

use base64::Engine;
use edith_core::{Error, Result};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::channel::DebuggerChannel;
use crate::snapshot::{evaluate, take_snapshot, PageSnapshot, SnapshotElement};
use crate::tabs::{normalize_url, TabId, TabRegistry, TabUpdate};
use crate::wait;

/// Virtual key codes for the keys the agent is allowed to press. Anything
/// else falls back to the character code of its first character.
fn virtual_key_code(key: &str) -> i64 {
    match key {
        "Enter" => 13,
        "Tab" => 9,
        "Escape" => 27,
        "ArrowDown" => 40,
        "ArrowUp" => 38,
        "Backspace" => 8,
        other => other.chars().next().map(|c| c as i64).unwrap_or(0),
    }
}

fn uid_not_found(uid: i64) -> String {
    format!(
        "Error: Element with UID {} not found in snapshot. Take a new snapshot first.",
        uid
    )
}

/// Facade over the debugger channel and tab registry that executes actions
/// on live pages.
pub struct BrowserController {
    channel: Arc<DebuggerChannel>,
    registry: Arc<TabRegistry>,
    media_dir: PathBuf,
}

impl BrowserController {
    pub fn new(channel: Arc<DebuggerChannel>, registry: Arc<TabRegistry>, media_dir: PathBuf) -> Self {
        Self {
            channel,
            registry,
            media_dir,
        }
    }

    pub fn registry(&self) -> &Arc<TabRegistry> {
        &self.registry
    }

    pub fn channel(&self) -> &Arc<DebuggerChannel> {
        &self.channel
    }

    pub async fn snapshot(&self, tab: TabId) -> PageSnapshot {
        let snapshot = take_snapshot(&self.channel, tab).await;
        self.registry
            .update_state(
                tab,
                TabUpdate {
                    url: Some(snapshot.url.clone()),
                    title: Some(snapshot.title.clone()),
                    ..Default::default()
                },
            )
            .await;
        snapshot
    }

    /// Open a new tab, wait for its first load, and return it.
    pub async fn open_tab(&self, url: &str, task_description: &str) -> Result<(TabId, String)> {
        let tab = self.registry.create_tab(url, task_description).await?;
        wait::wait_for_load(
            &self.channel,
            tab,
            Duration::from_secs(15),
            Duration::from_millis(800),
        )
        .await;
        let confirmation = format!("Opened {} in tab {}", normalize_url(url), tab);
        Ok((tab, confirmation))
    }

    // ── click ─────────────────────────────────────────────────────────

    pub async fn click(&self, tab: TabId, uid: i64, snapshot: &PageSnapshot) -> String {
        let element = match snapshot.find(uid) {
            Some(e) => e.clone(),
            None => return uid_not_found(uid),
        };
        match self.try_click(tab, uid, &element).await {
            Ok(msg) => msg,
            Err(e) => format!("Error: click on element {} failed: {}", uid, e),
        }
    }

    async fn try_click(&self, tab: TabId, uid: i64, element: &SnapshotElement) -> Result<String> {
        let targets_before = self.registry.list_page_target_ids().await.unwrap_or_default();

        self.scroll_into_view(tab, uid).await?;

        // Ladder: in-page click, then a trusted mouse event at the node's
        // center, then synthetic mouse events, then direct navigation for
        // plain links.
        let mut clicked = self.click_in_page(tab, uid).await.unwrap_or(false);

        if !clicked {
            clicked = self.click_at_center(tab, uid).await.unwrap_or(false);
        }

        if !clicked {
            clicked = self.click_synthetic(tab, uid).await.unwrap_or(false);
        }

        if !clicked {
            if let Some(href) = element.href.as_deref().filter(|h| h.starts_with("http")) {
                self.channel
                    .send(tab, "Page.navigate", json!({"url": href}))
                    .await?;
                wait::wait_for_load(
                    &self.channel,
                    tab,
                    Duration::from_secs(15),
                    Duration::from_millis(800),
                )
                .await;
                return Ok(format!(
                    "Element {} could not be clicked directly; navigated to its link {} instead",
                    uid, href
                ));
            }
            return Err(Error::Protocol(
                "all click strategies failed and the element has no usable href".to_string(),
            ));
        }

        sleep(Duration::from_millis(500)).await;

        // A click may open a new window. Follow it: attach, adopt, and tell
        // the loop to retarget via the sentinel. Multiple new tabs: last wins.
        let targets_after = self.registry.list_page_target_ids().await.unwrap_or_default();
        let new_target = targets_after
            .iter()
            .filter(|t| !targets_before.contains(*t))
            .last()
            .cloned();

        if let Some(target_id) = new_target {
            match self
                .registry
                .adopt_target(&target_id, "opened from click")
                .await
            {
                Ok(new_tab) => {
                    info!(tab, new_tab, "Click opened a new tab");
                    return Ok(format!(
                        "Clicked element {} (\"{}\"). A new tab opened and is now active. __NEW_TAB__:{}",
                        uid, element.name, new_tab
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "Failed to adopt new tab after click");
                }
            }
        }

        Ok(format!("Clicked element {} (\"{}\")", uid, element.name))
    }

    async fn scroll_into_view(&self, tab: TabId, uid: i64) -> Result<bool> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector('[data-edith-uid="{}"]');
                if (!el) return false;
                el.scrollIntoView({{block: 'center', behavior: 'instant'}});
                return true;
            }})()"#,
            uid
        );
        Ok(evaluate(&self.channel, tab, &script)
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    /// Strategy (a): the node's own click() with target="_blank" suppressed
    /// so plain links stay in this tab.
    async fn click_in_page(&self, tab: TabId, uid: i64) -> Result<bool> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector('[data-edith-uid="{}"]');
                if (!el) return false;
                const hadBlank = el.getAttribute('target') === '_blank';
                if (hadBlank) el.removeAttribute('target');
                try {{
                    el.click();
                }} finally {{
                    if (hadBlank) el.setAttribute('target', '_blank');
                }}
                return true;
            }})()"#,
            uid
        );
        Ok(evaluate(&self.channel, tab, &script)
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    /// Strategy (b): trusted mouse press/release at the node's center,
    /// with coordinates re-read after the scroll.
    async fn click_at_center(&self, tab: TabId, uid: i64) -> Result<bool> {
        let (x, y) = match self.element_center(tab, uid).await? {
            Some(center) => center,
            None => return Ok(false),
        };
        for event_type in ["mousePressed", "mouseReleased"] {
            self.channel
                .send(
                    tab,
                    "Input.dispatchMouseEvent",
                    json!({
                        "type": event_type,
                        "x": x,
                        "y": y,
                        "button": "left",
                        "clickCount": 1,
                    }),
                )
                .await?;
        }
        Ok(true)
    }

    /// Strategy (c): synthetic mousedown/mouseup/click for handlers that
    /// ignore the input pipeline.
    async fn click_synthetic(&self, tab: TabId, uid: i64) -> Result<bool> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector('[data-edith-uid="{}"]');
                if (!el) return false;
                for (const type of ['mousedown', 'mouseup', 'click']) {{
                    el.dispatchEvent(new MouseEvent(type, {{bubbles: true, cancelable: true, view: window}}));
                }}
                return true;
            }})()"#,
            uid
        );
        Ok(evaluate(&self.channel, tab, &script)
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    async fn element_center(&self, tab: TabId, uid: i64) -> Result<Option<(f64, f64)>> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector('[data-edith-uid="{}"]');
                if (!el) return null;
                const r = el.getBoundingClientRect();
                return {{x: r.left + r.width / 2, y: r.top + r.height / 2}};
            }})()"#,
            uid
        );
        let value = evaluate(&self.channel, tab, &script).await?;
        if value.is_null() {
            return Ok(None);
        }
        let x = value.get("x").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let y = value.get("y").and_then(|v| v.as_f64()).unwrap_or(0.0);
        Ok(Some((x, y)))
    }

    // ── type_text ─────────────────────────────────────────────────────

    pub async fn type_text(
        &self,
        tab: TabId,
        uid: i64,
        text: &str,
        snapshot: &PageSnapshot,
    ) -> String {
        let element = match snapshot.find(uid) {
            Some(e) => e.clone(),
            None => return uid_not_found(uid),
        };
        match self.try_type_text(tab, uid, text).await {
            Ok(()) => format!("Typed \"{}\" into element {} (\"{}\")", text, uid, element.name),
            Err(e) => format!("Error: typing into element {} failed: {}", uid, e),
        }
    }

    async fn try_type_text(&self, tab: TabId, uid: i64, text: &str) -> Result<()> {
        self.scroll_into_view(tab, uid).await?;

        // Focus with a real click so the page's own focus handlers run.
        if let Some((x, y)) = self.element_center(tab, uid).await? {
            for event_type in ["mousePressed", "mouseReleased"] {
                self.channel
                    .send(
                        tab,
                        "Input.dispatchMouseEvent",
                        json!({
                            "type": event_type,
                            "x": x,
                            "y": y,
                            "button": "left",
                            "clickCount": 1,
                        }),
                    )
                    .await?;
            }
        }

        // Clear. Inputs are zeroed through .value; contenteditable roots go
        // through the Selection API — wiping textContent would destroy the
        // substructure rich editors depend on.
        let clear_script = format!(
            r#"(() => {{
                const el = document.querySelector('[data-edith-uid="{}"]');
                if (!el) return false;
                el.focus();
                if (el.tagName === 'INPUT' || el.tagName === 'TEXTAREA') {{
                    el.value = '';
                    el.dispatchEvent(new Event('input', {{bubbles: true}}));
                }} else if (el.isContentEditable) {{
                    const selection = window.getSelection();
                    const range = document.createRange();
                    range.selectNodeContents(el);
                    selection.removeAllRanges();
                    selection.addRange(range);
                    document.execCommand('delete');
                }}
                return true;
            }})()"#,
            uid
        );
        evaluate(&self.channel, tab, &clear_script).await?;

        // insertText routes correctly through both plain inputs and
        // contenteditable roots; per-character key events do not.
        self.channel
            .send(tab, "Input.insertText", json!({"text": text}))
            .await?;

        // Re-fire the events framework autocomplete listens for.
        let text_json = serde_json::to_string(text)?;
        let notify_script = format!(
            r#"(() => {{
                const el = document.querySelector('[data-edith-uid="{}"]');
                if (!el) return false;
                el.dispatchEvent(new InputEvent('input', {{bubbles: true, data: {}, inputType: 'insertText'}}));
                el.dispatchEvent(new Event('change', {{bubbles: true}}));
                el.dispatchEvent(new KeyboardEvent('keydown', {{bubbles: true}}));
                el.dispatchEvent(new KeyboardEvent('keyup', {{bubbles: true}}));
                return true;
            }})()"#,
            uid, text_json
        );
        evaluate(&self.channel, tab, &notify_script).await?;
        Ok(())
    }

    // ── press_key ─────────────────────────────────────────────────────

    pub async fn press_key(&self, tab: TabId, key: &str) -> String {
        match self.try_press_key(tab, key).await {
            Ok(msg) => msg,
            Err(e) => format!("Error: pressing {} failed: {}", key, e),
        }
    }

    async fn try_press_key(&self, tab: TabId, key: &str) -> Result<String> {
        let url_before = evaluate(&self.channel, tab, "location.href")
            .await
            .ok()
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_default();

        let code = virtual_key_code(key);
        let text = if key == "Enter" { "\r" } else { "" };
        for event_type in ["keyDown", "keyUp"] {
            let mut params = json!({
                "type": event_type,
                "key": key,
                "windowsVirtualKeyCode": code,
                "nativeVirtualKeyCode": code,
            });
            if event_type == "keyDown" && !text.is_empty() {
                params["text"] = json!(text);
            }
            self.channel
                .send(tab, "Input.dispatchKeyEvent", params)
                .await?;
        }

        if key == "Enter" {
            if wait::wait_for_navigation(&self.channel, tab, &url_before).await {
                return Ok("Pressed Enter — page navigated".to_string());
            }
        }
        Ok(format!("Pressed key: {}", key))
    }

    // ── scroll ────────────────────────────────────────────────────────

    pub async fn scroll(&self, tab: TabId, direction: &str, amount: i64) -> String {
        let amount = if amount <= 0 { 600 } else { amount };
        let delta_y = match direction {
            "up" => -amount,
            _ => amount,
        };

        // A wheel event fires the lazy-loading observers that programmatic
        // scrollBy never triggers; scrollBy is only the fallback.
        let wheel = self
            .channel
            .send(
                tab,
                "Input.dispatchMouseEvent",
                json!({
                    "type": "mouseWheel",
                    "x": 400,
                    "y": 300,
                    "deltaX": 0,
                    "deltaY": delta_y,
                }),
            )
            .await;

        if wheel.is_err() {
            let script = format!("window.scrollBy(0, {}); true", delta_y);
            if let Err(e) = evaluate(&self.channel, tab, &script).await {
                return format!("Error: scroll failed: {}", e);
            }
        }
        format!("Scrolled {} by {}px", direction, amount)
    }

    // ── select_option ─────────────────────────────────────────────────

    pub async fn select_option(
        &self,
        tab: TabId,
        uid: i64,
        value: &str,
        snapshot: &PageSnapshot,
    ) -> String {
        let element = match snapshot.find(uid) {
            Some(e) => e.clone(),
            None => return uid_not_found(uid),
        };
        if !element.is_select {
            return format!(
                "Error: Element {} (\"{}\") is a <{}>, not a dropdown. Use click for it.",
                uid, element.name, element.tag
            );
        }
        match self.try_select_option(tab, uid, value).await {
            Ok(msg) => msg,
            Err(e) => format!("Error: selecting in element {} failed: {}", uid, e),
        }
    }

    async fn try_select_option(&self, tab: TabId, uid: i64, value: &str) -> Result<String> {
        let value_json = serde_json::to_string(value)?;
        // Match by value, then exact visible text, then substring; report the
        // available options when nothing matches.
        let script = format!(
            r#"(() => {{
                const el = document.querySelector('[data-edith-uid="{}"]');
                if (!el || el.tagName !== 'SELECT') return {{ok: false, reason: 'not a select element'}};
                const wanted = {};
                const lower = wanted.toLowerCase();
                const opts = Array.from(el.options);
                let index = opts.findIndex(o => o.value === wanted);
                if (index < 0) index = opts.findIndex(o => o.text.trim().toLowerCase() === lower);
                if (index < 0) index = opts.findIndex(o => o.text.toLowerCase().includes(lower));
                if (index < 0) {{
                    return {{ok: false, reason: 'no match', options: opts.slice(0, 30).map(o => o.text.trim())}};
                }}
                el.selectedIndex = index;
                el.dispatchEvent(new Event('input', {{bubbles: true}}));
                el.dispatchEvent(new Event('change', {{bubbles: true}}));
                return {{ok: true, matched: opts[index].text.trim()}};
            }})()"#,
            uid, value_json
        );
        let result = evaluate(&self.channel, tab, &script).await?;

        if result.get("ok").and_then(|v| v.as_bool()) == Some(true) {
            let matched = result
                .get("matched")
                .and_then(|v| v.as_str())
                .unwrap_or(value);
            return Ok(format!("Selected \"{}\" in element {}", matched, uid));
        }

        if let Some(options) = result.get("options").and_then(|v| v.as_array()) {
            let listing: Vec<&str> = options.iter().filter_map(|o| o.as_str()).collect();
            return Ok(format!(
                "No option matching \"{}\". Available options: {}",
                value,
                listing.join(", ")
            ));
        }

        let reason = result
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        Ok(format!("Error: select failed: {}", reason))
    }

    // ── hover ─────────────────────────────────────────────────────────

    pub async fn hover(&self, tab: TabId, uid: i64, snapshot: &PageSnapshot) -> String {
        let element = match snapshot.find(uid) {
            Some(e) => e.clone(),
            None => return uid_not_found(uid),
        };
        match self.try_hover(tab, uid).await {
            Ok(()) => format!("Hovering over element {} (\"{}\")", uid, element.name),
            Err(e) => format!("Error: hover on element {} failed: {}", uid, e),
        }
    }

    async fn try_hover(&self, tab: TabId, uid: i64) -> Result<()> {
        self.scroll_into_view(tab, uid).await?;
        if let Some((x, y)) = self.element_center(tab, uid).await? {
            // mouseMoved drives CSS :hover; the synthetic events reach
            // framework listeners that key off mouseenter/mouseover.
            self.channel
                .send(
                    tab,
                    "Input.dispatchMouseEvent",
                    json!({"type": "mouseMoved", "x": x, "y": y}),
                )
                .await?;
        }
        let script = format!(
            r#"(() => {{
                const el = document.querySelector('[data-edith-uid="{}"]');
                if (!el) return false;
                el.dispatchEvent(new MouseEvent('mouseenter', {{bubbles: true}}));
                el.dispatchEvent(new MouseEvent('mouseover', {{bubbles: true}}));
                return true;
            }})()"#,
            uid
        );
        evaluate(&self.channel, tab, &script).await?;
        sleep(Duration::from_millis(500)).await;
        Ok(())
    }

    // ── set_value ─────────────────────────────────────────────────────

    pub async fn set_value(
        &self,
        tab: TabId,
        uid: i64,
        value: &str,
        snapshot: &PageSnapshot,
    ) -> String {
        let element = match snapshot.find(uid) {
            Some(e) => e.clone(),
            None => return uid_not_found(uid),
        };
        match self.try_set_value(tab, uid, value).await {
            Ok(()) => format!("Set element {} (\"{}\") to \"{}\"", uid, element.name, value),
            Err(e) => format!("Error: set_value on element {} failed: {}", uid, e),
        }
    }

    async fn try_set_value(&self, tab: TabId, uid: i64, value: &str) -> Result<()> {
        let value_json = serde_json::to_string(value)?;
        // The native value setter bypasses framework wrappers that swallow
        // plain .value assignments (controlled React inputs and the like).
        let script = format!(
            r#"(() => {{
                const el = document.querySelector('[data-edith-uid="{}"]');
                if (!el) return false;
                const wanted = {};
                const proto = el.tagName === 'TEXTAREA'
                    ? HTMLTextAreaElement.prototype
                    : HTMLInputElement.prototype;
                const descriptor = Object.getOwnPropertyDescriptor(proto, 'value');
                if (descriptor && descriptor.set) {{
                    descriptor.set.call(el, wanted);
                }} else {{
                    el.value = wanted;
                }}
                el.dispatchEvent(new Event('input', {{bubbles: true}}));
                el.dispatchEvent(new Event('change', {{bubbles: true}}));
                el.dispatchEvent(new InputEvent('input', {{bubbles: true, data: wanted, inputType: 'insertText'}}));
                return true;
            }})()"#,
            uid, value_json
        );
        let ok = evaluate(&self.channel, tab, &script)
            .await?
            .as_bool()
            .unwrap_or(false);
        if !ok {
            return Err(Error::Protocol("element no longer on the page".to_string()));
        }
        Ok(())
    }

    // ── waits & navigation ────────────────────────────────────────────

    pub async fn wait_for_page_update(&self, tab: TabId, timeout_ms: u64) -> String {
        wait::wait_for_network_idle(&self.channel, tab, timeout_ms).await
    }

    pub async fn navigate(&self, tab: TabId, url: &str) -> String {
        let url = normalize_url(url);
        match self
            .channel
            .send(tab, "Page.navigate", json!({"url": url}))
            .await
        {
            Ok(_) => {
                wait::wait_for_load(
                    &self.channel,
                    tab,
                    Duration::from_secs(15),
                    Duration::from_millis(800),
                )
                .await;
                self.registry
                    .update_state(
                        tab,
                        TabUpdate {
                            url: Some(url.clone()),
                            ..Default::default()
                        },
                    )
                    .await;
                format!("Navigated to {}", url)
            }
            Err(e) => format!("Error: navigation to {} failed: {}", url, e),
        }
    }

    pub async fn go_back(&self, tab: TabId) -> String {
        match evaluate(&self.channel, tab, "history.back(); true").await {
            Ok(_) => {
                wait::wait_for_load(
                    &self.channel,
                    tab,
                    Duration::from_secs(8),
                    Duration::from_millis(500),
                )
                .await;
                let url = evaluate(&self.channel, tab, "location.href")
                    .await
                    .ok()
                    .and_then(|v| v.as_str().map(|s| s.to_string()))
                    .unwrap_or_default();
                format!("Went back to {}", url)
            }
            Err(e) => format!("Error: going back failed: {}", e),
        }
    }

    pub async fn screenshot(&self, tab: TabId) -> String {
        match self.try_screenshot(tab).await {
            Ok(path) => format!("Screenshot saved to {}", path),
            Err(e) => format!("Error: screenshot failed: {}", e),
        }
    }

    async fn try_screenshot(&self, tab: TabId) -> Result<String> {
        let result = self
            .channel
            .send(tab, "Page.captureScreenshot", json!({"format": "png"}))
            .await?;
        let data = result
            .get("data")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Protocol("no screenshot data returned".to_string()))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::Other(format!("invalid screenshot payload: {}", e)))?;

        std::fs::create_dir_all(&self.media_dir)?;
        let filename = format!("{}.png", chrono::Utc::now().format("%Y%m%d-%H%M%S%.3f"));
        let path = self.media_dir.join(filename);
        std::fs::write(&path, bytes)?;
        debug!(tab, path = %path.display(), "Screenshot captured");
        Ok(path.display().to_string())
    }
}

/// A tool result that indicates the loop should retarget to a new tab.
/// Returns the tab id embedded in the sentinel, if present.
pub fn parse_new_tab_sentinel(result: &str) -> Option<TabId> {
    let marker = "__NEW_TAB__:";
    let start = result.find(marker)? + marker.len();
    let digits: String = result[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_key_codes() {
        assert_eq!(virtual_key_code("Enter"), 13);
        assert_eq!(virtual_key_code("Tab"), 9);
        assert_eq!(virtual_key_code("Escape"), 27);
        assert_eq!(virtual_key_code("ArrowDown"), 40);
        assert_eq!(virtual_key_code("ArrowUp"), 38);
        assert_eq!(virtual_key_code("Backspace"), 8);
        assert_eq!(virtual_key_code("a"), 'a' as i64);
    }

    #[test]
    fn test_uid_not_found_message() {
        let msg = uid_not_found(42);
        assert_eq!(
            msg,
            "Error: Element with UID 42 not found in snapshot. Take a new snapshot first."
        );
    }

    #[test]
    fn test_parse_new_tab_sentinel() {
        assert_eq!(
            parse_new_tab_sentinel("Clicked element 4. __NEW_TAB__:7"),
            Some(7)
        );
        assert_eq!(
            parse_new_tab_sentinel("A new tab opened and is now active. __NEW_TAB__:12 "),
            Some(12)
        );
        assert_eq!(parse_new_tab_sentinel("Clicked element 4"), None);
        assert_eq!(parse_new_tab_sentinel("__NEW_TAB__:"), None);
    }
}
