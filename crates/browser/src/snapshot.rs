//! Snapshot types and the observation contract.

use edith_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::channel::DebuggerChannel;
use crate::script::SNAPSHOT_JS;
use crate::tabs::TabId;
use crate::wait;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SelectOption {
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub selected: bool,
}

/// One interactive DOM node as reported by the injected script.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotElement {
    pub uid: i64,
    pub tag: String,
    pub role: String,
    pub name: String,
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    pub is_clickable: bool,
    pub is_input: bool,
    pub is_video: bool,
    pub is_select: bool,
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aria_expanded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<SelectOption>>,
}

/// Immutable view of one tab at one instant. Superseded, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub elements: Vec<SnapshotElement>,
    pub raw_text: String,
}

impl PageSnapshot {
    pub fn empty(url: &str, title: &str) -> Self {
        Self {
            url: url.to_string(),
            title: title.to_string(),
            elements: Vec::new(),
            raw_text: String::new(),
        }
    }

    pub fn find(&self, uid: i64) -> Option<&SnapshotElement> {
        self.elements.iter().find(|e| e.uid == uid)
    }
}

/// Evaluate an expression in the tab and return its by-value result.
pub(crate) async fn evaluate(
    channel: &Arc<DebuggerChannel>,
    tab: TabId,
    expression: &str,
) -> Result<Value> {
    let result = channel
        .send(
            tab,
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "returnByValue": true,
                "awaitPromise": true,
            }),
        )
        .await?;

    if let Some(details) = result.get("exceptionDetails") {
        let text = details
            .get("exception")
            .and_then(|e| e.get("description"))
            .and_then(|d| d.as_str())
            .or_else(|| details.get("text").and_then(|t| t.as_str()))
            .unwrap_or("unknown exception");
        return Err(Error::Protocol(format!("Script exception: {}", text)));
    }

    Ok(result
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}

async fn run_snapshot_script(
    channel: &Arc<DebuggerChannel>,
    tab: TabId,
) -> Result<PageSnapshot> {
    let value = evaluate(channel, tab, SNAPSHOT_JS).await?;
    let payload = value
        .as_str()
        .ok_or_else(|| Error::Protocol("Snapshot script returned a non-string".to_string()))?;
    let snapshot: PageSnapshot = serde_json::from_str(payload)?;
    Ok(snapshot)
}

/// Observe a tab.
///
/// Waits for the document to settle, runs the injected script, and retries
/// once after 1.5s on any failure. A second failure resolves to an
/// empty-elements snapshot with best-effort url/title rather than an error,
/// so a bad page never aborts a multi-step run.
pub async fn take_snapshot(channel: &Arc<DebuggerChannel>, tab: TabId) -> PageSnapshot {
    wait::wait_for_doc_ready(channel, tab).await;

    match run_snapshot_script(channel, tab).await {
        Ok(snapshot) => snapshot,
        Err(first_err) => {
            debug!(tab, error = %first_err, "Snapshot failed, retrying once");
            tokio::time::sleep(Duration::from_millis(1500)).await;
            match run_snapshot_script(channel, tab).await {
                Ok(snapshot) => snapshot,
                Err(second_err) => {
                    warn!(tab, error = %second_err, "Snapshot failed twice, returning degraded snapshot");
                    let url = evaluate(channel, tab, "location.href")
                        .await
                        .ok()
                        .and_then(|v| v.as_str().map(|s| s.to_string()))
                        .unwrap_or_default();
                    let title = evaluate(channel, tab, "document.title")
                        .await
                        .ok()
                        .and_then(|v| v.as_str().map(|s| s.to_string()))
                        .unwrap_or_default();
                    PageSnapshot::empty(&url, &title)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_script_payload() {
        let payload = r#"{
            "url": "https://example.com",
            "title": "Example",
            "elements": [
                {
                    "uid": 3,
                    "tag": "input",
                    "role": "searchbox",
                    "name": "Search",
                    "context": "header",
                    "type": "search",
                    "value": "",
                    "placeholder": "Search…",
                    "x": 100, "y": 20, "width": 400, "height": 36,
                    "isClickable": true, "isInput": true,
                    "isVideo": false, "isSelect": false,
                    "disabled": false
                },
                {
                    "uid": 9,
                    "tag": "select",
                    "role": "select",
                    "name": "Sort by (selected: \"Relevance\")",
                    "context": "",
                    "x": 10, "y": 80, "width": 120, "height": 30,
                    "isClickable": true, "isInput": false,
                    "isVideo": false, "isSelect": true,
                    "disabled": false,
                    "options": [
                        {"value": "rel", "text": "Relevance", "selected": true},
                        {"value": "price", "text": "Price", "selected": false}
                    ]
                }
            ],
            "rawText": "Example Domain"
        }"#;
        let snapshot: PageSnapshot = serde_json::from_str(payload).unwrap();
        assert_eq!(snapshot.url, "https://example.com");
        assert_eq!(snapshot.elements.len(), 2);

        let input = snapshot.find(3).unwrap();
        assert_eq!(input.input_type.as_deref(), Some("search"));
        assert!(input.is_input);

        let select = snapshot.find(9).unwrap();
        assert!(select.is_select);
        assert_eq!(select.options.as_ref().unwrap().len(), 2);
        assert!(select.options.as_ref().unwrap()[0].selected);

        assert!(snapshot.find(99).is_none());
    }

    #[test]
    fn test_parse_degraded_payload() {
        let payload = r#"{"url": "", "title": "", "elements": [], "rawText": "Snapshot error: boom"}"#;
        let snapshot: PageSnapshot = serde_json::from_str(payload).unwrap();
        assert!(snapshot.elements.is_empty());
        assert!(snapshot.raw_text.starts_with("Snapshot error:"));
    }

    #[test]
    fn test_uid_uniqueness_holds_in_parsed_snapshot() {
        let payload = r#"{
            "url": "https://example.com", "title": "t",
            "elements": [
                {"uid": 1, "tag": "a", "role": "link", "name": "Home", "context": "",
                 "x": 0, "y": 0, "width": 10, "height": 10,
                 "isClickable": true, "isInput": false, "isVideo": false,
                 "isSelect": false, "disabled": false},
                {"uid": 2, "tag": "a", "role": "link", "name": "Docs", "context": "",
                 "x": 0, "y": 20, "width": 10, "height": 10,
                 "isClickable": true, "isInput": false, "isVideo": false,
                 "isSelect": false, "disabled": false}
            ],
            "rawText": ""
        }"#;
        let snapshot: PageSnapshot = serde_json::from_str(payload).unwrap();
        let mut uids: Vec<i64> = snapshot.elements.iter().map(|e| e.uid).collect();
        uids.dedup();
        assert_eq!(uids.len(), snapshot.elements.len());
    }
}
