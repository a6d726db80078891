//! The reason-observe-act loop.
//!
//! One step: check the abort flag, prune the transcript, call the LLM with
//! the tool catalog, dispatch whatever tools it returned, re-observe the page
//! after each mutating action, and append everything back into the
//! transcript. The loop ends when the LLM calls its terminal tool, answers
//! in plain text, exhausts the step budget, or the user stops it.

use edith_browser::actions::parse_new_tab_sentinel;
use edith_browser::{format_snapshot, PageSnapshot, TabId, TabStatus};
use edith_core::types::{ChatMessage, ToolCallRequest};
use edith_core::{Error, Result};
use edith_providers::Provider;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::catalog::{is_mutating, terminal_tool, tool_schemas};
use crate::driver::PageDriver;

pub const STOP_MARKER: &str = "⏹ Automation stopped by user.";

/// How many consecutive take_snapshot calls (with no action between) before
/// the loop nudges the LLM to act.
const SNAPSHOT_LOOP_LIMIT: u32 = 3;

const SNAPSHOT_LOOP_HINT: &str = "\n\n⚠️ You have taken several snapshots in a row without \
acting. Either act on the page (click, type, scroll) or finish the task now.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    Interactive,
    SubTask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Done,
    Cancelled,
    MaxStepsReached,
}

#[derive(Debug)]
pub struct LoopOutcome {
    pub status: LoopStatus,
    /// Final assistant text or terminal-tool summary.
    pub summary: String,
    /// Data recorded by `extract_data` (sub-task mode only).
    pub extracted_data: Option<String>,
    pub steps: u32,
    pub transcript: Vec<ChatMessage>,
    pub active_tab: Option<TabId>,
}

pub type ProgressFn = Arc<dyn Fn(&str) + Send + Sync>;
pub type PersistFn = Arc<dyn Fn(&[ChatMessage]) + Send + Sync>;
pub type ToolAuditFn = Arc<dyn Fn(&str, &Value, &str, u64) + Send + Sync>;

pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    driver: Arc<dyn PageDriver>,
    abort: Arc<AtomicBool>,
    mode: AgentMode,
    max_steps: u32,
    keep_recent_tool_rounds: usize,
    llm_max_retries: u32,
    llm_retry_delay_ms: u64,
    progress: Option<ProgressFn>,
    persist: Option<PersistFn>,
    tool_audit: Option<ToolAuditFn>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        driver: Arc<dyn PageDriver>,
        abort: Arc<AtomicBool>,
        mode: AgentMode,
        max_steps: u32,
        keep_recent_tool_rounds: usize,
    ) -> Self {
        Self {
            provider,
            driver,
            abort,
            mode,
            max_steps,
            keep_recent_tool_rounds,
            llm_max_retries: 2,
            llm_retry_delay_ms: 1500,
            progress: None,
            persist: None,
            tool_audit: None,
        }
    }

    pub fn with_llm_retry(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.llm_max_retries = max_retries;
        self.llm_retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn on_progress(mut self, f: ProgressFn) -> Self {
        self.progress = Some(f);
        self
    }

    pub fn on_transcript(mut self, f: PersistFn) -> Self {
        self.persist = Some(f);
        self
    }

    pub fn on_tool(mut self, f: ToolAuditFn) -> Self {
        self.tool_audit = Some(f);
        self
    }

    fn emit(&self, text: &str) {
        if let Some(progress) = &self.progress {
            progress(text);
        }
    }

    fn persist(&self, transcript: &[ChatMessage]) {
        if let Some(persist) = &self.persist {
            persist(transcript);
        }
    }

    /// Run to completion. The transcript already contains the user prompt;
    /// `active_tab` is set for sub-tasks (whose tab is opened by the
    /// orchestrator) and `None` for interactive runs.
    pub async fn run(
        &self,
        system_prompt: &str,
        mut transcript: Vec<ChatMessage>,
        mut active_tab: Option<TabId>,
    ) -> Result<LoopOutcome> {
        let mut last_snapshot: Option<PageSnapshot> = None;
        let mut consecutive_snapshots: u32 = 0;
        let mut steps: u32 = 0;

        let tools = tool_schemas(self.mode);
        let terminal = terminal_tool(self.mode);

        loop {
            if self.abort.load(Ordering::SeqCst) {
                return Ok(self.cancel(transcript, steps, active_tab).await);
            }

            if steps >= self.max_steps {
                let msg = format!(
                    "Reached the maximum number of steps ({}). Stopping here.",
                    self.max_steps
                );
                warn!(steps, "Step budget exhausted");
                transcript.push(ChatMessage::assistant(&msg));
                self.persist(&transcript);
                self.detach_active(active_tab).await;
                return Ok(LoopOutcome {
                    status: LoopStatus::MaxStepsReached,
                    summary: msg,
                    extracted_data: None,
                    steps,
                    transcript,
                    active_tab,
                });
            }
            steps += 1;

            let pruned = prune_transcript(&transcript, self.keep_recent_tool_rounds);
            let mut messages = Vec::with_capacity(pruned.len() + 1);
            messages.push(ChatMessage::system(system_prompt));
            messages.extend(pruned);

            let response = match self.call_llm(&messages, &tools).await {
                Ok(r) => r,
                Err(e) => {
                    // Transport failures are the one thing the LLM cannot
                    // observe its way out of: release the debugger and bail.
                    self.detach_active(active_tab).await;
                    self.driver.detach_all().await;
                    return Err(e);
                }
            };

            debug!(
                step = steps,
                tool_calls = response.tool_calls.len(),
                finish_reason = %response.finish_reason,
                "LLM response"
            );

            if response.tool_calls.is_empty() {
                // Text without tools means the agent considers itself done.
                let content = response.content.unwrap_or_default();
                transcript.push(ChatMessage::assistant(&content));
                self.persist(&transcript);
                self.detach_active(active_tab).await;
                return Ok(LoopOutcome {
                    status: LoopStatus::Done,
                    summary: content,
                    extracted_data: None,
                    steps,
                    transcript,
                    active_tab,
                });
            }

            let mut assistant = ChatMessage::assistant(response.content.as_deref().unwrap_or(""));
            assistant.tool_calls = Some(response.tool_calls.clone());
            transcript.push(assistant);

            for call in &response.tool_calls {
                if self.abort.load(Ordering::SeqCst) {
                    return Ok(self.cancel(transcript, steps, active_tab).await);
                }

                if call.name == terminal {
                    let outcome = self
                        .finish_via_terminal(call, &mut transcript, steps, active_tab)
                        .await;
                    return Ok(outcome);
                }

                let started = std::time::Instant::now();
                let (mut result, new_active) = self
                    .execute_tool(call, active_tab, &mut last_snapshot)
                    .await;
                active_tab = new_active;

                if call.name == "take_snapshot" {
                    consecutive_snapshots += 1;
                    if consecutive_snapshots >= SNAPSHOT_LOOP_LIMIT {
                        result.push_str(SNAPSHOT_LOOP_HINT);
                    }
                } else {
                    consecutive_snapshots = 0;
                }

                // A mutating action invalidates the snapshot: re-observe
                // before the LLM thinks again, and splice the fresh view
                // into the tool result.
                if is_mutating(&call.name) {
                    if let Some(tab) = active_tab {
                        sleep(settle_delay(&call.name, &result)).await;
                        let snapshot = self.driver.snapshot(tab).await;
                        result.push_str("\n\n");
                        result.push_str(&format_snapshot(&snapshot));
                        last_snapshot = Some(snapshot);
                    }
                }

                if let Some(audit) = &self.tool_audit {
                    audit(
                        &call.name,
                        &call.arguments,
                        &result,
                        started.elapsed().as_millis() as u64,
                    );
                }

                transcript.push(ChatMessage::tool_result(&call.id, &call.name, &result));
            }

            self.persist(&transcript);
        }
    }

    async fn call_llm(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
    ) -> Result<edith_core::types::LLMResponse> {
        let mut last_error = None;
        for attempt in 0..=self.llm_max_retries {
            if attempt > 0 {
                let delay = self.llm_retry_delay_ms * (1u64 << (attempt - 1).min(4));
                warn!(attempt, delay_ms = delay, "Retrying LLM call");
                sleep(Duration::from_millis(delay)).await;
            }
            match self.provider.chat(messages, tools).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!(error = %e, attempt, "LLM call failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Provider("LLM call failed".to_string())))
    }

    async fn cancel(
        &self,
        mut transcript: Vec<ChatMessage>,
        steps: u32,
        active_tab: Option<TabId>,
    ) -> LoopOutcome {
        info!(steps, "Run cancelled by user");
        transcript.push(ChatMessage::assistant(STOP_MARKER));
        self.persist(&transcript);
        self.driver.detach_all().await;
        LoopOutcome {
            status: LoopStatus::Cancelled,
            summary: STOP_MARKER.to_string(),
            extracted_data: None,
            steps,
            transcript,
            active_tab,
        }
    }

    async fn finish_via_terminal(
        &self,
        call: &ToolCallRequest,
        transcript: &mut Vec<ChatMessage>,
        steps: u32,
        active_tab: Option<TabId>,
    ) -> LoopOutcome {
        let (summary, extracted) = match self.mode {
            AgentMode::Interactive => {
                let summary = call
                    .arguments
                    .get("summary")
                    .and_then(|v| v.as_str())
                    .unwrap_or("Task completed")
                    .to_string();
                self.emit("Task complete ✓");
                (summary, None)
            }
            AgentMode::SubTask => {
                let data = call
                    .arguments
                    .get("data")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                if let Some(tab) = active_tab {
                    self.driver.set_extracted(tab, &data).await;
                }
                self.emit("Data extracted ✓");
                (format!("Extracted {} chars of data", data.len()), Some(data))
            }
        };

        transcript.push(ChatMessage::tool_result(&call.id, &call.name, &summary));
        self.persist(transcript);

        if let Some(tab) = active_tab {
            self.driver.update_status(tab, TabStatus::Done).await;
        }
        self.detach_active(active_tab).await;

        info!(steps, "Run finished via terminal tool");
        LoopOutcome {
            status: LoopStatus::Done,
            summary,
            extracted_data: extracted,
            steps,
            transcript: std::mem::take(transcript),
            active_tab,
        }
    }

    async fn detach_active(&self, active_tab: Option<TabId>) {
        if let Some(tab) = active_tab {
            self.driver.detach(tab).await;
        }
    }

    /// Dispatch a single tool call. Returns the result text and the
    /// (possibly retargeted) active tab.
    async fn execute_tool(
        &self,
        call: &ToolCallRequest,
        active_tab: Option<TabId>,
        last_snapshot: &mut Option<PageSnapshot>,
    ) -> (String, Option<TabId>) {
        let args = &call.arguments;

        if call.name == "open_browser" {
            let url = match str_arg(args, "url") {
                Some(u) => u,
                None => return (missing_arg("url"), active_tab),
            };
            self.emit("Navigating...");
            return match self.driver.open_tab(&url, "agent task").await {
                Ok((tab, confirmation)) => {
                    self.driver.update_status(tab, TabStatus::Running).await;
                    *last_snapshot = None;
                    (confirmation, Some(tab))
                }
                Err(e) => (format!("Error: could not open browser tab: {}", e), active_tab),
            };
        }

        let tab = match active_tab {
            Some(tab) => tab,
            None => {
                return (
                    "Error: No browser tab is open yet. Call open_browser first.".to_string(),
                    active_tab,
                )
            }
        };

        let result = match call.name.as_str() {
            "take_snapshot" => {
                let snapshot = self.driver.snapshot(tab).await;
                self.emit(&format!("Reading page ({} elements)", snapshot.elements.len()));
                let text = format_snapshot(&snapshot);
                *last_snapshot = Some(snapshot);
                text
            }
            "navigate" => match str_arg(args, "url") {
                Some(url) => {
                    self.emit("Navigating...");
                    *last_snapshot = None;
                    self.driver.navigate(tab, &url).await
                }
                None => missing_arg("url"),
            },
            "click" => match (int_arg(args, "uid"), last_snapshot.as_ref()) {
                (None, _) => missing_arg("uid"),
                (_, None) => no_snapshot(),
                (Some(uid), Some(snapshot)) => self.driver.click(tab, uid, snapshot).await,
            },
            "type_text" => match (int_arg(args, "uid"), str_arg(args, "text"), last_snapshot.as_ref()) {
                (None, _, _) => missing_arg("uid"),
                (_, None, _) => missing_arg("text"),
                (_, _, None) => no_snapshot(),
                (Some(uid), Some(text), Some(snapshot)) => {
                    self.driver.type_text(tab, uid, &text, snapshot).await
                }
            },
            "press_key" => match str_arg(args, "key") {
                Some(key) => self.driver.press_key(tab, &key).await,
                None => missing_arg("key"),
            },
            "scroll" => {
                let direction = str_arg(args, "direction").unwrap_or_else(|| "down".to_string());
                let amount = int_arg(args, "amount").unwrap_or(600);
                self.driver.scroll(tab, &direction, amount).await
            }
            "select_option" => {
                match (int_arg(args, "uid"), str_arg(args, "value"), last_snapshot.as_ref()) {
                    (None, _, _) => missing_arg("uid"),
                    (_, None, _) => missing_arg("value"),
                    (_, _, None) => no_snapshot(),
                    (Some(uid), Some(value), Some(snapshot)) => {
                        self.driver.select_option(tab, uid, &value, snapshot).await
                    }
                }
            }
            "hover" => match (int_arg(args, "uid"), last_snapshot.as_ref()) {
                (None, _) => missing_arg("uid"),
                (_, None) => no_snapshot(),
                (Some(uid), Some(snapshot)) => self.driver.hover(tab, uid, snapshot).await,
            },
            "set_value" => {
                match (int_arg(args, "uid"), str_arg(args, "value"), last_snapshot.as_ref()) {
                    (None, _, _) => missing_arg("uid"),
                    (_, None, _) => missing_arg("value"),
                    (_, _, None) => no_snapshot(),
                    (Some(uid), Some(value), Some(snapshot)) => {
                        self.driver.set_value(tab, uid, &value, snapshot).await
                    }
                }
            }
            "wait_for_page_update" => {
                let timeout_ms = int_arg(args, "timeout_ms").unwrap_or(5000).max(0) as u64;
                self.driver.wait_for_page_update(tab, timeout_ms).await
            }
            "go_back" => {
                *last_snapshot = None;
                self.driver.go_back(tab).await
            }
            "screenshot" => self.driver.screenshot(tab).await,
            other => format!("Error: Unknown tool: {}", other),
        };

        // Clicks can open a new window; follow the sentinel so subsequent
        // tools target the new tab.
        if call.name == "click" {
            if let Some(new_tab) = parse_new_tab_sentinel(&result) {
                info!(old_tab = tab, new_tab, "Switching active tab");
                *last_snapshot = None;
                return (result, Some(new_tab));
            }
        }

        (result, Some(tab))
    }
}

fn str_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn int_arg(args: &Value, key: &str) -> Option<i64> {
    let value = args.get(key)?;
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn missing_arg(key: &str) -> String {
    format!(
        "Error: missing required parameter '{}'. Check the tool schema and retry.",
        key
    )
}

fn no_snapshot() -> String {
    "Error: No snapshot available. Take a snapshot first.".to_string()
}

/// Settle delay between a mutating action and the auto-snapshot. Enter that
/// navigated gets the long delay; everything else settles quickly.
fn settle_delay(tool: &str, result: &str) -> Duration {
    let ms = match tool {
        "click" => 1000,
        "press_key" => {
            if result.contains("page navigated") {
                1500
            } else {
                300
            }
        }
        "wait_for_page_update" => 300,
        _ => 800,
    };
    Duration::from_millis(ms)
}

/// Drop old tool exchanges, keep user intent.
///
/// Every user message survives; assistant-with-tool-calls messages and their
/// tool results survive only when they belong to the `keep_rounds` most
/// recent rounds. Plain assistant text survives.
pub fn prune_transcript(messages: &[ChatMessage], keep_rounds: usize) -> Vec<ChatMessage> {
    let round_starts: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == "assistant" && m.tool_calls.is_some())
        .map(|(i, _)| i)
        .collect();

    let cutoff = if round_starts.len() > keep_rounds {
        round_starts[round_starts.len() - keep_rounds]
    } else {
        0
    };

    messages
        .iter()
        .enumerate()
        .filter(|(i, m)| {
            if m.role == "user" {
                return true;
            }
            if *i >= cutoff {
                return true;
            }
            m.role == "assistant" && m.tool_calls.is_none()
        })
        .map(|(_, m)| m.clone())
        .collect()
}
