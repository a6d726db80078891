//! Three-phase research: decompose the prompt into per-site sub-tasks, run
//! one sub-task agent per tab in parallel, then synthesize one answer.

use edith_core::types::ChatMessage;
use edith_core::{Config, Result};
use edith_providers::Provider;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::agent_loop::{AgentLoop, AgentMode, LoopStatus, ProgressFn, STOP_MARKER};
use crate::driver::PageDriver;
use crate::prompts::{
    subtask_user_prompt, AGGREGATE_SYSTEM_PROMPT, DECOMPOSE_SYSTEM_PROMPT, SUBTASK_SYSTEM_PROMPT,
};
use edith_browser::{TabId, TabStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubTask {
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub extraction_goal: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ResearchPlan {
    pub is_research: bool,
    pub reasoning: String,
    pub sub_tasks: Vec<SubTask>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    Success,
    Timeout,
    Error,
}

impl SubTaskStatus {
    fn emoji(self) -> &'static str {
        match self {
            SubTaskStatus::Success => "✅",
            SubTaskStatus::Timeout => "⏱",
            SubTaskStatus::Error => "❌",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTaskResult {
    pub tab_id: TabId,
    pub sub_task: SubTask,
    pub status: SubTaskStatus,
    pub extracted_data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What a research run produced.
pub enum ResearchRun {
    /// The decomposer judged this a single-page task; the caller should run
    /// the regular agent instead. No tabs were created.
    NotResearch { reasoning: String },
    Completed {
        answer: String,
        results: Vec<SubTaskResult>,
    },
}

pub struct ResearchOrchestrator {
    provider: Arc<dyn Provider>,
    driver: Arc<dyn PageDriver>,
    config: Config,
    abort: Arc<AtomicBool>,
    progress: Option<ProgressFn>,
}

impl ResearchOrchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        driver: Arc<dyn PageDriver>,
        config: Config,
        abort: Arc<AtomicBool>,
    ) -> Self {
        Self {
            provider,
            driver,
            config,
            abort,
            progress: None,
        }
    }

    pub fn on_progress(mut self, f: ProgressFn) -> Self {
        self.progress = Some(f);
        self
    }

    fn emit(&self, text: &str) {
        if let Some(progress) = &self.progress {
            progress(text);
        }
    }

    pub async fn run(&self, user_prompt: &str) -> Result<ResearchRun> {
        // Phase 1 — decompose.
        self.emit("Planning research...");
        let plan = self.decompose(user_prompt).await?;
        if !plan.is_research {
            info!(reasoning = %plan.reasoning, "Prompt is not a research task");
            return Ok(ResearchRun::NotResearch {
                reasoning: plan.reasoning,
            });
        }
        info!(sub_tasks = plan.sub_tasks.len(), "Research plan ready");
        self.emit(&format!(
            "Opening {} tabs for parallel research...",
            plan.sub_tasks.len()
        ));

        // Phase 2 — parallel sub-tasks.
        let results = self.run_sub_tasks(&plan.sub_tasks).await;

        // Phase 3 — aggregate, unless the user stopped the run mid-flight.
        let answer = if self.abort.load(Ordering::SeqCst) {
            STOP_MARKER.to_string()
        } else {
            self.emit("Synthesizing results...");
            self.aggregate(user_prompt, &results).await?
        };

        // Debugger sessions are released; tabs stay open so the user can
        // review the sources.
        self.driver.detach_all().await;

        Ok(ResearchRun::Completed { answer, results })
    }

    async fn decompose(&self, user_prompt: &str) -> Result<ResearchPlan> {
        let messages = vec![
            ChatMessage::system(DECOMPOSE_SYSTEM_PROMPT),
            ChatMessage::user(user_prompt),
        ];
        let response = self.provider.chat(&messages, &[]).await?;
        let text = response.content.unwrap_or_default();
        Ok(parse_research_plan(
            &text,
            self.config.agent.max_research_tabs,
        ))
    }

    async fn run_sub_tasks(&self, sub_tasks: &[SubTask]) -> Vec<SubTaskResult> {
        // Open every tab first so the initial page loads overlap.
        let mut launched: Vec<(TabId, SubTask)> = Vec::new();
        for sub_task in sub_tasks {
            match self.driver.open_tab(&sub_task.url, &sub_task.description).await {
                Ok((tab, _)) => launched.push((tab, sub_task.clone())),
                Err(e) => {
                    warn!(url = %sub_task.url, error = %e, "Failed to open research tab");
                }
            }
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        let timeout = Duration::from_secs(self.config.agent.subtask_timeout_secs);
        let futures: Vec<_> = launched
            .iter()
            .map(|(tab, sub_task)| self.run_one_sub_task(*tab, sub_task.clone(), timeout))
            .collect();

        // Settle-all: one sub-task failing or timing out never cascades.
        futures::future::join_all(futures).await
    }

    async fn run_one_sub_task(
        &self,
        tab: TabId,
        sub_task: SubTask,
        timeout: Duration,
    ) -> SubTaskResult {
        self.driver.update_status(tab, TabStatus::Running).await;

        let agent = {
            let mut agent = AgentLoop::new(
                self.provider.clone(),
                self.driver.clone(),
                self.abort.clone(),
                AgentMode::SubTask,
                self.config.agent.subtask_max_steps,
                self.config.agent.keep_recent_tool_rounds,
            )
            .with_llm_retry(
                self.config.llm.max_retries,
                self.config.llm.retry_delay_ms,
            );
            if let Some(progress) = &self.progress {
                agent = agent.on_progress(progress.clone());
            }
            agent
        };

        let transcript = vec![ChatMessage::user(&subtask_user_prompt(
            &sub_task.description,
            &sub_task.extraction_goal,
        ))];

        let run = agent.run(SUBTASK_SYSTEM_PROMPT, transcript, Some(tab));
        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(outcome)) => {
                if outcome.status == LoopStatus::Cancelled {
                    return SubTaskResult {
                        tab_id: tab,
                        sub_task,
                        status: SubTaskStatus::Error,
                        extracted_data: String::new(),
                        error: Some("stopped by user".to_string()),
                    };
                }
                let data = outcome
                    .extracted_data
                    .unwrap_or_else(|| outcome.summary.clone());
                SubTaskResult {
                    tab_id: tab,
                    sub_task,
                    status: SubTaskStatus::Success,
                    extracted_data: data,
                    error: None,
                }
            }
            Ok(Err(e)) => {
                warn!(tab, error = %e, "Sub-task failed");
                self.driver.update_status(tab, TabStatus::Error).await;
                SubTaskResult {
                    tab_id: tab,
                    sub_task,
                    status: SubTaskStatus::Error,
                    extracted_data: String::new(),
                    error: Some(e.to_string()),
                }
            }
            Err(_) => {
                // Wall clock expired: salvage whatever the page shows now.
                warn!(tab, "Sub-task timed out");
                self.driver.update_status(tab, TabStatus::Extracting).await;
                let snapshot = self.driver.snapshot(tab).await;
                let data: String = snapshot.raw_text.chars().take(2000).collect();
                self.driver.update_status(tab, TabStatus::Error).await;
                SubTaskResult {
                    tab_id: tab,
                    sub_task,
                    status: SubTaskStatus::Timeout,
                    extracted_data: data,
                    error: Some("timed out".to_string()),
                }
            }
        }
    }

    async fn aggregate(&self, user_prompt: &str, results: &[SubTaskResult]) -> Result<String> {
        let blocks = format_source_blocks(results);
        let user = format!(
            "Original request: {}\n\nExtracted data:\n\n{}",
            user_prompt, blocks
        );
        let messages = vec![
            ChatMessage::system(AGGREGATE_SYSTEM_PROMPT),
            ChatMessage::user(&user),
        ];
        let response = self.provider.chat(&messages, &[]).await?;
        Ok(response.content.unwrap_or_default())
    }
}

pub fn format_source_blocks(results: &[SubTaskResult]) -> String {
    let mut out = String::new();
    for (i, result) in results.iter().enumerate() {
        out.push_str(&format!(
            "Source {}: {}\nStatus: {}\nGoal: {}\nData: {}\n\n",
            i + 1,
            result.sub_task.url,
            result.status.emoji(),
            result.sub_task.extraction_goal,
            if result.extracted_data.is_empty() {
                result.error.as_deref().unwrap_or("(nothing extracted)")
            } else {
                &result.extracted_data
            }
        ));
    }
    out.trim_end().to_string()
}

/// Parse the decomposer's reply. Markdown fences are stripped first; any
/// parse failure or a plan with fewer than two sub-tasks degrades to
/// "not research" so the caller falls back to the single-tab agent.
pub fn parse_research_plan(text: &str, max_tabs: usize) -> ResearchPlan {
    let fence = Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("static regex");
    let cleaned = fence
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| text.trim().to_string());

    let mut plan: ResearchPlan = match serde_json::from_str(&cleaned) {
        Ok(plan) => plan,
        Err(e) => {
            warn!(error = %e, "Decomposer returned unparsable JSON, falling back to agent mode");
            return ResearchPlan::default();
        }
    };

    if plan.sub_tasks.len() > max_tabs {
        plan.sub_tasks.truncate(max_tabs);
    }
    if plan.sub_tasks.len() < 2 {
        plan.is_research = false;
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::PageDriver;
    use async_trait::async_trait;
    use edith_browser::PageSnapshot;
    use edith_core::types::{LLMResponse, ToolCallRequest};
    use serde_json::Value;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    fn plan_json(count: usize) -> String {
        let tasks: Vec<String> = (0..count)
            .map(|i| {
                format!(
                    r#"{{"description": "site {i}", "url": "https://site{i}.com", "extractionGoal": "price"}}"#
                )
            })
            .collect();
        format!(
            r#"{{"isResearch": true, "reasoning": "compare", "subTasks": [{}]}}"#,
            tasks.join(",")
        )
    }

    #[test]
    fn test_parse_plain_json() {
        let plan = parse_research_plan(&plan_json(3), 5);
        assert!(plan.is_research);
        assert_eq!(plan.sub_tasks.len(), 3);
        assert_eq!(plan.sub_tasks[0].url, "https://site0.com");
        assert_eq!(plan.sub_tasks[0].extraction_goal, "price");
    }

    #[test]
    fn test_parse_strips_markdown_fences() {
        let fenced = format!("```json\n{}\n```", plan_json(2));
        let plan = parse_research_plan(&fenced, 5);
        assert!(plan.is_research);
        assert_eq!(plan.sub_tasks.len(), 2);

        let bare_fence = format!("```\n{}\n```", plan_json(2));
        assert!(parse_research_plan(&bare_fence, 5).is_research);
    }

    #[test]
    fn test_parse_clamps_to_max_tabs() {
        let plan = parse_research_plan(&plan_json(8), 5);
        assert_eq!(plan.sub_tasks.len(), 5);
        assert!(plan.is_research);
    }

    #[test]
    fn test_single_subtask_forces_not_research() {
        let plan = parse_research_plan(&plan_json(1), 5);
        assert!(!plan.is_research);
    }

    #[test]
    fn test_unparsable_falls_back() {
        let plan = parse_research_plan("I think we should open three tabs", 5);
        assert!(!plan.is_research);
        assert!(plan.sub_tasks.is_empty());
    }

    /// Answers by role: the decomposer gets a plan, sub-task agents get an
    /// immediate extract_data, the aggregator gets the synthesis. Robust to
    /// the sub-tasks' interleaving.
    struct RoleProvider {
        plan: String,
    }

    #[async_trait]
    impl edith_providers::Provider for RoleProvider {
        async fn chat(
            &self,
            messages: &[edith_core::types::ChatMessage],
            _tools: &[Value],
        ) -> edith_core::Result<LLMResponse> {
            let system = messages.first().map(|m| m.content.as_str()).unwrap_or("");
            if system.contains("research sub-tasks") {
                return Ok(LLMResponse {
                    content: Some(self.plan.clone()),
                    tool_calls: vec![],
                    finish_reason: "stop".to_string(),
                    usage: Value::Null,
                });
            }
            if system.contains("research synthesizer") {
                return Ok(LLMResponse {
                    content: Some("the synthesis".to_string()),
                    tool_calls: vec![],
                    finish_reason: "stop".to_string(),
                    usage: Value::Null,
                });
            }
            Ok(LLMResponse {
                content: None,
                tool_calls: vec![ToolCallRequest {
                    id: "call_extract".to_string(),
                    name: "extract_data".to_string(),
                    arguments: serde_json::json!({"data": "price: $799"}),
                }],
                finish_reason: "tool_calls".to_string(),
                usage: Value::Null,
            })
        }
    }

    #[derive(Default)]
    struct StubDriver {
        next_tab: AtomicU32,
        opened: Mutex<Vec<String>>,
        detach_all_calls: Mutex<u32>,
    }

    #[async_trait]
    impl PageDriver for StubDriver {
        async fn open_tab(&self, url: &str, _task: &str) -> edith_core::Result<(TabId, String)> {
            self.opened.lock().unwrap().push(url.to_string());
            let tab = self.next_tab.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            Ok((tab, format!("Opened {}", url)))
        }

        async fn snapshot(&self, _tab: TabId) -> PageSnapshot {
            PageSnapshot {
                url: "https://example.com".to_string(),
                title: "t".to_string(),
                elements: vec![],
                raw_text: "visible page text".to_string(),
            }
        }

        async fn click(&self, _tab: TabId, _uid: i64, _s: &PageSnapshot) -> String {
            "Clicked".to_string()
        }
        async fn type_text(&self, _t: TabId, _u: i64, _x: &str, _s: &PageSnapshot) -> String {
            "Typed".to_string()
        }
        async fn press_key(&self, _t: TabId, _k: &str) -> String {
            "Pressed".to_string()
        }
        async fn scroll(&self, _t: TabId, _d: &str, _a: i64) -> String {
            "Scrolled".to_string()
        }
        async fn select_option(&self, _t: TabId, _u: i64, _v: &str, _s: &PageSnapshot) -> String {
            "Selected".to_string()
        }
        async fn hover(&self, _t: TabId, _u: i64, _s: &PageSnapshot) -> String {
            "Hovering".to_string()
        }
        async fn set_value(&self, _t: TabId, _u: i64, _v: &str, _s: &PageSnapshot) -> String {
            "Set".to_string()
        }
        async fn wait_for_page_update(&self, _t: TabId, _ms: u64) -> String {
            "idle".to_string()
        }
        async fn navigate(&self, _t: TabId, _u: &str) -> String {
            "Navigated".to_string()
        }
        async fn go_back(&self, _t: TabId) -> String {
            "Back".to_string()
        }
        async fn screenshot(&self, _t: TabId) -> String {
            "Saved".to_string()
        }
        async fn update_status(&self, _t: TabId, _s: TabStatus) {}
        async fn set_extracted(&self, _t: TabId, _d: &str) {}
        async fn detach(&self, _t: TabId) {}
        async fn detach_all(&self) {
            *self.detach_all_calls.lock().unwrap() += 1;
        }
    }

    fn orchestrator(
        plan: String,
        driver: Arc<StubDriver>,
    ) -> ResearchOrchestrator {
        let mut config = Config::default();
        config.agent.subtask_timeout_secs = 10;
        ResearchOrchestrator::new(
            Arc::new(RoleProvider { plan }),
            driver,
            config,
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[tokio::test]
    async fn test_three_source_research_run() {
        let driver = Arc::new(StubDriver::default());
        let orchestrator = orchestrator(plan_json(3), driver.clone());

        match orchestrator.run("compare prices").await.unwrap() {
            ResearchRun::Completed { answer, results } => {
                assert_eq!(answer, "the synthesis");
                assert_eq!(results.len(), 3);
                assert!(results.iter().all(|r| r.status == SubTaskStatus::Success));
                assert!(results.iter().all(|r| r.extracted_data == "price: $799"));
            }
            ResearchRun::NotResearch { .. } => panic!("expected a research run"),
        }

        // three tabs opened in parallel, all debugger sessions released after
        assert_eq!(driver.opened.lock().unwrap().len(), 3);
        assert!(*driver.detach_all_calls.lock().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_single_subtask_plan_creates_no_tabs() {
        let driver = Arc::new(StubDriver::default());
        let orchestrator = orchestrator(plan_json(1), driver.clone());

        match orchestrator.run("open google").await.unwrap() {
            ResearchRun::NotResearch { .. } => {}
            ResearchRun::Completed { .. } => panic!("expected fallback to agent mode"),
        }
        assert!(driver.opened.lock().unwrap().is_empty());
    }

    #[test]
    fn test_source_blocks() {
        let results = vec![
            SubTaskResult {
                tab_id: 1,
                sub_task: SubTask {
                    description: "amazon".to_string(),
                    url: "https://amazon.com".to_string(),
                    extraction_goal: "iPhone 16 price".to_string(),
                },
                status: SubTaskStatus::Success,
                extracted_data: "iPhone 16: $799".to_string(),
                error: None,
            },
            SubTaskResult {
                tab_id: 2,
                sub_task: SubTask {
                    description: "flipkart".to_string(),
                    url: "https://flipkart.com".to_string(),
                    extraction_goal: "iPhone 16 price".to_string(),
                },
                status: SubTaskStatus::Timeout,
                extracted_data: String::new(),
                error: Some("timed out".to_string()),
            },
        ];
        let blocks = format_source_blocks(&results);
        assert!(blocks.contains("Source 1: https://amazon.com"));
        assert!(blocks.contains("Status: ✅"));
        assert!(blocks.contains("Data: iPhone 16: $799"));
        assert!(blocks.contains("Source 2: https://flipkart.com"));
        assert!(blocks.contains("Status: ⏱"));
        assert!(blocks.contains("Data: timed out"));
    }
}
