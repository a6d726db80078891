//! The runtime behind the command surface: owns the config, the event
//! stream, the lazily launched browser, the conversation store, and the
//! process-scoped abort flag. Run-scoped state lives and dies with each run.

use edith_browser::{BrowserController, BrowserProcess, CdpClient, DebuggerChannel, TabRegistry};
use edith_core::types::ChatMessage;
use edith_core::{AgentCommand, AgentEvent, CommandAck, Config, Paths, Result};
use edith_providers::{create_provider, Provider};
use edith_storage::{AuditLogger, ConversationStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::agent_loop::{AgentLoop, AgentMode, LoopOutcome, LoopStatus};
use crate::driver::{CdpDriver, PageDriver};
use crate::prompts::INTERACTIVE_SYSTEM_PROMPT;
use crate::research::{ResearchOrchestrator, ResearchRun};

const CHAT_SYSTEM_PROMPT: &str =
    "You are EDITH, a concise and helpful assistant. Answer directly; you have \
     no tools in this mode.";

struct BrowserHandle {
    process: BrowserProcess,
    controller: Arc<BrowserController>,
}

pub struct AgentRuntime {
    config: Config,
    paths: Paths,
    store: Arc<ConversationStore>,
    audit: Arc<AuditLogger>,
    events_tx: mpsc::Sender<AgentEvent>,
    abort: Arc<AtomicBool>,
    browser: Mutex<Option<BrowserHandle>>,
    provider_override: Option<Arc<dyn Provider>>,
}

impl AgentRuntime {
    pub fn new(config: Config, paths: Paths, events_tx: mpsc::Sender<AgentEvent>) -> Self {
        let store = Arc::new(ConversationStore::new(paths.clone()));
        let audit = Arc::new(AuditLogger::new(paths.clone()));
        Self {
            config,
            paths,
            store,
            audit,
            events_tx,
            abort: Arc::new(AtomicBool::new(false)),
            browser: Mutex::new(None),
            provider_override: None,
        }
    }

    /// Inject a provider instead of building one from config (embedding and
    /// tests).
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider_override = Some(provider);
        self
    }

    /// Entry point for the command surface. Runs are acknowledged
    /// immediately and progress arrives as events.
    pub fn handle(self: &Arc<Self>, command: AgentCommand) -> CommandAck {
        match command {
            AgentCommand::Chat {
                prompt,
                conversation_id,
            } => {
                let conversation_id = resolve_conversation_id(conversation_id);
                let runtime = self.clone();
                let conv = conversation_id.clone();
                tokio::spawn(async move { runtime.run_chat(&prompt, &conv).await });
                CommandAck::ok(&conversation_id)
            }
            AgentCommand::AgentRun {
                prompt,
                conversation_id,
            } => {
                let conversation_id = resolve_conversation_id(conversation_id);
                let runtime = self.clone();
                let conv = conversation_id.clone();
                tokio::spawn(async move { runtime.run_agent(&prompt, &conv).await });
                CommandAck::ok(&conversation_id)
            }
            AgentCommand::ResearchRun {
                prompt,
                conversation_id,
            } => {
                let conversation_id = resolve_conversation_id(conversation_id);
                let runtime = self.clone();
                let conv = conversation_id.clone();
                tokio::spawn(async move { runtime.run_research(&prompt, &conv).await });
                CommandAck::ok(&conversation_id)
            }
            AgentCommand::Stop => {
                self.stop();
                CommandAck {
                    ok: true,
                    conversation_id: None,
                    error: None,
                }
            }
        }
    }

    /// Cooperative: the running loop halts at its next checkpoint.
    pub fn stop(&self) {
        info!("Stop requested");
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    async fn emit(&self, event: AgentEvent) {
        if self.events_tx.send(event).await.is_err() {
            warn!("Event receiver dropped");
        }
    }

    async fn emit_error(&self, conversation_id: &str, error: &str) {
        error!(conversation_id, error, "Run failed");
        self.emit(AgentEvent::Error {
            conversation_id: conversation_id.to_string(),
            error: error.to_string(),
        })
        .await;
    }

    fn provider(&self) -> Result<Arc<dyn Provider>> {
        if let Some(provider) = &self.provider_override {
            return Ok(provider.clone());
        }
        create_provider(&self.config)
    }

    async fn ensure_browser(&self) -> Result<Arc<BrowserController>> {
        let mut guard = self.browser.lock().await;
        if let Some(handle) = guard.as_ref() {
            return Ok(handle.controller.clone());
        }

        let process = BrowserProcess::launch(
            self.config.browser.executable.as_deref(),
            &self.paths.browser_profile_dir(),
            self.config.browser.headless,
            &self.config.browser.window_size,
        )
        .await?;
        let cdp = Arc::new(CdpClient::connect(&process.ws_url).await?);
        let channel = DebuggerChannel::new(cdp);
        let registry = Arc::new(TabRegistry::new(channel.clone()));
        let controller = Arc::new(BrowserController::new(
            channel,
            registry,
            self.paths.media_dir(),
        ));

        *guard = Some(BrowserHandle {
            process,
            controller: controller.clone(),
        });
        Ok(controller)
    }

    /// Release every debugger session and stop the browser process.
    pub async fn shutdown(&self) {
        if let Some(mut handle) = self.browser.lock().await.take() {
            handle.controller.registry().detach_all().await;
            handle.process.kill().await;
        }
    }

    // ── chat (no tools) ───────────────────────────────────────────────

    pub async fn run_chat(&self, prompt: &str, conversation_id: &str) {
        let provider = match self.provider() {
            Ok(p) => p,
            Err(e) => return self.emit_error(conversation_id, &e.to_string()).await,
        };

        let mut transcript = self.store.load(conversation_id).unwrap_or_default();
        transcript.push(ChatMessage::user(prompt));

        let mut messages = vec![ChatMessage::system(CHAT_SYSTEM_PROMPT)];
        messages.extend(transcript.iter().cloned());

        match provider.chat(&messages, &[]).await {
            Ok(response) => {
                let reply = response.content.unwrap_or_default();
                transcript.push(ChatMessage::assistant(&reply));
                self.save(conversation_id, prompt, &transcript);
                self.emit(AgentEvent::Progress {
                    conversation_id: conversation_id.to_string(),
                    text: reply,
                })
                .await;
                self.emit(AgentEvent::Done {
                    conversation_id: conversation_id.to_string(),
                })
                .await;
            }
            Err(e) => self.emit_error(conversation_id, &e.to_string()).await,
        }
    }

    // ── agent run ─────────────────────────────────────────────────────

    pub async fn run_agent(&self, prompt: &str, conversation_id: &str) {
        self.abort.store(false, Ordering::SeqCst);

        let provider = match self.provider() {
            Ok(p) => p,
            Err(e) => return self.emit_error(conversation_id, &e.to_string()).await,
        };
        let controller = match self.ensure_browser().await {
            Ok(c) => c,
            Err(e) => return self.emit_error(conversation_id, &e.to_string()).await,
        };
        let driver: Arc<dyn PageDriver> = Arc::new(CdpDriver::new(controller));

        match self
            .drive_interactive(provider, driver, prompt, conversation_id)
            .await
        {
            Ok(outcome) => {
                self.finish_run(conversation_id, &outcome).await;
            }
            Err(e) => self.emit_error(conversation_id, &e.to_string()).await,
        }
        self.abort.store(false, Ordering::SeqCst);
    }

    async fn drive_interactive(
        &self,
        provider: Arc<dyn Provider>,
        driver: Arc<dyn PageDriver>,
        prompt: &str,
        conversation_id: &str,
    ) -> Result<LoopOutcome> {
        let mut transcript = self.store.load(conversation_id).unwrap_or_default();
        transcript.push(ChatMessage::user(prompt));

        let agent = self.build_loop(provider, driver, conversation_id, prompt);
        agent.run(INTERACTIVE_SYSTEM_PROMPT, transcript, None).await
    }

    fn build_loop(
        &self,
        provider: Arc<dyn Provider>,
        driver: Arc<dyn PageDriver>,
        conversation_id: &str,
        title: &str,
    ) -> AgentLoop {
        let events_tx = self.events_tx.clone();
        let conv_progress = conversation_id.to_string();
        let store = self.store.clone();
        let conv_persist = conversation_id.to_string();
        let title = conversation_title(title);
        let audit = self.audit.clone();
        let conv_audit = conversation_id.to_string();

        AgentLoop::new(
            provider,
            driver,
            self.abort.clone(),
            AgentMode::Interactive,
            self.config.agent.max_steps,
            self.config.agent.keep_recent_tool_rounds,
        )
        .with_llm_retry(self.config.llm.max_retries, self.config.llm.retry_delay_ms)
        .on_progress(Arc::new(move |text| {
            let _ = events_tx.try_send(AgentEvent::Progress {
                conversation_id: conv_progress.clone(),
                text: text.to_string(),
            });
        }))
        .on_transcript(Arc::new(move |transcript| {
            if let Err(e) = store.save(&conv_persist, &title, transcript) {
                warn!(error = %e, "Failed to persist conversation");
            }
        }))
        .on_tool(Arc::new(move |tool, args, result, duration_ms| {
            if let Err(e) =
                audit.log_tool_call(tool, args.clone(), result, &conv_audit, duration_ms)
            {
                warn!(error = %e, "Failed to write audit event");
            }
        }))
    }

    async fn finish_run(&self, conversation_id: &str, outcome: &LoopOutcome) {
        let status = match outcome.status {
            LoopStatus::Done => "done",
            LoopStatus::Cancelled => "cancelled",
            LoopStatus::MaxStepsReached => "max_steps",
        };
        if let Err(e) = self
            .audit
            .log_run_finished(conversation_id, status, outcome.steps)
        {
            warn!(error = %e, "Failed to write audit event");
        }
        self.emit(AgentEvent::Progress {
            conversation_id: conversation_id.to_string(),
            text: outcome.summary.clone(),
        })
        .await;
        self.emit(AgentEvent::Done {
            conversation_id: conversation_id.to_string(),
        })
        .await;
    }

    // ── research run ──────────────────────────────────────────────────

    pub async fn run_research(&self, prompt: &str, conversation_id: &str) {
        self.abort.store(false, Ordering::SeqCst);

        let provider = match self.provider() {
            Ok(p) => p,
            Err(e) => return self.emit_error(conversation_id, &e.to_string()).await,
        };
        let controller = match self.ensure_browser().await {
            Ok(c) => c,
            Err(e) => return self.emit_error(conversation_id, &e.to_string()).await,
        };
        let driver: Arc<dyn PageDriver> = Arc::new(CdpDriver::new(controller));

        let events_tx = self.events_tx.clone();
        let conv = conversation_id.to_string();
        let orchestrator = ResearchOrchestrator::new(
            provider.clone(),
            driver.clone(),
            self.config.clone(),
            self.abort.clone(),
        )
        .on_progress(Arc::new(move |text| {
            let _ = events_tx.try_send(AgentEvent::Progress {
                conversation_id: conv.clone(),
                text: text.to_string(),
            });
        }));

        match orchestrator.run(prompt).await {
            Ok(ResearchRun::Completed { answer, results }) => {
                let mut transcript = self.store.load(conversation_id).unwrap_or_default();
                transcript.push(ChatMessage::user(prompt));
                transcript.push(ChatMessage::assistant(&answer));
                self.save(conversation_id, prompt, &transcript);
                if let Err(e) = self.audit.log_run_finished(
                    conversation_id,
                    "research_done",
                    results.len() as u32,
                ) {
                    warn!(error = %e, "Failed to write audit event");
                }
                self.emit(AgentEvent::Progress {
                    conversation_id: conversation_id.to_string(),
                    text: answer,
                })
                .await;
                self.emit(AgentEvent::Done {
                    conversation_id: conversation_id.to_string(),
                })
                .await;
            }
            Ok(ResearchRun::NotResearch { reasoning }) => {
                info!(reasoning = %reasoning, "Falling back to single-tab agent");
                self.emit(AgentEvent::Progress {
                    conversation_id: conversation_id.to_string(),
                    text: "This looks like a single-page task — running the regular agent instead."
                        .to_string(),
                })
                .await;
                match self
                    .drive_interactive(provider, driver, prompt, conversation_id)
                    .await
                {
                    Ok(outcome) => self.finish_run(conversation_id, &outcome).await,
                    Err(e) => self.emit_error(conversation_id, &e.to_string()).await,
                }
            }
            Err(e) => self.emit_error(conversation_id, &e.to_string()).await,
        }
        self.abort.store(false, Ordering::SeqCst);
    }

    fn save(&self, conversation_id: &str, title: &str, transcript: &[ChatMessage]) {
        if let Err(e) = self
            .store
            .save(conversation_id, &conversation_title(title), transcript)
        {
            warn!(error = %e, "Failed to persist conversation");
        }
    }
}

fn resolve_conversation_id(given: Option<String>) -> String {
    given.unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn conversation_title(prompt: &str) -> String {
    let title: String = prompt.chars().take(60).collect();
    title
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use edith_core::types::LLMResponse;
    use serde_json::Value;

    struct EchoProvider;

    #[async_trait]
    impl Provider for EchoProvider {
        async fn chat(&self, messages: &[ChatMessage], _tools: &[Value]) -> Result<LLMResponse> {
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(LLMResponse {
                content: Some(format!("echo: {}", last)),
                tool_calls: vec![],
                finish_reason: "stop".to_string(),
                usage: Value::Null,
            })
        }
    }

    fn runtime_with_echo() -> (tempfile::TempDir, Arc<AgentRuntime>, mpsc::Receiver<AgentEvent>) {
        let tmp = tempfile::TempDir::new().unwrap();
        let paths = Paths::with_base(tmp.path().to_path_buf());
        paths.ensure_dirs().unwrap();
        let (tx, rx) = mpsc::channel(64);
        let runtime = Arc::new(
            AgentRuntime::new(Config::default(), paths, tx).with_provider(Arc::new(EchoProvider)),
        );
        (tmp, runtime, rx)
    }

    #[tokio::test]
    async fn test_chat_round_trip() {
        let (_tmp, runtime, mut rx) = runtime_with_echo();

        runtime.run_chat("hello there", "conv-chat").await;

        match rx.recv().await.unwrap() {
            AgentEvent::Progress { text, .. } => assert_eq!(text, "echo: hello there"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(rx.recv().await.unwrap(), AgentEvent::Done { .. }));

        let saved = runtime.store.load("conv-chat").unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[1].role, "assistant");
    }

    #[tokio::test]
    async fn test_missing_api_key_is_config_error_event() {
        let tmp = tempfile::TempDir::new().unwrap();
        let paths = Paths::with_base(tmp.path().to_path_buf());
        let (tx, mut rx) = mpsc::channel(8);
        let runtime = Arc::new(AgentRuntime::new(Config::default(), paths, tx));

        runtime.run_chat("hi", "conv-x").await;
        match rx.recv().await.unwrap() {
            AgentEvent::Error { error, .. } => assert!(error.contains("No API key")),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stop_command_sets_abort_flag() {
        let (_tmp, runtime, _rx) = runtime_with_echo();
        assert!(!runtime.abort_flag().load(Ordering::SeqCst));
        let ack = runtime.handle(AgentCommand::Stop);
        assert!(ack.ok);
        assert!(runtime.abort_flag().load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_agent_run_acks_immediately_with_conversation_id() {
        let (_tmp, runtime, _rx) = runtime_with_echo();
        let ack = runtime.handle(AgentCommand::AgentRun {
            prompt: "do things".to_string(),
            conversation_id: Some("conv-7".to_string()),
        });
        assert!(ack.ok);
        assert_eq!(ack.conversation_id.as_deref(), Some("conv-7"));
    }

    #[test]
    fn test_conversation_title_truncates() {
        let long = "x".repeat(100);
        assert_eq!(conversation_title(&long).chars().count(), 60);
        assert_eq!(conversation_title("short"), "short");
    }
}
