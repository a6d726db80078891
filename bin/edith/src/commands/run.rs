//! Drive the runtime from the terminal: send one command, stream its
//! progress events, and map Ctrl-C to the cooperative stop.

use edith_agent::AgentRuntime;
use edith_core::{AgentCommand, AgentEvent, Config, Paths};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

pub async fn agent(prompt: &str, conversation: Option<String>) -> i32 {
    execute(AgentCommand::AgentRun {
        prompt: prompt.to_string(),
        conversation_id: conversation,
    })
    .await
}

pub async fn research(prompt: &str, conversation: Option<String>) -> i32 {
    execute(AgentCommand::ResearchRun {
        prompt: prompt.to_string(),
        conversation_id: conversation,
    })
    .await
}

pub async fn chat(prompt: &str, conversation: Option<String>) -> i32 {
    execute(AgentCommand::Chat {
        prompt: prompt.to_string(),
        conversation_id: conversation,
    })
    .await
}

async fn execute(command: AgentCommand) -> i32 {
    let paths = Paths::new();
    if let Err(e) = paths.ensure_dirs() {
        eprintln!("Failed to create {}: {}", paths.base.display(), e);
        return 1;
    }
    let config = match Config::load(&paths) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            return 1;
        }
    };

    let (events_tx, mut events_rx) = mpsc::channel::<AgentEvent>(64);
    let runtime = Arc::new(AgentRuntime::new(config, paths, events_tx));

    // Ctrl-C requests a cooperative stop; the run ends at its next
    // checkpoint and the transcript records it.
    {
        let runtime = runtime.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\nStopping at the next checkpoint...");
                runtime.stop();
            }
        });
    }

    let ack = runtime.handle(command);
    if !ack.ok {
        eprintln!("{}", ack.error.unwrap_or_else(|| "command rejected".to_string()));
        return 1;
    }
    if let Some(conversation_id) = &ack.conversation_id {
        println!("Conversation: {}", conversation_id);
    }

    let exit_code = loop {
        match events_rx.recv().await {
            Some(AgentEvent::Progress { text, .. }) => {
                if !text.is_empty() {
                    println!("{}", text);
                }
            }
            Some(AgentEvent::Done { .. }) => break 0,
            Some(AgentEvent::Error { error, .. }) => {
                eprintln!("Error: {}", error);
                break 1;
            }
            None => {
                warn!("Event stream closed unexpectedly");
                break 1;
            }
        }
    };

    runtime.shutdown().await;
    exit_code
}
