use serde::{Deserialize, Serialize};

/// Commands a front end may issue to the runtime. `AgentRun` and `ResearchRun`
/// are acknowledged immediately; progress and completion arrive as events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentCommand {
    Chat {
        prompt: String,
        #[serde(default)]
        conversation_id: Option<String>,
    },
    AgentRun {
        prompt: String,
        #[serde(default)]
        conversation_id: Option<String>,
    },
    ResearchRun {
        prompt: String,
        #[serde(default)]
        conversation_id: Option<String>,
    },
    Stop,
}

/// Immediate response to a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandAck {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandAck {
    pub fn ok(conversation_id: &str) -> Self {
        Self {
            ok: true,
            conversation_id: Some(conversation_id.to_string()),
            error: None,
        }
    }

    pub fn err(error: &str) -> Self {
        Self {
            ok: false,
            conversation_id: None,
            error: Some(error.to_string()),
        }
    }
}

/// Asynchronous events emitted while a run is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Progress {
        conversation_id: String,
        text: String,
    },
    Done {
        conversation_id: String,
    },
    Error {
        conversation_id: String,
        error: String,
    },
}

impl AgentEvent {
    pub fn conversation_id(&self) -> &str {
        match self {
            AgentEvent::Progress {
                conversation_id, ..
            }
            | AgentEvent::Done { conversation_id }
            | AgentEvent::Error {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_json_shape() {
        let cmd: AgentCommand = serde_json::from_str(
            r#"{"type": "agent_run", "prompt": "Search YouTube for VS Code tutorials"}"#,
        )
        .unwrap();
        match cmd {
            AgentCommand::AgentRun {
                prompt,
                conversation_id,
            } => {
                assert!(prompt.starts_with("Search YouTube"));
                assert!(conversation_id.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let stop: AgentCommand = serde_json::from_str(r#"{"type": "stop"}"#).unwrap();
        assert!(matches!(stop, AgentCommand::Stop));
    }

    #[test]
    fn test_event_conversation_id() {
        let event = AgentEvent::Progress {
            conversation_id: "conv-1".to_string(),
            text: "Navigating...".to_string(),
        };
        assert_eq!(event.conversation_id(), "conv-1");

        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded["type"], "progress");
    }
}
