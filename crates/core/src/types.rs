use serde::{Deserialize, Serialize};
use tracing::warn;

/// A tool call requested by the LLM. Serializes to the OpenAI-compatible
/// format `{id, type: "function", function: {name, arguments}}` where
/// `arguments` is a JSON-encoded string.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl Serialize for ToolCallRequest {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("type", "function")?;
        map.serialize_entry(
            "function",
            &serde_json::json!({
                "name": self.name,
                "arguments": self.arguments.to_string(),
            }),
        )?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ToolCallRequest {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let obj = value
            .as_object()
            .ok_or_else(|| serde::de::Error::custom("expected object"))?;

        let id = obj
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        // Wire format: {id, type, function: {name, arguments}}
        if let Some(func) = obj.get("function").and_then(|v| v.as_object()) {
            let name = func
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let arguments = match func.get("arguments") {
                Some(serde_json::Value::String(s)) => serde_json::from_str(s).unwrap_or_else(|e| {
                    warn!(error = %e, raw = %s, "Unparsable tool call arguments, using empty object");
                    serde_json::Value::Object(serde_json::Map::new())
                }),
                Some(v) => v.clone(),
                None => serde_json::Value::Object(serde_json::Map::new()),
            };
            return Ok(ToolCallRequest {
                id,
                name,
                arguments,
            });
        }

        // Flat format: {id, name, arguments}
        let name = obj
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let arguments = obj
            .get("arguments")
            .cloned()
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        Ok(ToolCallRequest {
            id,
            name,
            arguments,
        })
    }
}

/// One LLM turn as seen by the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: String,
    pub usage: serde_json::Value,
}

impl Default for LLMResponse {
    fn default() -> Self {
        Self {
            content: None,
            tool_calls: Vec::new(),
            finish_reason: String::new(),
            usage: serde_json::Value::Null,
        }
    }
}

/// A transcript entry. Conversations are persisted and replayed, so every
/// message carries a stable id and a timestamp alongside the wire fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub id: String,
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub timestamp_ms: i64,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: role.to_string(),
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn system(content: &str) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: &str) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::new("assistant", content)
    }

    pub fn tool_result(tool_call_id: &str, tool_name: &str, content: &str) -> Self {
        let mut msg = Self::new("tool", content);
        msg.tool_call_id = Some(tool_call_id.to_string());
        msg.name = Some(tool_name.to_string());
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_call_wire_format_roundtrip() {
        let call = ToolCallRequest {
            id: "call_1".to_string(),
            name: "click".to_string(),
            arguments: serde_json::json!({"uid": 7}),
        };
        let encoded = serde_json::to_value(&call).unwrap();
        assert_eq!(encoded["type"], "function");
        assert_eq!(encoded["function"]["name"], "click");
        // arguments are a JSON string on the wire
        assert_eq!(encoded["function"]["arguments"], r#"{"uid":7}"#);

        let decoded: ToolCallRequest = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded.name, "click");
        assert_eq!(decoded.arguments["uid"], 7);
    }

    #[test]
    fn test_tool_call_flat_format() {
        let decoded: ToolCallRequest = serde_json::from_str(
            r#"{"id": "c2", "name": "type_text", "arguments": {"uid": 3, "text": "hi"}}"#,
        )
        .unwrap();
        assert_eq!(decoded.id, "c2");
        assert_eq!(decoded.name, "type_text");
        assert_eq!(decoded.arguments["text"], "hi");
    }

    #[test]
    fn test_tool_call_bad_arguments_degrade_to_empty() {
        let decoded: ToolCallRequest = serde_json::from_str(
            r#"{"id": "c3", "function": {"name": "scroll", "arguments": "not json"}}"#,
        )
        .unwrap();
        assert_eq!(decoded.name, "scroll");
        assert!(decoded.arguments.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_message_constructors() {
        let msg = ChatMessage::tool_result("call_9", "click", "Clicked element 4");
        assert_eq!(msg.role, "tool");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_9"));
        assert_eq!(msg.name.as_deref(), Some("click"));
        assert!(!msg.id.is_empty());
        assert!(msg.timestamp_ms > 0);

        let user = ChatMessage::user("hello");
        assert_eq!(user.role, "user");
        assert!(user.tool_calls.is_none());
    }
}
