//! Declarative catalog of every tool the LLM may call.
//!
//! Single-tab and sub-task agents share one list; they differ only in the
//! terminal tool (`task_complete` vs `extract_data`) and in `open_browser`,
//! which sub-tasks don't get — their tab is opened for them.

use serde_json::{json, Value};

use crate::agent_loop::AgentMode;

pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

impl ToolSpec {
    fn schema(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

fn uid_param(description: &str) -> Value {
    json!({"type": "integer", "description": description})
}

fn shared_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "take_snapshot",
            description: "Capture the current page: URL, title, visible text, and every \
                interactive element with its UID. Call this after navigation and whenever \
                your view of the page may be stale.",
            parameters: json!({"type": "object", "properties": {}, "required": []}),
        },
        ToolSpec {
            name: "navigate",
            description: "Navigate the current tab to a URL. Follow with take_snapshot to \
                see the new page.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "Destination URL"}
                },
                "required": ["url"]
            }),
        },
        ToolSpec {
            name: "click",
            description: "Click an element by its UID from the latest snapshot.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "uid": uid_param("UID of the element to click")
                },
                "required": ["uid"]
            }),
        },
        ToolSpec {
            name: "type_text",
            description: "Clear an input (or contenteditable) element and type text into it.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "uid": uid_param("UID of the input element"),
                    "text": {"type": "string", "description": "Text to type"}
                },
                "required": ["uid", "text"]
            }),
        },
        ToolSpec {
            name: "press_key",
            description: "Press a keyboard key in the page. Use Enter to submit the \
                focused form or search box.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "key": {
                        "type": "string",
                        "enum": ["Enter", "Tab", "Escape", "ArrowDown", "ArrowUp", "Backspace"],
                        "description": "Key to press"
                    }
                },
                "required": ["key"]
            }),
        },
        ToolSpec {
            name: "scroll",
            description: "Scroll the page to reveal more content. Triggers lazy-loaded \
                sections.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "direction": {"type": "string", "enum": ["up", "down"], "description": "Scroll direction"},
                    "amount": {"type": "integer", "description": "Pixels to scroll (default 600)"}
                },
                "required": ["direction"]
            }),
        },
        ToolSpec {
            name: "select_option",
            description: "Pick an option in a <select> dropdown by value or visible text.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "uid": uid_param("UID of the select element"),
                    "value": {"type": "string", "description": "Option value or visible text"}
                },
                "required": ["uid", "value"]
            }),
        },
        ToolSpec {
            name: "hover",
            description: "Hover over an element to reveal hover-only menus or tooltips.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "uid": uid_param("UID of the element to hover")
                },
                "required": ["uid"]
            }),
        },
        ToolSpec {
            name: "set_value",
            description: "Set an input's value directly through the native setter. Use for \
                numeric, price-range, or quantity fields where typing is unreliable.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "uid": uid_param("UID of the input element"),
                    "value": {"type": "string", "description": "Value to set"}
                },
                "required": ["uid", "value"]
            }),
        },
        ToolSpec {
            name: "wait_for_page_update",
            description: "Wait until the page's network activity settles. Use after an \
                action that triggers background loading.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "timeout_ms": {"type": "integer", "description": "Max wait in ms (default 5000)"}
                },
                "required": []
            }),
        },
        ToolSpec {
            name: "go_back",
            description: "Go back one entry in the tab's history.",
            parameters: json!({"type": "object", "properties": {}, "required": []}),
        },
        ToolSpec {
            name: "screenshot",
            description: "Save a PNG screenshot of the current page and return its path.",
            parameters: json!({"type": "object", "properties": {}, "required": []}),
        },
    ]
}

fn open_browser_tool() -> ToolSpec {
    ToolSpec {
        name: "open_browser",
        description: "Open a new browser tab at a URL and make it the active tab. This is \
            the first step of any task.",
        parameters: json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "URL to open, e.g. https://youtube.com"}
            },
            "required": ["url"]
        }),
    }
}

fn task_complete_tool() -> ToolSpec {
    ToolSpec {
        name: "task_complete",
        description: "Finish the task. Call this once the goal is met, with a short \
            summary of what was accomplished.",
        parameters: json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string", "description": "What was accomplished"}
            },
            "required": ["summary"]
        }),
    }
}

fn extract_data_tool() -> ToolSpec {
    ToolSpec {
        name: "extract_data",
        description: "Finish this sub-task by recording the data you extracted from the \
            page, as plain text.",
        parameters: json!({
            "type": "object",
            "properties": {
                "data": {"type": "string", "description": "The extracted data"}
            },
            "required": ["data"]
        }),
    }
}

/// The JSON-schema tool list for one agent mode, sent verbatim to the LLM on
/// every call.
pub fn tool_schemas(mode: AgentMode) -> Vec<Value> {
    let mut tools = shared_tools();
    match mode {
        AgentMode::Interactive => {
            tools.insert(0, open_browser_tool());
            tools.push(task_complete_tool());
        }
        AgentMode::SubTask => {
            tools.push(extract_data_tool());
        }
    }
    tools.iter().map(|t| t.schema()).collect()
}

/// The tool that ends the loop for a given mode.
pub fn terminal_tool(mode: AgentMode) -> &'static str {
    match mode {
        AgentMode::Interactive => "task_complete",
        AgentMode::SubTask => "extract_data",
    }
}

/// Tools that change the page and therefore invalidate the last snapshot.
/// The loop re-observes after each of these.
pub fn is_mutating(tool: &str) -> bool {
    matches!(
        tool,
        "click"
            | "type_text"
            | "press_key"
            | "select_option"
            | "hover"
            | "set_value"
            | "wait_for_page_update"
            | "go_back"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(schemas: &[Value]) -> Vec<String> {
        schemas
            .iter()
            .map(|s| s["function"]["name"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_interactive_catalog() {
        let tools = names(&tool_schemas(AgentMode::Interactive));
        assert!(tools.contains(&"open_browser".to_string()));
        assert!(tools.contains(&"task_complete".to_string()));
        assert!(!tools.contains(&"extract_data".to_string()));
    }

    #[test]
    fn test_subtask_catalog() {
        let tools = names(&tool_schemas(AgentMode::SubTask));
        assert!(!tools.contains(&"open_browser".to_string()));
        assert!(!tools.contains(&"task_complete".to_string()));
        assert!(tools.contains(&"extract_data".to_string()));
    }

    #[test]
    fn test_modes_share_everything_else() {
        let interactive: std::collections::HashSet<String> =
            names(&tool_schemas(AgentMode::Interactive)).into_iter().collect();
        let subtask: std::collections::HashSet<String> =
            names(&tool_schemas(AgentMode::SubTask)).into_iter().collect();

        let only_interactive: Vec<&String> = interactive.difference(&subtask).collect();
        let only_subtask: Vec<&String> = subtask.difference(&interactive).collect();

        let mut only_interactive: Vec<&str> =
            only_interactive.iter().map(|s| s.as_str()).collect();
        only_interactive.sort();
        assert_eq!(only_interactive, vec!["open_browser", "task_complete"]);
        assert_eq!(
            only_subtask.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            vec!["extract_data"]
        );
    }

    #[test]
    fn test_schemas_are_function_shaped() {
        for schema in tool_schemas(AgentMode::Interactive) {
            assert_eq!(schema["type"], "function");
            assert!(schema["function"]["name"].is_string());
            assert!(schema["function"]["description"].is_string());
            assert!(schema["function"]["parameters"]["type"].is_string());
        }
    }

    #[test]
    fn test_mutating_set() {
        for tool in [
            "click",
            "type_text",
            "press_key",
            "select_option",
            "hover",
            "set_value",
            "wait_for_page_update",
            "go_back",
        ] {
            assert!(is_mutating(tool), "{} should be mutating", tool);
        }
        for tool in ["take_snapshot", "navigate", "open_browser", "screenshot", "task_complete"] {
            assert!(!is_mutating(tool), "{} should not be mutating", tool);
        }
    }

    #[test]
    fn test_terminal_tools() {
        assert_eq!(terminal_tool(AgentMode::Interactive), "task_complete");
        assert_eq!(terminal_tool(AgentMode::SubTask), "extract_data");
    }
}
