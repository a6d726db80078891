use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    1500
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_api_base(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_subtask_max_steps")]
    pub subtask_max_steps: u32,
    #[serde(default = "default_keep_recent_tool_rounds")]
    pub keep_recent_tool_rounds: usize,
    #[serde(default = "default_max_research_tabs")]
    pub max_research_tabs: usize,
    #[serde(default = "default_subtask_timeout_secs")]
    pub subtask_timeout_secs: u64,
}

fn default_max_steps() -> u32 {
    30
}

fn default_subtask_max_steps() -> u32 {
    20
}

fn default_keep_recent_tool_rounds() -> usize {
    6
}

fn default_max_research_tabs() -> usize {
    5
}

fn default_subtask_timeout_secs() -> u64 {
    90
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            subtask_max_steps: default_subtask_max_steps(),
            keep_recent_tool_rounds: default_keep_recent_tool_rounds(),
            max_research_tabs: default_max_research_tabs(),
            subtask_timeout_secs: default_subtask_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// Explicit browser binary. When unset, well-known locations are probed.
    #[serde(default)]
    pub executable: Option<String>,
    #[serde(default)]
    pub headless: bool,
    #[serde(default = "default_window_size")]
    pub window_size: String,
}

fn default_window_size() -> String {
    "1280,900".to_string()
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            headless: false,
            window_size: default_window_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
}

impl Config {
    pub fn load(paths: &Paths) -> Result<Self> {
        let path = paths.config_file();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, paths: &Paths) -> Result<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.llm.api_base, "https://api.openai.com/v1");
        assert_eq!(config.agent.max_steps, 30);
        assert_eq!(config.agent.subtask_max_steps, 20);
        assert_eq!(config.agent.max_research_tabs, 5);
        assert_eq!(config.agent.subtask_timeout_secs, 90);
        assert!(!config.browser.headless);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"llm": {"apiKey": "sk-test", "model": "gpt-4o"}}"#).unwrap();
        assert_eq!(config.llm.api_key, "sk-test");
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.max_tokens, 4096);
        assert_eq!(config.agent.keep_recent_tool_rounds, 6);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let paths = Paths::with_base(tmp.path().to_path_buf());

        let mut config = Config::default();
        config.llm.api_key = "sk-roundtrip".to_string();
        config.browser.headless = true;
        config.save(&paths).unwrap();

        let loaded = Config::load(&paths).unwrap();
        assert_eq!(loaded.llm.api_key, "sk-roundtrip");
        assert!(loaded.browser.headless);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let tmp = tempfile::TempDir::new().unwrap();
        let paths = Paths::with_base(tmp.path().to_path_buf());
        let config = Config::load(&paths).unwrap();
        assert!(config.llm.api_key.is_empty());
    }
}
