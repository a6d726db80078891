use edith_core::{Config, Paths};
use edith_storage::ConversationStore;

pub fn run() -> i32 {
    let paths = Paths::new();
    let config = match Config::load(&paths) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            return 1;
        }
    };

    println!("Base directory: {}", paths.base.display());
    println!(
        "Config file:    {} ({})",
        paths.config_file().display(),
        if paths.config_file().exists() { "present" } else { "missing — run `edith onboard`" }
    );
    println!(
        "API key:        {}",
        if config.llm.api_key.is_empty() { "not set" } else { "set" }
    );
    println!("API base:       {}", config.llm.api_base);
    println!("Model:          {}", config.llm.model);
    println!(
        "Browser:        {} ({})",
        config
            .browser
            .executable
            .clone()
            .or_else(edith_browser::launch::find_browser_binary)
            .unwrap_or_else(|| "not found".to_string()),
        if config.browser.headless { "headless" } else { "headed" }
    );
    println!(
        "Agent:          {} steps, {} research tabs, {}s sub-task timeout",
        config.agent.max_steps, config.agent.max_research_tabs, config.agent.subtask_timeout_secs
    );
    0
}

pub fn conversations() -> i32 {
    let paths = Paths::new();
    let store = ConversationStore::new(paths);
    match store.list() {
        Ok(list) if list.is_empty() => {
            println!("No conversations yet.");
            0
        }
        Ok(list) => {
            for summary in list {
                println!("{}  {}  {}", summary.updated_at, summary.id, summary.title);
            }
            0
        }
        Err(e) => {
            eprintln!("Failed to list conversations: {}", e);
            1
        }
    }
}
