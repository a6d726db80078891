use edith_core::{Config, Paths};

fn check(label: &str, ok: bool, detail: &str) -> bool {
    println!("{} {} — {}", if ok { "✓" } else { "✗" }, label, detail);
    ok
}

pub fn run() -> i32 {
    let paths = Paths::new();
    let mut healthy = true;

    healthy &= check(
        "config",
        paths.config_file().exists(),
        &paths.config_file().display().to_string(),
    );

    let config = Config::load(&paths).unwrap_or_default();
    healthy &= check(
        "api key",
        !config.llm.api_key.is_empty(),
        if config.llm.api_key.is_empty() {
            "set llm.apiKey in config.json"
        } else {
            "configured"
        },
    );

    let browser = config
        .browser
        .executable
        .clone()
        .or_else(edith_browser::launch::find_browser_binary);
    healthy &= check(
        "browser",
        browser.is_some(),
        browser.as_deref().unwrap_or("no Chrome/Chromium found"),
    );

    if healthy {
        println!("\nAll checks passed.");
        0
    } else {
        println!("\nSome checks failed.");
        1
    }
}
