use edith_core::{Config, Paths};

pub fn run(force: bool) -> i32 {
    let paths = Paths::new();

    if paths.config_file().exists() && !force {
        println!(
            "Config already exists at {}. Use --force to overwrite.",
            paths.config_file().display()
        );
        return 1;
    }

    if let Err(e) = paths.ensure_dirs() {
        eprintln!("Failed to create {}: {}", paths.base.display(), e);
        return 1;
    }

    let config = Config::default();
    if let Err(e) = config.save(&paths) {
        eprintln!("Failed to write config: {}", e);
        return 1;
    }

    println!("Wrote {}", paths.config_file().display());
    println!();
    println!("Next steps:");
    println!("  1. Set llm.apiKey (any OpenAI-compatible endpoint works; adjust llm.apiBase and llm.model to match).");
    println!("  2. Run `edith doctor` to verify the setup.");
    println!("  3. Try: edith run --prompt \"Search YouTube for VS Code tutorials\"");
    0
}
