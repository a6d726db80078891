mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "edith")]
#[command(about = "LLM-driven browser automation agent", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration and create the data directories
    Onboard {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Show configuration status
    Status,

    /// Check the environment: config, API key, browser binary
    Doctor,

    /// Run the browser agent on a task
    Run {
        /// The task, e.g. "Search YouTube for VS Code tutorials"
        #[arg(short, long)]
        prompt: String,

        /// Continue an existing conversation
        #[arg(short, long)]
        conversation: Option<String>,
    },

    /// Run a multi-tab research task
    Research {
        /// The research question, e.g. "Compare iPhone 16 prices on three sites"
        #[arg(short, long)]
        prompt: String,

        /// Continue an existing conversation
        #[arg(short, long)]
        conversation: Option<String>,
    },

    /// Chat without tools
    Chat {
        #[arg(short, long)]
        prompt: String,

        /// Continue an existing conversation
        #[arg(short, long)]
        conversation: Option<String>,
    },

    /// List stored conversations
    Conversations,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let exit_code = match cli.command {
        Commands::Onboard { force } => commands::onboard::run(force),
        Commands::Status => commands::status::run(),
        Commands::Doctor => commands::doctor::run(),
        Commands::Run {
            prompt,
            conversation,
        } => commands::run::agent(&prompt, conversation).await,
        Commands::Research {
            prompt,
            conversation,
        } => commands::run::research(&prompt, conversation).await,
        Commands::Chat {
            prompt,
            conversation,
        } => commands::run::chat(&prompt, conversation).await,
        Commands::Conversations => commands::status::conversations(),
    };

    std::process::exit(exit_code);
}
