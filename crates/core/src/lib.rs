pub mod command;
pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use command::{AgentCommand, AgentEvent, CommandAck};
pub use config::Config;
pub use error::{Error, Result};
pub use paths::Paths;
