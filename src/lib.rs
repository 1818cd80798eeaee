pub mod agent;
pub mod cli;
pub mod config;
pub mod llm;
pub mod mcp;
pub mod sessions;
pub mod tools;
pub mod types;
pub mod ui;

pub use cli::Cli;
pub use config::AppConfig;
