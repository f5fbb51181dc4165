pub mod config;
mod config_env;
pub mod history;
pub mod llm;
pub mod models;
