pub mod chat;
pub mod config;
pub mod llm;
pub mod utils;
pub mod vtube;
