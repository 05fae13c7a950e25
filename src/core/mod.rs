pub mod config;
pub mod context;
pub mod deploy;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod llm;
pub mod operator;
pub mod plan;
pub mod registry;
pub mod supervisor;
pub mod terminal;
