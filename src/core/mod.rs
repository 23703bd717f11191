pub mod audit;
pub mod config;
pub mod dedup;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod run_state;
