pub mod best_effort;
pub mod config;
pub mod embedding;
