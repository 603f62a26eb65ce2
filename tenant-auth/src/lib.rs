#![allow(clippy::missing_docs_in_private_items)]

pub mod manager;
pub mod scheduler;

pub use manager::StackCredentialManager;
pub use scheduler::{run_refresh_loop, sweep_once, SweepReport};
