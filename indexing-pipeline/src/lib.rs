#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod normalizer;
pub mod pipeline;
pub mod webhook;

pub use normalizer::{normalize_entry, NormalizedDocument};
pub use pipeline::{IndexingConfig, IndexingError, IndexingPipeline, IndexingSummary};
pub use webhook::{WebhookAction, WebhookEvent};
