pub mod indexing;
pub mod liveness;
pub mod oauth;
pub mod readiness;
pub mod search;
pub mod webhook;
