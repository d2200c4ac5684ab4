//! API route modules.

pub mod jobs;
pub mod webhooks;
