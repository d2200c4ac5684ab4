pub mod api;
pub mod app;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod db;
pub mod dispatch;
pub mod events;
pub mod global;
pub mod pipeline;
pub mod queue;
pub mod recording;
