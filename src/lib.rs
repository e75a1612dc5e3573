//! Scheduled multi-source tech news digest.
//!
//! Source adapters fetch candidate items concurrently, the deduplicator
//! merges them by canonical URL and links related stories, a summarizer
//! writes one summary per item, and everything lands in SQLite before the
//! digest is delivered.

pub mod ai;
pub mod batch;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod models;
pub mod services;
pub mod sources;

pub use config::Config;
pub use error::{AppError, Result};
