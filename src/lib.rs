//! ThumbCache - Two-tier thumbnail cache
//!
//! A bounded in-memory LRU in front of a persistent, schema-versioned,
//! optionally compressed SQLite store, with synchronous and queued
//! asynchronous access and orphan/expiry maintenance.

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod pixels;

pub use app::run_app;
