//! WhisperingWinds: air-quality lookup, forecast and history backend.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod auth;
pub mod config;
pub mod engine;
pub mod provider;
pub mod server;
pub mod storage;
pub mod types;
