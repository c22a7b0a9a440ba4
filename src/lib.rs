//! Judging core
//!
//! Takes one submission plus its test data, drives compilation and execution
//! through a remote sandbox service, and reports progress and the final
//! verdict as events.

pub mod components;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod judge;
