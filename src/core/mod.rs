//! Core launch engine module
//!
//! Orchestrates reader construction, experiment serialization, cluster
//! tuning and batch submission for a single run.

mod engine;

pub use engine::*;
