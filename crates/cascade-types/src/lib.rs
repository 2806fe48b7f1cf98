//! Shared domain types for Cascade.
//!
//! This crate contains the core domain types used across the Cascade
//! workflow engine: the workflow definition IR, step result types, LLM
//! request/response types, validation configuration, and run configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod llm;
pub mod result;
pub mod validation;
pub mod workflow;
