//! Strand Engine Library
//!
//! This library provides the core functionality of the Strand agent task
//! runtime: the workflow orchestrator, the directive execution engine, and
//! the retrieval ranker. It is used by both the main binary and
//! integration tests.

/// Configuration management module
pub mod config;

/// Capability registry module
pub mod capability;

/// Directive parsing, execution, and scheduling
pub mod directive;

/// Model transport abstraction layer
pub mod llm;

/// Retrieval ranking module
pub mod retrieval;

/// Persistence boundary module
pub mod store;

/// Telemetry and observability
pub mod telemetry;

/// Workflow orchestration module
pub mod workflow;

/// CLI interface module
pub mod cli;
