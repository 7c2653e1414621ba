//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod approval;
pub mod budget;
pub mod commands;
pub mod diff;
pub mod errors;
pub mod feedback;
pub mod issue;
pub mod parser;
pub mod path;
pub mod plan;
pub mod report;
pub mod types;
