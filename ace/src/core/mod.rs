//! Deterministic, pure logic shared by the adapters.
//!
//! Core modules are free of I/O side effects. They operate on in-memory data
//! structures and return deterministic outputs suitable for tests.

pub mod delta;
pub mod evaluation;
pub mod parse;
pub mod playbook;
pub mod trajectory;
pub mod types;
