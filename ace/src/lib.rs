//! Agentic context engineering: a playbook that learns from its own runs.
//!
//! An adapter drives three LLM roles against a task environment. The
//! generator solves tasks with the playbook in its prompt, the reflector
//! critiques the resulting trajectory, and the curator turns that critique
//! into delta operations applied to the playbook.
//!
//! - **[`core`]**: Pure data and logic (playbook, deltas, trajectories,
//!   response parsing, scoring). No I/O.
//! - **[`io`]**: Seams to the outside world (LLM client, environment,
//!   embeddings, config, playbook files, prompt templates).
//! - **[`roles`]**: Generator, reflector and curator wrappers with retrying
//!   structured output.
//! - **[`adapter`]**: Offline, online and baseline adaptation loops.

pub mod adapter;
pub mod core;
pub mod dedup;
pub mod io;
pub mod logging;
pub mod roles;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
