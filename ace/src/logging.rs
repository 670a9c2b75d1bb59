//! Development-time tracing for the adaptation loops.
//!
//! What gets logged where:
//!
//! - `info`: phase, epoch and per-sample progress, interaction outcomes,
//!   applied deltas and deduplication results.
//! - `warn`: unparsable role responses being retried, evaluation retries,
//!   `close_task` failures, skipped delta operations, duplicate tags, and
//!   embedding failures that fall back to substring matching.
//! - `debug`: raw LLM responses with token counts, rendered prompt sizes, and
//!   the playbook snapshot after each curation.
//!
//! Role calls and per-task processing run inside spans carrying `task_id`
//! (and `step` for the generator). Nothing here is persisted; run results are
//! returned to the caller as reports.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset or invalid.
const DEFAULT_FILTER: &str = "warn";

/// Install the global subscriber: `RUST_LOG` filter, compact output on stderr.
///
/// # Example
/// ```bash
/// RUST_LOG=ace=debug cargo run -- playbook dedup playbook.json --ids api-00004
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
