//! JSON log lines filtered through `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Install the global subscriber with [`DEFAULT_FILTER`].
///
/// Repeat calls are no-ops, so tests can call it freely.
pub fn init() {
    init_with(DEFAULT_FILTER);
}

/// Install the global subscriber, falling back to `default_filter`.
///
/// Returns `false` when a subscriber was already installed.
pub fn init_with(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        init_with("debug");
        assert!(!init_with("debug"));
    }
}
