//! Tracing setup for binaries, demos and benches
//!
//! The library only emits events; installing a subscriber is up to the
//! program embedding it.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Returns false if a global subscriber was already set.
pub fn init() -> bool {
    init_with("info")
}

/// Like [`init`], with an explicit fallback filter.
pub fn init_with(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_reports_existing_subscriber() {
        init_with("warn");
        assert!(!init());
    }
}
