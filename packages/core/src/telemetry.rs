//! Logging setup for hosts and tests
//!
//! The library itself only emits `tracing` events. Hosts without their own
//! subscriber can call [`init_tracing`] once at startup.

/// Install a `fmt` subscriber filtered by `RUST_LOG` (falls back to
/// `default_directive`, e.g. `"info"` or `"orgtree_core=debug"`)
///
/// Returns `false` if a global subscriber was already installed, which makes
/// it safe to call from several tests.
pub fn init_tracing(default_directive: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive)),
        )
        .with_test_writer()
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        init_tracing("debug");
        assert!(!init_tracing("debug"));
    }
}
