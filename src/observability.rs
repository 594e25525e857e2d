//! Tracing setup. Logs go to stderr so `--json` output on stdout stays clean.

use tracing_subscriber::{prelude::*, EnvFilter};

use crate::config::ObservabilityConfig;

/// Initialize tracing. `RUST_LOG` overrides `PORTGUARD_LOG_LEVEL`;
/// `PORTGUARD_QUIET=1` keeps only warnings.
pub fn init_tracing(verbose: bool) {
    let cfg = ObservabilityConfig::from_env();
    let level = if cfg.quiet {
        "portguard=warn".to_string()
    } else if verbose {
        "portguard=debug".to_string()
    } else {
        cfg.log_level.clone()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let _ = if cfg.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .try_init()
    };
}
