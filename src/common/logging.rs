//! Structured logging setup.
//!
//! Library code only emits `tracing` events; installing a subscriber is the
//! binary's job.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install a compact terminal subscriber.
///
/// `RUST_LOG` overrides the default filter, which is `info` (or `debug` when
/// `verbose` is set). Calling this twice is harmless: the second call leaves
/// the first subscriber in place.
pub fn init_logging(verbose: bool) {
    let filter_str = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_str));

    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(terminal_layer)
        .try_init();
}
