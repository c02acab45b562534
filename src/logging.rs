//! Logging and tracing infrastructure for bincfg.
//!
//! This module provides structured logging using the tracing crate. The
//! subscriber is installed once per process; every component of the
//! pipeline logs through the `tracing` macros with instruction addresses
//! attached as fields.

use std::sync::Once;
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

fn init_with_filter(default_filter: &str) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    });
}

/// Initialize the global tracing subscriber.
///
/// This should be called once at program startup.
/// Subsequent calls are ignored.
pub fn init_tracing() {
    init_with_filter("info");
}

/// Initialize the subscriber with everything below ERROR filtered out.
///
/// Used by the CLI's `--suppress-log` switch; RUST_LOG still overrides.
pub fn init_tracing_quiet() {
    init_with_filter("error");
}
