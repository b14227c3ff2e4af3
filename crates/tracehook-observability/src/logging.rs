//! Diagnostic logging
//!
//! Telemetry faults are silent by default. With the debug flag set, warnings
//! and debug lines from the engine go to stderr so they never mix with the
//! wrapped agent's primary output. `RUST_LOG` overrides both defaults.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

const ENGINE_CRATES: &[&str] = &[
    "tracehook_pii",
    "tracehook_core",
    "tracehook_observability",
    "tracehook_session",
];

/// Filter directives used when `RUST_LOG` is not set
pub fn default_directives(debug: bool) -> String {
    if !debug {
        return "off".to_string();
    }
    let mut directives = vec!["warn".to_string()];
    directives.extend(ENGINE_CRATES.iter().map(|krate| format!("{krate}=debug")));
    directives.join(",")
}

/// Install the global stderr subscriber.
///
/// Returns false when a subscriber was already installed, in which case the
/// existing one is kept.
pub fn init_logging(debug: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(debug)));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    ::tracing::subscriber::set_global_default(subscriber).is_ok()
}
