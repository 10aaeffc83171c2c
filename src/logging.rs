use tracing_subscriber::{EnvFilter, fmt};

/// Initialize tracing for the CLI.
///
/// Logs go to stderr so they never interleave with command output on stdout. Default is
/// `warn`; override with `RUST_LOG` (e.g. `RUST_LOG=tdmusic=debug`).
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
