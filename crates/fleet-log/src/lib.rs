// ABOUTME: Shared logging setup for the fleet supervisor binary
// ABOUTME: init() for the INFO default, init_with_level() when the CLI asks for more

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Standard logging to stderr. Default: INFO level, RUST_LOG override.
pub fn init() {
    init_with_level(Level::INFO);
}

/// Logging to stderr with an explicit default level. RUST_LOG directives
/// still apply on top of it.
///
/// Worker output is forwarded on stdout/stderr as plain prefixed lines, so
/// the supervisor's own records keep their target to stay distinguishable.
pub fn init_with_level(level: Level) {
    tracing_subscriber::fmt()
        .with_env_filter(filter_for(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Build the env filter used by the init functions.
fn filter_for(level: Level) -> EnvFilter {
    EnvFilter::from_default_env().add_directive(level.into())
}

/// Map a `-v` count from the CLI onto a tracing level.
pub fn level_from_verbosity(verbose: u8) -> Level {
    match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}
