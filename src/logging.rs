//! Diagnostic output through `tracing`
//!
//! The engine runs inside someone else's process, so it never installs a
//! subscriber unless diagnostics were asked for, and it never replaces one
//! the host already set up.

use tracing_subscriber::EnvFilter;

/// Install a stderr subscriber at `level` if diagnostics are enabled
///
/// `RUST_LOG` still narrows or widens the filter. Returns whether this call
/// installed the subscriber.
pub fn init(enabled: bool, level: tracing::Level) -> bool {
    if !enabled {
        return false;
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}
