//! Tracing setup.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "ember=info";

/// Install a global fmt subscriber writing to stderr.
///
/// `RUST_LOG` overrides `default_filter`. Stdout stays free for the JSON
/// protocol. Returns `false` if a global subscriber was already set.
pub fn init_tracing(default_filter: &str) -> bool {
    let from_env = std::env::var("RUST_LOG").ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(resolve_filter(from_env.as_deref(), default_filter))
        .try_init()
        .is_ok()
}

/// The `RUST_LOG` directives when present and valid, else `default_filter`.
fn resolve_filter(from_env: Option<&str>, default_filter: &str) -> EnvFilter {
    from_env
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default_filter))
}
