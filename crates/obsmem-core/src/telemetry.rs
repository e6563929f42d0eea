//! Tracing setup for obsmem binaries.
//!
//! Without `RUST_LOG`, only the obsmem crates log at the requested level;
//! everything else (the SurrealDB engine in particular) stays at `warn`.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const OBSMEM_TARGETS: &[&str] = &["obsmem", "obsmem_core", "obsmem_state"];

/// Filter directives used when `RUST_LOG` is unset
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    std::iter::once("warn".to_string())
        .chain(OBSMEM_TARGETS.iter().map(|target| format!("{target}={level}")))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber, writing to stderr.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing(json: bool, level: Level) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let plain = (!json).then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));
    let json = json.then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .json()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_scope_obsmem_crates() {
        assert_eq!(
            default_directives(Level::DEBUG),
            "warn,obsmem=debug,obsmem_core=debug,obsmem_state=debug"
        );
    }

    #[test]
    fn test_default_directives_parse() {
        for level in [Level::TRACE, Level::INFO, Level::ERROR] {
            assert!(EnvFilter::try_new(default_directives(level)).is_ok());
        }
    }

    #[test]
    fn test_second_init_reports_existing_subscriber() {
        init_tracing(false, Level::DEBUG);
        assert!(!init_tracing(true, Level::INFO));
    }
}
