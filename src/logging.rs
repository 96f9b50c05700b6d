//! Logging setup for the castplay binary
//!
//! Logs go to stderr so they never mix with command output on stdout.
//! The level can be controlled via the `RUST_LOG` environment variable.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter per `-v` count
fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "castplay=info,warn",
        1 => "castplay=debug,info",
        _ => "castplay=trace,debug",
    }
}

/// Initialize the logging system.
///
/// `RUST_LOG` wins over `-v`. In quiet mode only warnings are shown.
pub fn init_logging(verbose: u8, quiet: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if quiet {
            EnvFilter::new("warn")
        } else {
            EnvFilter::new(default_filter(verbose))
        }
    });

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbose > 0)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    tracing::debug!(verbose, "logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_levels() {
        assert_eq!(default_filter(0), "castplay=info,warn");
        assert_eq!(default_filter(1), "castplay=debug,info");
        assert_eq!(default_filter(7), "castplay=trace,debug");
    }
}
