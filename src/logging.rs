//! Subscriber setup for binaries built on this crate.
//!
//! Logs go to stderr so stdout stays clean for command output.
//! `RUST_LOG` picks the filter unless `verbose` is set;
//! `DEVLOG_LOG_FORMAT=json` switches to one JSON object per line.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FORMAT_ENV: &str = "DEVLOG_LOG_FORMAT";

const DEFAULT_FILTER: &str = "devlog_storage=info,devlog=info,warn";
const VERBOSE_FILTER: &str = "devlog_storage=debug,devlog=debug,info";

fn filter(verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new(VERBOSE_FILTER);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn json_requested(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("json"))
}

/// Installs the global subscriber. Fails when one is already installed.
pub fn init(verbose: bool) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(filter(verbose));
    let format = std::env::var(LOG_FORMAT_ENV).ok();
    if json_requested(format.as_deref()) {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()?;
    }
    Ok(())
}
