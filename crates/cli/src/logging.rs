//! Tracing subscriber for the `filecache` binary.
//!
//! Filter priority, highest first: `FILECACHE_LOG`, `RUST_LOG`, then the
//! `-v`/`-q` flags (debug / error), defaulting to warnings. Logs go to
//! stderr; command output goes to stdout.

use std::io::IsTerminal;
use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

const LOG_ENV: &str = "FILECACHE_LOG";
const TARGET_PREFIX: &str = "filecache";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    /// `-v` wins over `-q`.
    pub const fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            Self::Verbose
        } else if quiet {
            Self::Quiet
        } else {
            Self::Normal
        }
    }

    pub const fn default_level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::WARN,
            Self::Verbose => Level::DEBUG,
        }
    }
}

/// Install the global subscriber. Call once, before loading configuration.
pub fn init(verbosity: Verbosity, no_color: bool) {
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(!no_color && std::io::stderr().is_terminal())
        .with_target(true);
    let registry = tracing_subscriber::registry().with(env_filter(verbosity));
    if verbosity == Verbosity::Verbose {
        registry.with(layer.with_timer(fmt::time::uptime())).init();
    } else {
        registry.with(layer.without_time().compact()).init();
    }
}

fn env_filter(verbosity: Verbosity) -> EnvFilter {
    // An unparseable FILECACHE_LOG falls through to RUST_LOG.
    if let Ok(directives) = std::env::var(LOG_ENV)
        && let Ok(filter) = EnvFilter::try_new(&directives)
    {
        return filter;
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = verbosity.default_level();
    let directive = match verbosity {
        Verbosity::Verbose => format!("{level},{TARGET_PREFIX}=debug"),
        Verbosity::Normal | Verbosity::Quiet => level.to_string(),
    };
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}
