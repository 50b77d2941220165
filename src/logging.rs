//! Process-wide `tracing` setup.
//!
//! `RUST_LOG` sets the baseline; each `-v` raises this crate's own level on
//! top of it without making the HTTP stack chatty.

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,hyper=warn";

static INSTALLED: OnceCell<()> = OnceCell::new();

fn crate_directive(verbosity: u8) -> Option<&'static str> {
    match verbosity {
        0 => None,
        1 => Some("frame_playback=debug"),
        _ => Some("frame_playback=trace"),
    }
}

fn build_filter(verbosity: u8) -> EnvFilter {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    match crate_directive(verbosity).and_then(|d| d.parse().ok()) {
        Some(directive) => filter.add_directive(directive),
        None => filter,
    }
}

/// Install the global subscriber once; later calls keep the first setup.
pub fn init(verbosity: u8) {
    INSTALLED.get_or_init(|| {
        // Another subscriber may already be installed (tests); keep it.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(build_filter(verbosity))
            .with_target(verbosity > 0)
            .compact()
            .try_init();
    });
}
