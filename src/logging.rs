use std::sync::Once;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use tracing::Level;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();
static STARTED: Lazy<Instant> = Lazy::new(Instant::now);

/// Install the global subscriber. `RUST_LOG` wins; otherwise `-v` raises
/// this crate from `info` to `debug` or `trace`.
pub fn init(verbosity: u8) {
    Lazy::force(&STARTED);
    INIT.call_once(|| {
        let level = match verbosity {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("info,slide_frame={level}"))
        });
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_level(true)
            .init();
    });
}

/// Time since logging was initialized (process start, in practice).
#[must_use]
pub fn uptime() -> Duration {
    STARTED.elapsed()
}
