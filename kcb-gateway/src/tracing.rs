//! Provide tracing, tailored to the gateway daemon.
//!
//! Call [`init_journald_or_stdout`] once at startup to install a subscriber.
//! Elsewhere, `use crate::tracing::prelude::*` brings in the `trace!()`,
//! `debug!()`, `info!()`, `warn!()`, and `error!()` macros.

use std::env;
use time::{macros::format_description, OffsetDateTime};
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

/// Name the daemon logs under in the journal.
const SYSLOG_IDENTIFIER: &str = "kcb-gatewayd";

/// Initialize logging.
///
/// Under systemd (`JOURNAL_STREAM` set) events go to journald; otherwise,
/// or if the journal is unreachable, to stdout.
pub fn init_journald_or_stdout() {
    if env::var("JOURNAL_STREAM").is_err() {
        use_stdout();
        return;
    }

    match tracing_journald::layer() {
        Ok(layer) => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(layer.with_syslog_identifier(SYSLOG_IDENTIFIER.to_string()))
                .init();
        }
        Err(e) => {
            use_stdout();
            error!(error = %e, "Failed to initialize journald logging, using stdout.");
        }
    }
}

// Filter according to RUST_LOG, defaulting to INFO rather than ERROR.
fn env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy()
}

fn use_stdout() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_timer(LocalTimer))
        .init();
}

// Timestamps in local time to the nearest second, instead of the default
// long UTC form.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let stamp = now
            .format(format_description!("[hour]:[minute]:[second]"))
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{stamp}")
    }
}
