//! logging.rs  –  progress narration
//! =================================
//! Every load stage reports through `tracing`: `info` normally, `debug`
//! when the caller asked for silence.  Nothing here installs a subscriber
//! unless [`init`] is called.

use std::time::Instant;

use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Error, Result};

/// Install a `fmt` subscriber.  `RUST_LOG` wins over `default_filter`.
pub fn init(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| Error::Logging(e.to_string()))?;
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}

/// One timed stage of a load ("reading data", "building tensor", ...).
pub(crate) struct Stage {
    label: &'static str,
    silent: bool,
    start: Instant,
}

impl Stage {
    pub(crate) fn start(label: &'static str, silent: bool) -> Self {
        if silent {
            debug!("{} ...", label);
        } else {
            info!("{} ...", label);
        }
        Self { label, silent, start: Instant::now() }
    }

    pub(crate) fn finish(self) {
        let seconds = self.start.elapsed().as_secs_f64();
        if self.silent {
            debug!(stage = self.label, seconds, "done");
        } else {
            info!(stage = self.label, seconds, "done");
        }
    }
}
