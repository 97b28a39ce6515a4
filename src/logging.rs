use std::sync::Once;

use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

/// Installs a global `tracing` subscriber that renders progress spans.
///
/// Reads the `EDA_LOG` environment variable (e.g. `EDA_LOG=eda=debug`) and
/// falls back to `eda=info`. Calling it more than once is harmless, and so
/// is calling it when the host already installed its own subscriber.
pub fn init_logging() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_env("EDA_LOG").unwrap_or_else(|_| EnvFilter::new("eda=info"));
        let indicatif = IndicatifLayer::new();

        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_writer(indicatif.get_stderr_writer()))
            .with(indicatif)
            .with(filter)
            .try_init();
    });
}
