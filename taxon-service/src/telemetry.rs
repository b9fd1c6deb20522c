//! Tracing subscriber initialization.

use taxon_core::{ConfigError, LogFormat, TaxonConfig, TaxonResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `config.log_filter` is used.
/// Call once at startup. A second call fails with
/// [`ConfigError::TelemetryInit`].
pub fn init_tracing(config: &TaxonConfig) -> TaxonResult<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_filter).map_err(|e| ConfigError::InvalidValue {
            field: "log_filter".to_string(),
            value: config.log_filter.clone(),
            reason: e.to_string(),
        })?,
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    result.map_err(|e| ConfigError::TelemetryInit {
        reason: e.to_string(),
    })?;

    tracing::info!(
        log_filter = %config.log_filter,
        log_format = ?config.log_format,
        "Telemetry initialized"
    );
    Ok(())
}
