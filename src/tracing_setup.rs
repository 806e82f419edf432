use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::models::LoggingConfig;

/// Initialize structured logging with JSON output
pub fn init_tracing() -> Result<()> {
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init()
        .wrap_err("Failed to install JSON tracing subscriber")?;

    tracing::info!("Trellis structured logging initialized");
    Ok(())
}

/// Initialize console-friendly logging for development
pub fn init_console_tracing() -> Result<()> {
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init()
        .wrap_err("Failed to install console tracing subscriber")?;

    tracing::info!("Trellis console logging initialized");
    Ok(())
}

/// Initialize tracing with custom configuration.
///
/// `RUST_LOG` wins over `level` when set.
pub fn init_tracing_with_config(level: &str, json_format: bool, include_spans: bool) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let installed = if json_format {
        Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(include_spans)
                    .with_span_list(include_spans),
            )
            .try_init()
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init()
    };
    installed.wrap_err("Failed to install tracing subscriber")?;

    tracing::info!(level = %level, json = json_format, spans = include_spans, "Trellis logging initialized");
    Ok(())
}

/// Initialize tracing from the `[logging]` configuration section.
pub fn init_tracing_from_config(config: &LoggingConfig) -> Result<()> {
    init_tracing_with_config(&config.level, config.json, config.include_spans)
}

/// Span covering one connection handled by an application.
pub fn create_request_span(kind: &str, method: &str, path: &str, request_id: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        scope.kind = kind,
        http.method = method,
        http.path = path,
        request.id = request_id,
        http.status_code = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}

/// Span covering one websocket session.
pub fn create_websocket_span(connection_id: &str, path: &str) -> tracing::Span {
    tracing::info_span!(
        "websocket",
        connection.id = connection_id,
        ws.path = path,
        close_code = tracing::field::Empty,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_rejected() {
        let result = init_tracing_with_config("trellis=verbose", false, false);
        if std::env::var("RUST_LOG").is_err() {
            assert!(result.is_err());
        }
    }

    #[test]
    fn test_create_request_span() {
        let span = create_request_span("http", "GET", "/api/test", "req-123");
        if let Some(metadata) = span.metadata() {
            assert_eq!(metadata.name(), "request");
        }
    }

    #[test]
    fn test_create_websocket_span() {
        let span = create_websocket_span("6a1f", "/ws");
        if let Some(metadata) = span.metadata() {
            assert_eq!(metadata.name(), "websocket");
        }
    }
}
