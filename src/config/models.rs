//! Configuration data structures for Trellis.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files.
//! Every section has defaults, so an empty file yields a working router.
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_redirect_status() -> u16 {
    308
}

fn default_queue_capacity() -> usize {
    16
}

fn default_close_code() -> u16 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Router behaviour.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RoutingConfig {
    /// Redirect to the path with the trailing slash toggled when only that
    /// variant matches.
    #[serde(default = "default_true")]
    pub redirect_trailing_slash: bool,
    /// Status used for trailing-slash redirects.
    #[serde(default = "default_redirect_status")]
    pub redirect_status: u16,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            redirect_trailing_slash: true,
            redirect_status: default_redirect_status(),
        }
    }
}

/// Streaming middleware adapter settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MiddlewareConfig {
    /// Messages buffered between the inner app and the dispatch function.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Close code sent to websocket sessions no route matched.
    #[serde(default = "default_close_code")]
    pub not_found_close_code: u16,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            not_found_close_code: default_close_code(),
        }
    }
}

/// Logging output settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive (overridden by `RUST_LOG`).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// JSON lines instead of human-readable output.
    pub json: bool,
    /// Include span enter/exit events.
    pub include_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            include_spans: false,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub debug: bool,
    pub routing: RoutingConfig,
    pub middleware: MiddlewareConfig,
    pub websocket: WebSocketConfig,
    pub logging: LoggingConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.routing.redirect_trailing_slash);
        assert_eq!(config.routing.redirect_status, 308);
        assert_eq!(config.middleware.queue_capacity, 16);
        assert_eq!(config.websocket.not_found_close_code, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"routing": {"redirect_status": 301}}"#).unwrap();
        assert_eq!(config.routing.redirect_status, 301);
        assert!(config.routing.redirect_trailing_slash);
        assert_eq!(config.middleware, MiddlewareConfig::default());
    }
}
