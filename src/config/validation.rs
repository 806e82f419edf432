use tracing_subscriber::EnvFilter;

use crate::config::models::{
    AppConfig, LoggingConfig, MiddlewareConfig, RoutingConfig, WebSocketConfig,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

fn invalid(field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidField {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Application configuration validator
pub struct AppConfigValidator;

impl AppConfigValidator {
    /// Validate the entire configuration, collecting every problem.
    pub fn validate(config: &AppConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        errors.extend(Self::validate_routing(&config.routing));
        errors.extend(Self::validate_middleware(&config.middleware));
        errors.extend(Self::validate_websocket(&config.websocket));
        errors.extend(Self::validate_logging(&config.logging));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_routing(config: &RoutingConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !matches!(config.redirect_status, 301 | 302 | 303 | 307 | 308) {
            errors.push(invalid(
                "routing.redirect_status",
                format!(
                    "{} is not a redirect status (expected 301, 302, 303, 307 or 308)",
                    config.redirect_status
                ),
            ));
        }
        errors
    }

    fn validate_middleware(config: &MiddlewareConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if config.queue_capacity == 0 {
            errors.push(invalid(
                "middleware.queue_capacity",
                "Queue capacity must be greater than zero",
            ));
        }
        errors
    }

    fn validate_websocket(config: &WebSocketConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if !(1000..=4999).contains(&config.not_found_close_code) {
            errors.push(invalid(
                "websocket.not_found_close_code",
                format!(
                    "{} is outside the websocket close code range 1000-4999",
                    config.not_found_close_code
                ),
            ));
        }
        errors
    }

    fn validate_logging(config: &LoggingConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if let Err(e) = EnvFilter::try_new(&config.level) {
            errors.push(invalid("logging.level", format!("Invalid filter directive: {e}")));
        }
        errors
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfigValidator::validate(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_single_error_is_reported_verbatim() {
        let mut config = AppConfig::default();
        config.middleware.queue_capacity = 0;
        let err = AppConfigValidator::validate(&config).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: Invalid field 'middleware.queue_capacity': Queue capacity must be greater than zero"
        );
    }

    #[test]
    fn test_multiple_errors_are_collected() {
        let mut config = AppConfig::default();
        config.routing.redirect_status = 200;
        config.websocket.not_found_close_code = 999;
        config.logging.level = "trellis=verbose".to_string();
        let err = AppConfigValidator::validate(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Found 3 validation errors"));
        assert!(message.contains("routing.redirect_status"));
        assert!(message.contains("websocket.not_found_close_code"));
        assert!(message.contains("logging.level"));
    }
}
