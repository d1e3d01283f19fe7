use crate::config::models::{AuthType, GatewayConfig, UpstreamConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if config.server.port == 0 {
            errors.push(ValidationError::InvalidField {
                field: "server.port".to_string(),
                message: "Port must be between 1 and 65535".to_string(),
            });
        }

        Self::validate_auth(config, &mut errors);
        Self::validate_rate_limit(config, &mut errors);

        for (name, upstream) in &config.proxy.upstreams {
            Self::validate_upstream(name, upstream, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_auth(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
        let auth = &config.auth;

        if matches!(auth.auth_type, AuthType::Jwt | AuthType::Both) && auth.jwt_secret.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "auth.jwt_secret (required when auth_type is jwt or both)".to_string(),
            });
        }

        if matches!(auth.auth_type, AuthType::Oidc | AuthType::Both) && auth.oidc_issuer.is_empty()
        {
            errors.push(ValidationError::MissingField {
                field: "auth.oidc_issuer (required when auth_type is oidc or both)".to_string(),
            });
        }
    }

    fn validate_rate_limit(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
        let rate_limit = &config.rate_limit;
        if !rate_limit.enabled {
            return;
        }

        if rate_limit.bucket_size <= 0 {
            errors.push(ValidationError::InvalidField {
                field: "rate_limit.bucket_size".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if rate_limit.refill_rate <= 0 {
            errors.push(ValidationError::InvalidField {
                field: "rate_limit.refill_rate".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if rate_limit.window_size_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "rate_limit.window_size_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }
    }

    fn validate_upstream(name: &str, upstream: &UpstreamConfig, errors: &mut Vec<ValidationError>) {
        if upstream.urls.is_empty() {
            errors.push(ValidationError::InvalidField {
                field: format!("proxy.upstreams.{name}.urls"),
                message: "Upstream groups must have at least one URL".to_string(),
            });
        }

        for url in &upstream.urls {
            let scheme = url
                .parse::<hyper::Uri>()
                .ok()
                .and_then(|uri| uri.scheme_str().map(str::to_string));
            if !matches!(scheme.as_deref(), Some("http") | Some("https")) {
                errors.push(ValidationError::InvalidField {
                    field: format!("proxy.upstreams.{name}.urls"),
                    message: format!("'{url}' is not an absolute http/https URL"),
                });
            }
        }

        if upstream.weight == 0 {
            errors.push(ValidationError::InvalidField {
                field: format!("proxy.upstreams.{name}.weight"),
                message: "Weight must be at least 1".to_string(),
            });
        }

        if let Some(health_check) = &upstream.health_check {
            if !health_check.path.starts_with('/') {
                errors.push(ValidationError::InvalidField {
                    field: format!("proxy.upstreams.{name}.health_check.path"),
                    message: "Probe paths must start with '/'".to_string(),
                });
            }
            if health_check.interval_secs == 0 {
                errors.push(ValidationError::InvalidField {
                    field: format!("proxy.upstreams.{name}.health_check.interval_secs"),
                    message: "Probe interval must be greater than 0".to_string(),
                });
            }
        }
    }

    /// Format multiple validation errors into a readable message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        let error_messages: Vec<String> = errors.iter().map(|e| format!("  - {e}")).collect();
        format!(
            "Found {} configuration error(s):\n{}",
            errors.len(),
            error_messages.join("\n")
        )
    }
}
