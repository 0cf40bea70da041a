use std::net::SocketAddr;

use hyper::{
    Uri,
    header::{HeaderName, HeaderValue},
};

use crate::{
    config::models::{Definition, GatewayConfig, HeaderActions},
    core::balancer::BalancerFactory,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator.
///
/// Problems are reported, never enforced: the register still receives every
/// active definition and applies its own rules at registration time.
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        for (index, definition) in config.apis.iter().enumerate() {
            if let Err(mut definition_errors) = Self::validate_definition(index, definition) {
                errors.append(&mut definition_errors);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_definition(
        index: usize,
        definition: &Definition,
    ) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let label = if definition.name.is_empty() {
            format!("apis[{index}]")
        } else {
            format!("api '{}'", definition.name)
        };

        if definition.listen_path.is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("{label} listen_path"),
            });
        } else if !definition.listen_path.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("{label} listen_path"),
                message: "Listen paths must start with '/'".to_string(),
            });
        }

        if let Err(e) = BalancerFactory::create(&definition.upstreams.balancing) {
            errors.push(ValidationError::InvalidField {
                field: format!("{label} upstreams.balancing"),
                message: e.to_string(),
            });
        }

        if definition.upstreams.targets.is_empty() {
            errors.push(ValidationError::InvalidField {
                field: format!("{label} upstreams.targets"),
                message: "At least one upstream target is required".to_string(),
            });
        }

        for (i, target) in definition.upstreams.targets.iter().enumerate() {
            let valid = target
                .target
                .parse::<Uri>()
                .map(|uri| uri.scheme().is_some() && uri.authority().is_some())
                .unwrap_or(false);
            if !valid {
                errors.push(ValidationError::InvalidField {
                    field: format!("{label} upstreams.targets[{i}]"),
                    message: format!("'{}' is not an absolute http(s) URL", target.target),
                });
            }
        }

        Self::validate_header_actions(
            &label,
            "request_headers",
            &definition.request_headers,
            &mut errors,
        );
        Self::validate_header_actions(
            &label,
            "response_headers",
            &definition.response_headers,
            &mut errors,
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_header_actions(
        label: &str,
        field: &str,
        actions: &HeaderActions,
        errors: &mut Vec<ValidationError>,
    ) {
        let names = actions.remove.iter().chain(actions.add.keys());
        for name in names.filter(|n| HeaderName::from_bytes(n.as_bytes()).is_err()) {
            errors.push(ValidationError::InvalidField {
                field: format!("{label} {field}"),
                message: format!("'{name}' is not a valid header name"),
            });
        }
        for (name, value) in &actions.add {
            if HeaderValue::from_str(value).is_err() {
                errors.push(ValidationError::InvalidField {
                    field: format!("{label} {field}.add.{name}"),
                    message: "Header values must be visible ASCII".to_string(),
                });
            }
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        errors
            .iter()
            .map(|e| format!("  - {e}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
