//! Configuration validation with detailed error reporting.
//!
//! The [`validate`] function checks a parsed [`Config`] for structural
//! errors such as an empty backend pool, duplicate ids, unroutable hosts,
//! zero ports, zero or oversized weights, backend ids that cannot be
//! carried in the affinity cookie, and unusable health-check settings.
//! Returns every [`ValidationError`] found, with per-field suggestions.

use std::collections::HashSet;

use axum::http::StatusCode;

use super::model::Config;
use crate::error::ValidationError;

/// Characters that may not appear in a cookie name (RFC 6265 token).
const COOKIE_SEPARATORS: &[char] = &[
    '(', ')', '<', '>', '@', ',', ';', ':', '\\', '"', '/', '[', ']', '?', '=', '{', '}',
];

/// Upper bound on a backend weight.
pub const MAX_WEIGHT: u32 = 10_000;

/// Validate a backend host. Returns `Ok(())` or a human-readable error.
pub fn validate_host(host: &str) -> Result<(), String> {
    if host.is_empty() {
        return Err("host cannot be empty".into());
    }
    if host.contains("://") {
        return Err(format!("'{host}' looks like a URL, expected a bare host"));
    }
    url::Host::parse(host)
        .map(|_| ())
        .map_err(|_| format!("'{host}' is not a valid host name or IP address"))
}

/// Validate a value carried in the affinity cookie (RFC 6265 cookie-octet).
pub fn validate_cookie_value(value: &str) -> Result<(), String> {
    match value
        .chars()
        .find(|&c| !c.is_ascii_graphic() || matches!(c, '"' | ',' | ';' | '\\'))
    {
        Some(bad) => Err(format!(
            "'{value}' contains {bad:?}, which cannot appear in a cookie value"
        )),
        None => Ok(()),
    }
}

/// Validate a cookie name. Returns `Ok(())` or a human-readable error.
pub fn validate_cookie_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("cookie name cannot be empty".into());
    }
    if let Some(bad) = name
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || COOKIE_SEPARATORS.contains(c))
    {
        return Err(format!("cookie name contains invalid character '{bad}'"));
    }
    Ok(())
}

fn error(scope: impl Into<String>, field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError {
        scope: scope.into(),
        field: field.into(),
        message: message.into(),
        suggestion: None,
    }
}

pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let health = &config.health_check;
    if health.interval_ms == 0 {
        errors.push(error("health_check", "interval_ms", "must be greater than zero"));
    }
    if health.timeout_ms == 0 {
        errors.push(error("health_check", "timeout_ms", "must be greater than zero"));
    }
    if !health.path.starts_with('/') {
        errors.push(ValidationError {
            suggestion: Some(format!("did you mean '/{}'?", health.path)),
            ..error("health_check", "path", "path must start with '/'")
        });
    }
    if StatusCode::from_u16(health.expected_status).is_err() {
        errors.push(error(
            "health_check",
            "expected_status",
            format!("{} is not a valid HTTP status code", health.expected_status),
        ));
    }

    if config.affinity.enabled {
        if let Err(msg) = validate_cookie_name(&config.affinity.cookie_name) {
            errors.push(error("affinity", "cookie_name", msg));
        }
    }

    if config.forward.timeout_ms == 0 {
        errors.push(error("forward", "timeout_ms", "must be greater than zero"));
    }

    if config.backends.is_empty() {
        errors.push(error(
            "(root)",
            "backends",
            "at least one backend must be defined",
        ));
        return Err(errors);
    }

    let mut seen_ids = HashSet::new();

    for (i, backend) in config.backends.iter().enumerate() {
        let scope = if backend.id.is_empty() {
            format!("backends[{i}]")
        } else {
            format!("backend {}", backend.id)
        };

        if backend.id.trim().is_empty() {
            errors.push(error(&scope, "id", "id cannot be empty"));
        } else if !seen_ids.insert(backend.id.as_str()) {
            errors.push(error(&scope, "id", "duplicate backend id"));
        } else if config.affinity.enabled {
            if let Err(msg) = validate_cookie_value(&backend.id) {
                errors.push(ValidationError {
                    suggestion: Some("use letters, digits, '-' or '_' in backend ids".into()),
                    ..error(&scope, "id", msg)
                });
            }
        }

        if let Err(msg) = validate_host(&backend.host) {
            let suggestion = backend
                .host
                .split_once("://")
                .map(|(_, rest)| format!("did you mean '{}'?", rest.trim_end_matches('/')));
            errors.push(ValidationError {
                suggestion,
                ..error(&scope, "host", msg)
            });
        }

        if backend.port == 0 {
            errors.push(error(&scope, "port", "port must be between 1 and 65535"));
        }

        if backend.weight == 0 {
            errors.push(ValidationError {
                suggestion: Some("omit the field to use the default weight of 1".into()),
                ..error(&scope, "weight", "weight must be a positive integer")
            });
        } else if backend.weight > MAX_WEIGHT {
            errors.push(error(
                &scope,
                "weight",
                format!("weight {} exceeds the maximum of {MAX_WEIGHT}", backend.weight),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_validation_report(path: &str, config: &Config) -> String {
    let total_weight = config.total_weight();
    let mut lines = vec![format!(
        "  {} backends, strategy: {}\n",
        config.backends.len(),
        config.strategy
    )];

    for backend in &config.backends {
        let share = if total_weight == 0 {
            0.0
        } else {
            f64::from(backend.weight.max(1)) * 100.0 / total_weight as f64
        };
        lines.push(format!(
            "  {}  -> {}:{} (weight {}, {share:.0}%)",
            backend.id, backend.host, backend.port, backend.weight
        ));
    }

    lines.push(format!(
        "\n  health check: GET {} every {}ms (timeout {}ms)",
        config.health_check.path, config.health_check.interval_ms, config.health_check.timeout_ms
    ));
    if config.affinity.enabled {
        lines.push(format!(
            "  affinity: cookie '{}' (max age {}ms)",
            config.affinity.cookie_name, config.affinity.max_age_ms
        ));
    } else {
        lines.push("  affinity: disabled".to_string());
    }

    format!("{} is valid\n{}", path, lines.join("\n"))
}
