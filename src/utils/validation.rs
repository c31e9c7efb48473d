use crate::utils::error::{ImagenieError, Result};
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn reject(field: &str, value: &str, reason: impl Into<String>) -> ImagenieError {
    ImagenieError::InvalidConfigValueError {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Only http(s) endpoints; the hub client does not speak anything else.
pub fn validate_url(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(reject(field, value, "URL cannot be empty"));
    }
    let url = Url::parse(value).map_err(|e| reject(field, value, format!("not a URL: {}", e)))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(reject(field, value, format!("scheme '{}' is not http(s)", other))),
    }
}

pub fn validate_path(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(reject(field, value, "path cannot be empty"));
    }
    if value.contains('\0') {
        return Err(reject(field, value, "path contains a NUL byte"));
    }
    Ok(())
}

pub fn validate_non_empty_string(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(reject(field, value, "value cannot be blank"));
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(reject(
            field,
            &value.to_string(),
            format!("expected {}..={}", min, max),
        ));
    }
    Ok(())
}

pub fn validate_regex(field: &str, pattern: &str) -> Result<()> {
    regex::Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| reject(field, pattern, e.to_string()))
}

/// Docker Hub namespaces: lowercase alphanumerics, `-` and `_`, at least 2 chars.
pub fn validate_hub_namespace(field: &str, org: &str) -> Result<()> {
    validate_non_empty_string(field, org)?;

    let allowed = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_';
    if org.len() < 2 || !org.chars().all(allowed) {
        return Err(reject(
            field,
            org,
            "namespace must be at least 2 lowercase letters, digits, '-' or '_'",
        ));
    }
    Ok(())
}
