//! Input validation shared by the admin and client APIs.

use std::sync::OnceLock;

use regex::Regex;

use crate::db::normalize_client_name;
use crate::error::ValidationError;

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_TEXT_CHARS: usize = 20_000;

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email pattern")
    })
}

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\+?[0-9 ().\-/]{5,30}$").expect("valid phone pattern"))
}

/// Trim and lowercase an email address, rejecting obvious garbage.
pub fn normalize_email(raw: &str) -> Result<String, ValidationError> {
    let email = raw.trim().to_lowercase();
    if email.len() > 254 || !email_pattern().is_match(&email) {
        return Err(ValidationError::new(
            "email",
            format!("'{}' is not a valid email address", raw.trim()),
        ));
    }
    Ok(email)
}

/// Accept absolute http(s) URLs only.
pub fn validate_url(field: &str, raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    let parsed = url::Url::parse(trimmed)
        .map_err(|e| ValidationError::new(field, format!("invalid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ValidationError::new(
            field,
            "URL must be an absolute http or https address",
        ));
    }
    Ok(trimmed.to_string())
}

/// Phone numbers: digits plus common separators, at least five digits.
pub fn validate_phone(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    let digits = trimmed.chars().filter(char::is_ascii_digit).count();
    if !phone_pattern().is_match(trimmed) || digits < 5 {
        return Err(ValidationError::new(
            "phone",
            format!("'{trimmed}' is not a valid phone number"),
        ));
    }
    Ok(trimmed.to_string())
}

/// Trim optional free text; blank becomes `None`.
pub fn trim_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Required single-line text, trimmed and length-capped.
pub fn require_text(field: &str, raw: &str, max_chars: usize) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    if trimmed.chars().count() > max_chars {
        return Err(ValidationError::new(
            field,
            format!("must be at most {max_chars} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

/// Optional text, trimmed and length-capped.
pub fn optional_text(
    field: &str,
    value: Option<String>,
    max_chars: usize,
) -> Result<Option<String>, ValidationError> {
    match trim_optional(value) {
        Some(text) if text.chars().count() > max_chars => Err(ValidationError::new(
            field,
            format!("must be at most {max_chars} characters"),
        )),
        other => Ok(other),
    }
}

/// A client name must survive normalization.
pub fn client_name(raw: &str) -> Result<String, ValidationError> {
    let name = require_text("name", raw, MAX_TITLE_CHARS)?;
    if normalize_client_name(&name).is_empty() {
        return Err(ValidationError::new(
            "name",
            "must contain at least one letter or digit",
        ));
    }
    Ok(name)
}

pub fn optional_email(value: Option<String>) -> Result<Option<String>, ValidationError> {
    trim_optional(value).map(|v| normalize_email(&v)).transpose()
}

pub fn optional_url(field: &str, value: Option<String>) -> Result<Option<String>, ValidationError> {
    trim_optional(value).map(|v| validate_url(field, &v)).transpose()
}

pub fn optional_phone(value: Option<String>) -> Result<Option<String>, ValidationError> {
    trim_optional(value).map(|v| validate_phone(&v)).transpose()
}
