/// Input validators for registration and login
///
/// Emails are normalised here (trimmed, lower-cased) so every store sees the
/// same case-insensitive key.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ValidationError;

const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321
const MIN_EMAIL_LENGTH: usize = 5;
const MAX_LOCAL_PART_LENGTH: usize = 64;
const MAX_FULL_NAME_LENGTH: usize = 200;
const MAX_PHONE_LENGTH: usize = 20;

lazy_static! {
    // RFC 5322 simplified email regex (practical validation)
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    ).expect("email regex is valid");

    static ref PHONE_REGEX: Regex = Regex::new(r"^\+?[0-9][0-9 ()-]*$").expect("phone regex is valid");
}

/// Validates and normalises an email address
pub fn normalize_email(email: &str) -> Result<String, ValidationError> {
    let trimmed = email.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("email".to_string()));
    }

    if trimmed.len() < MIN_EMAIL_LENGTH {
        return Err(ValidationError::TooShort("email".to_string(), MIN_EMAIL_LENGTH));
    }

    if trimmed.len() > MAX_EMAIL_LENGTH {
        return Err(ValidationError::TooLong("email".to_string(), MAX_EMAIL_LENGTH));
    }

    if has_suspicious_email_patterns(trimmed) {
        return Err(ValidationError::SuspiciousContent("email".to_string()));
    }

    if !EMAIL_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("email".to_string()));
    }

    Ok(trimmed.to_lowercase())
}

/// Validates an optional full name, returning the trimmed value
pub fn validate_full_name(name: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };

    if name.chars().count() > MAX_FULL_NAME_LENGTH {
        return Err(ValidationError::TooLong(
            "full_name".to_string(),
            MAX_FULL_NAME_LENGTH,
        ));
    }

    if name.chars().any(|c| c.is_control()) {
        return Err(ValidationError::SuspiciousContent("full_name".to_string()));
    }

    Ok(Some(name.to_string()))
}

/// Validates an optional phone number
pub fn validate_phone(phone: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(phone) = phone.map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(None);
    };

    if phone.len() > MAX_PHONE_LENGTH {
        return Err(ValidationError::TooLong("phone".to_string(), MAX_PHONE_LENGTH));
    }

    if !PHONE_REGEX.is_match(phone) {
        return Err(ValidationError::InvalidFormat("phone".to_string()));
    }

    Ok(Some(phone.to_string()))
}

fn has_suspicious_email_patterns(email: &str) -> bool {
    if email.matches('@').count() != 1 {
        return true;
    }

    if let Some(at_pos) = email.find('@') {
        if email[..at_pos].len() > MAX_LOCAL_PART_LENGTH {
            return true;
        }
    }

    email.chars().any(|c| c.is_control())
}
