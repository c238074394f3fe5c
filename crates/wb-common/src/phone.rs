//! Recipient phone number normalization.
//!
//! The messaging platform expects international numbers as bare digits
//! (country code first, no `+`). Input from forms and CSV exports tends to
//! carry spaces, dashes, parentheses or a leading `+`/`00`.

use thiserror::Error;

pub const MIN_DIGITS: usize = 8;
pub const MAX_DIGITS: usize = 15;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhoneError {
    #[error("Phone number is empty")]
    Empty,

    #[error("Phone number contains invalid character '{0}'")]
    InvalidCharacter(char),

    #[error("Phone number must have between 8 and 15 digits, got {0}")]
    InvalidLength(usize),

    #[error("Phone number must start with a country code, not 0")]
    MissingCountryCode,
}

/// Normalize a phone number to the bare-digit international form.
pub fn normalize_phone(raw: &str) -> Result<String, PhoneError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PhoneError::Empty);
    }

    let without_plus = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let mut digits = String::with_capacity(without_plus.len());

    for c in without_plus.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '(' | ')' | '.' => {}
            other => return Err(PhoneError::InvalidCharacter(other)),
        }
    }

    // International dialing prefix written out, e.g. 0044...
    let digits = match digits.strip_prefix("00") {
        Some(rest) if !trimmed.starts_with('+') => rest.to_string(),
        _ => digits,
    };

    if digits.len() < MIN_DIGITS || digits.len() > MAX_DIGITS {
        return Err(PhoneError::InvalidLength(digits.len()));
    }
    if digits.starts_with('0') {
        return Err(PhoneError::MissingCountryCode);
    }

    Ok(digits)
}
