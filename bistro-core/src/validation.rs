//! Booking request shape checks.
//!
//! Field rules only. Slot availability and table fit are decided later by
//! the booking service against the store.

use bistro_shared::serde_helpers::parse_time;
use bistro_shared::BookingRequest;
use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Length limits
// ============================================================================

pub const MAX_NAME_LEN: usize = 200;

/// RFC 5321
pub const MAX_EMAIL_LEN: usize = 254;

pub const MAX_PHONE_LEN: usize = 32;

pub const MIN_PHONE_DIGITS: usize = 7;

pub const MAX_NOTE_LEN: usize = 500;

pub const DEFAULT_MAX_PARTY_SIZE: u32 = 20;

// ============================================================================
// Error types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        Self(vec![FieldError::new(field, message)])
    }

    pub fn fields(&self) -> &[FieldError] {
        &self.0
    }

    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.0.push(FieldError::new(field, message));
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// A request that passed shape validation, with parsed values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedBooking {
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub party_size: u32,
    pub special_requests: Option<String>,
    pub table_preference: Option<Uuid>,
}

/// Pluggable field validator consulted before any store access.
pub trait RequestValidator: Send + Sync {
    fn validate(&self, request: &BookingRequest) -> Result<ValidatedBooking, ValidationErrors>;
}

#[derive(Debug, Clone)]
pub struct ShapeValidator {
    pub max_party_size: u32,
}

impl Default for ShapeValidator {
    fn default() -> Self {
        Self {
            max_party_size: DEFAULT_MAX_PARTY_SIZE,
        }
    }
}

impl RequestValidator for ShapeValidator {
    fn validate(&self, request: &BookingRequest) -> Result<ValidatedBooking, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        check_required_text(&mut errors, "customerName", &request.customer_name, MAX_NAME_LEN);

        if check_required_text(&mut errors, "customerEmail", &request.customer_email, MAX_EMAIL_LEN)
            && !looks_like_email(request.customer_email.trim())
        {
            errors.push("customerEmail", "must be a valid email address");
        }

        if check_required_text(&mut errors, "customerPhone", &request.customer_phone, MAX_PHONE_LEN) {
            if let Err(message) = check_phone(request.customer_phone.trim()) {
                errors.push("customerPhone", message);
            }
        }

        let date = match NaiveDate::parse_from_str(request.date.trim(), "%Y-%m-%d") {
            Ok(date) => Some(date),
            Err(_) => {
                errors.push("date", "must be a calendar date (YYYY-MM-DD)");
                None
            }
        };

        let time = match parse_time(&request.time) {
            Ok(time) => Some(time),
            Err(_) => {
                errors.push("time", "must be a time of day (HH:MM)");
                None
            }
        };

        if request.party_size < 1 {
            errors.push("partySize", "must be at least 1");
        } else if request.party_size > i64::from(self.max_party_size) {
            errors.push(
                "partySize",
                format!("must not exceed {}", self.max_party_size),
            );
        }

        if let Some(note) = &request.special_requests {
            if note.len() > MAX_NOTE_LEN {
                errors.push(
                    "specialRequests",
                    format!("is too long ({} chars, max {MAX_NOTE_LEN})", note.len()),
                );
            }
        }

        match (date, time) {
            (Some(date), Some(time)) if errors.0.is_empty() => Ok(ValidatedBooking {
                customer_name: request.customer_name.trim().to_string(),
                customer_email: request.customer_email.trim().to_string(),
                customer_phone: request.customer_phone.trim().to_string(),
                date,
                time,
                // bounded by max_party_size above
                party_size: request.party_size as u32,
                special_requests: request
                    .special_requests
                    .as_ref()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty()),
                table_preference: request.table_preference,
            }),
            _ => Err(errors),
        }
    }
}

/// Returns true when the value is present and within limits.
fn check_required_text(errors: &mut ValidationErrors, field: &str, value: &str, max_len: usize) -> bool {
    let value = value.trim();
    if value.is_empty() {
        errors.push(field, "must not be empty");
        return false;
    }
    if value.len() > max_len {
        errors.push(
            field,
            format!("is too long ({} chars, max {max_len})", value.len()),
        );
        return false;
    }
    true
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !value.contains(char::is_whitespace)
        }
        None => false,
    }
}

fn check_phone(value: &str) -> Result<(), String> {
    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')' | ' ' | '.')))
    {
        return Err(format!("contains unexpected character '{bad}'"));
    }
    let digits = value.chars().filter(char::is_ascii_digit).count();
    if digits < MIN_PHONE_DIGITS {
        return Err(format!("must contain at least {MIN_PHONE_DIGITS} digits"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> BookingRequest {
        BookingRequest {
            customer_name: "Grace Hopper".to_string(),
            customer_email: "grace@example.com".to_string(),
            customer_phone: "+1 (555) 010-2030".to_string(),
            date: "2024-01-20".to_string(),
            time: "19:30".to_string(),
            party_size: 4,
            special_requests: Some("  window seat ".to_string()),
            table_preference: None,
        }
    }

    #[test]
    fn test_valid_request_is_parsed() {
        let booking = ShapeValidator::default().validate(&request()).unwrap();
        assert_eq!(booking.date, NaiveDate::from_ymd_opt(2024, 1, 20).unwrap());
        assert_eq!(booking.time, NaiveTime::from_hms_opt(19, 30, 0).unwrap());
        assert_eq!(booking.party_size, 4);
        assert_eq!(booking.special_requests.as_deref(), Some("window seat"));
    }

    #[test]
    fn test_every_bad_field_is_reported() {
        let req = BookingRequest {
            customer_name: "   ".to_string(),
            customer_email: "grace.example.com".to_string(),
            customer_phone: "12ab".to_string(),
            date: "20/01/2024".to_string(),
            time: "half seven".to_string(),
            party_size: 0,
            special_requests: None,
            table_preference: None,
        };

        let errors = ShapeValidator::default().validate(&req).unwrap_err();
        let fields: Vec<&str> = errors.fields().iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["customerName", "customerEmail", "customerPhone", "date", "time", "partySize"]
        );
    }

    #[test]
    fn test_party_size_upper_bound() {
        let validator = ShapeValidator { max_party_size: 8 };
        let mut req = request();
        req.party_size = 9;
        let errors = validator.validate(&req).unwrap_err();
        assert_eq!(errors.fields()[0].field, "partySize");
        assert_eq!(errors.fields()[0].message, "must not exceed 8");

        req.party_size = -3;
        assert!(validator.validate(&req).is_err());
    }

    #[test]
    fn test_phone_needs_enough_digits() {
        assert!(check_phone("555-12").is_err());
        assert!(check_phone("+49 30 1234567").is_ok());
    }
}
