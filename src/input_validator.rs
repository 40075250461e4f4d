//! Shape checks for user-supplied input.
//!
//! Every function here is pure: it inspects the input and returns the first
//! problem found, before anything is written to storage.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ValidationError;
use crate::models::{Priority, ServiceCategory};

lazy_static! {
    static ref EMAIL_PATTERN: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
    static ref NUMBER_PATTERN: Regex = Regex::new(r"\d+").unwrap();
}

pub const MIN_PHONE_DIGITS: usize = 10;
pub const MAX_PHONE_DIGITS: usize = 15;
/// Used when a processing time carries no number
pub const DEFAULT_PROCESSING_DAYS: i64 = 7;

/// Service fields as submitted by an admin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub required_documents: Option<Vec<String>>,
    pub eligibility_criteria: Option<String>,
    pub processing_time: Option<String>,
    pub fees: Option<f64>,
    pub is_active: Option<bool>,
}

/// Application fields as submitted by a citizen
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationInput {
    pub service_id: Option<String>,
    pub applicant_name: Option<String>,
    pub applicant_email: Option<String>,
    pub applicant_phone: Option<String>,
    pub address: Option<String>,
    pub documents: Option<Vec<String>>,
    pub priority: Option<Priority>,
    pub additional_info: Option<BTreeMap<String, Value>>,
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).map_or(true, str::is_empty)
}

fn missing(fields: &[(&str, &Option<String>)]) -> Result<(), ValidationError> {
    let absent: Vec<String> = fields
        .iter()
        .filter(|(_, value)| is_blank(value))
        .map(|(name, _)| name.to_string())
        .collect();
    if absent.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::MissingFields(absent))
    }
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email.trim())
}

/// 10 to 15 digits once every non-digit is stripped
pub fn is_valid_phone(phone: &str) -> bool {
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits)
}

/// Checks a service definition and returns its parsed category
pub fn validate_service(input: &ServiceInput) -> Result<ServiceCategory, ValidationError> {
    missing(&[
        ("name", &input.name),
        ("description", &input.description),
        ("category", &input.category),
    ])?;

    let category = input.category.as_deref().unwrap_or_default().trim();
    let category: ServiceCategory = category.parse()?;

    if let Some(fees) = input.fees {
        if !fees.is_finite() || fees < 0.0 {
            return Err(ValidationError::field("fees", "must be a non-negative amount"));
        }
    }
    Ok(category)
}

pub fn validate_application(input: &ApplicationInput) -> Result<(), ValidationError> {
    missing(&[
        ("serviceId", &input.service_id),
        ("applicantName", &input.applicant_name),
        ("applicantEmail", &input.applicant_email),
        ("applicantPhone", &input.applicant_phone),
    ])?;

    let email = input.applicant_email.as_deref().unwrap_or_default();
    if !is_valid_email(email) {
        return Err(ValidationError::InvalidEmail(email.to_string()));
    }

    let phone = input.applicant_phone.as_deref().unwrap_or_default();
    if !is_valid_phone(phone) {
        return Err(ValidationError::InvalidPhone(phone.to_string()));
    }
    Ok(())
}

pub fn validate_registration(
    email: &Option<String>,
    password: &Option<String>,
    display_name: &Option<String>,
    min_password_length: usize,
) -> Result<(), ValidationError> {
    missing(&[
        ("email", email),
        ("password", password),
        ("displayName", display_name),
    ])?;

    let email = email.as_deref().unwrap_or_default();
    if !is_valid_email(email) {
        return Err(ValidationError::InvalidEmail(email.to_string()));
    }
    if password.as_deref().unwrap_or_default().chars().count() < min_password_length {
        return Err(ValidationError::field(
            "password",
            format!("must be at least {min_password_length} characters"),
        ));
    }
    Ok(())
}

/// Turn free-text processing times into a day count.
///
/// The largest number in the text is scaled by the unit it mentions:
/// "7-10 days" is 10, "2 weeks" is 14, "1 month" is 30.
pub fn parse_processing_days(text: &str) -> i64 {
    let lower = text.to_lowercase();
    let Some(amount) = NUMBER_PATTERN
        .find_iter(&lower)
        .filter_map(|m| m.as_str().parse::<i64>().ok())
        .max()
    else {
        return DEFAULT_PROCESSING_DAYS;
    };

    let unit = if lower.contains("month") {
        30
    } else if lower.contains("week") {
        7
    } else {
        1
    };
    amount.saturating_mul(unit).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_application() -> ApplicationInput {
        ApplicationInput {
            service_id: Some("s1".into()),
            applicant_name: Some("Asha Rao".into()),
            applicant_email: Some("asha@example.in".into()),
            applicant_phone: Some("+91 98765-43210".into()),
            ..Default::default()
        }
    }

    #[test]
    fn application_lists_every_missing_field() {
        let input = ApplicationInput {
            service_id: Some("s1".into()),
            ..Default::default()
        };
        assert_eq!(
            validate_application(&input),
            Err(ValidationError::MissingFields(vec![
                "applicantName".into(),
                "applicantEmail".into(),
                "applicantPhone".into(),
            ]))
        );
    }

    #[test]
    fn blank_strings_count_as_missing() {
        let mut input = full_application();
        input.applicant_name = Some("   ".into());
        assert_eq!(
            validate_application(&input),
            Err(ValidationError::MissingFields(vec!["applicantName".into()]))
        );
    }

    #[test]
    fn email_and_phone_are_distinct_failures() {
        let mut input = full_application();
        input.applicant_email = Some("not-an-email".into());
        assert!(matches!(
            validate_application(&input),
            Err(ValidationError::InvalidEmail(_))
        ));

        let mut input = full_application();
        input.applicant_phone = Some("12345".into());
        assert!(matches!(
            validate_application(&input),
            Err(ValidationError::InvalidPhone(_))
        ));

        assert!(validate_application(&full_application()).is_ok());
    }

    #[test]
    fn phone_digit_bounds() {
        assert!(is_valid_phone("0123456789"));
        assert!(is_valid_phone("(012) 345-678-901-234"));
        assert!(!is_valid_phone("012345678"));
        assert!(!is_valid_phone("0123456789012345"));
    }

    #[test]
    fn service_missing_fields_before_category() {
        let input = ServiceInput {
            category: Some("passport".into()),
            ..Default::default()
        };
        assert_eq!(
            validate_service(&input),
            Err(ValidationError::MissingFields(vec!["name".into(), "description".into()]))
        );

        let input = ServiceInput {
            name: Some("Passport".into()),
            description: Some("New passport".into()),
            category: Some("passport".into()),
            ..Default::default()
        };
        assert_eq!(
            validate_service(&input),
            Err(ValidationError::InvalidCategory("passport".into()))
        );
    }

    #[test]
    fn service_valid_category() {
        let input = ServiceInput {
            name: Some("Birth Certificate".into()),
            description: Some("Issue a birth certificate".into()),
            category: Some("certificate".into()),
            ..Default::default()
        };
        assert_eq!(validate_service(&input), Ok(ServiceCategory::Certificate));
    }

    #[test]
    fn registration_checks() {
        let ok = validate_registration(
            &Some("a@b.co".into()),
            &Some("secret1".into()),
            &Some("A".into()),
            6,
        );
        assert!(ok.is_ok());
        let short = validate_registration(&Some("a@b.co".into()), &Some("123".into()), &Some("A".into()), 6);
        assert!(matches!(short, Err(ValidationError::InvalidField { .. })));
    }

    #[test]
    fn processing_days() {
        assert_eq!(parse_processing_days("7-10 days"), 10);
        assert_eq!(parse_processing_days("2 weeks"), 14);
        assert_eq!(parse_processing_days("1 Month"), 30);
        assert_eq!(parse_processing_days("same day"), DEFAULT_PROCESSING_DAYS);
        assert_eq!(parse_processing_days("15"), 15);
    }
}
