//! Persisted record shapes.
//!
//! All records serialize with camelCase keys, one record per document.
//! Timestamps use the fixed-precision format from `timefmt`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ValidationError;
use crate::role::Role;
use crate::timefmt::{iso_millis, iso_millis_opt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceCategory {
    Certificate,
    License,
    Welfare,
    Other,
}

impl ServiceCategory {
    pub const ALL: [ServiceCategory; 4] = [
        ServiceCategory::Certificate,
        ServiceCategory::License,
        ServiceCategory::Welfare,
        ServiceCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCategory::Certificate => "certificate",
            ServiceCategory::License => "license",
            ServiceCategory::Welfare => "welfare",
            ServiceCategory::Other => "other",
        }
    }
}

impl FromStr for ServiceCategory {
    type Err = ValidationError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        ServiceCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == input)
            .ok_or_else(|| ValidationError::InvalidCategory(input.to_string()))
    }
}

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A government service citizens can apply for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: ServiceCategory,
    #[serde(default)]
    pub required_documents: Vec<String>,
    #[serde(default)]
    pub eligibility_criteria: String,
    #[serde(default)]
    pub processing_time: String,
    #[serde(default)]
    pub fees: f64,
    pub is_active: bool,
    #[serde(default)]
    pub created_by: String,
    #[serde(with = "iso_millis")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "iso_millis")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    UnderReview,
    Approved,
    Rejected,
    Completed,
    Cancelled,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 6] = [
        ApplicationStatus::Pending,
        ApplicationStatus::UnderReview,
        ApplicationStatus::Approved,
        ApplicationStatus::Rejected,
        ApplicationStatus::Completed,
        ApplicationStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::UnderReview => "under_review",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Completed => "completed",
            ApplicationStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses that stamp `completedAt`
    pub fn marks_completion(&self) -> bool {
        matches!(self, ApplicationStatus::Approved | ApplicationStatus::Completed)
    }

    /// Human label used in notification text
    pub fn label(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "Pending",
            ApplicationStatus::UnderReview => "Under Review",
            ApplicationStatus::Approved => "Approved",
            ApplicationStatus::Rejected => "Rejected",
            ApplicationStatus::Completed => "Completed",
            ApplicationStatus::Cancelled => "Cancelled",
        }
    }
}

impl FromStr for ApplicationStatus {
    type Err = ValidationError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        ApplicationStatus::ALL
            .into_iter()
            .find(|s| s.as_str() == input)
            .ok_or_else(|| ValidationError::InvalidStatus(input.to_string()))
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// One entry of the append-only status audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub status: ApplicationStatus,
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
    pub updated_by: String,
    pub comments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicantDetails {
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// A citizen's application for a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    /// Display-only reference, never used as a key
    pub application_id: String,
    pub user_id: String,
    pub service_id: String,
    #[serde(default)]
    pub service_name: String,
    pub applicant_details: ApplicantDetails,
    #[serde(default)]
    pub documents: Vec<String>,
    pub status: ApplicationStatus,
    pub status_history: Vec<StatusHistoryEntry>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(with = "iso_millis")]
    pub applied_at: DateTime<Utc>,
    #[serde(with = "iso_millis")]
    pub updated_at: DateTime<Utc>,
    #[serde(with = "iso_millis")]
    pub estimated_completion_date: DateTime<Utc>,
    #[serde(default, with = "iso_millis_opt", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Application {
    /// The history invariant: last history entry matches the current status
    pub fn history_consistent(&self) -> bool {
        self.status_history.last().map(|h| h.status) == Some(self.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    ApplicationSubmitted,
    StatusUpdate,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    #[serde(default)]
    pub data: Value,
    pub is_read: bool,
    #[serde(with = "iso_millis")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "iso_millis_opt", skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

/// Profile stored in `users` alongside the identity provider account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub role: Role,
    pub is_active: bool,
    #[serde(with = "iso_millis")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "iso_millis_opt", skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in ApplicationStatus::ALL {
            assert_eq!(status.as_str().parse::<ApplicationStatus>(), Ok(status));
        }
        assert_eq!(
            "done".parse::<ApplicationStatus>(),
            Err(ValidationError::InvalidStatus("done".into()))
        );
        assert_eq!(
            serde_json::to_value(ApplicationStatus::UnderReview).unwrap(),
            "under_review"
        );
    }

    #[test]
    fn completion_statuses() {
        assert!(ApplicationStatus::Approved.marks_completion());
        assert!(ApplicationStatus::Completed.marks_completion());
        assert!(!ApplicationStatus::Rejected.marks_completion());
    }

    #[test]
    fn notification_serializes_type_key() {
        let n = Notification {
            id: "n1".into(),
            user_id: "u1".into(),
            kind: NotificationType::StatusUpdate,
            title: "t".into(),
            message: "m".into(),
            application_id: None,
            data: Value::Null,
            is_read: false,
            created_at: Utc::now(),
            read_at: None,
        };
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["type"], "status_update");
        assert_eq!(v["isRead"], false);
        assert!(v.get("readAt").is_none());
    }
}
