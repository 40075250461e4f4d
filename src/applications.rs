//! Application workflow: submission, lookup, review and reporting.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::document_store::{collections, new_document_id, to_document, Direction, DocumentStore, Query};
use crate::errors::{PortalError, PortalResult};
use crate::event_logger::{user_context, EventLogger};
use crate::input_validator::{parse_processing_days, validate_application, ApplicationInput};
use crate::models::{
    ApplicantDetails, Application, ApplicationStatus, NotificationType, StatusHistoryEntry,
};
use crate::notifications::NotificationCenter;
use crate::role::Actor;
use crate::services::ServiceCatalog;
use crate::status_tracker::StatusTracker;

/// `APP-YYYYMMDD-XXXXXXXX`, derived from the submission date and document id
pub fn display_id(document_id: &str, applied_at: &DateTime<Utc>) -> String {
    let suffix: String = document_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect::<String>()
        .to_uppercase();
    format!("APP-{}-{}", applied_at.format("%Y%m%d"), suffix)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApplicationFilters {
    pub status: Option<ApplicationStatus>,
    pub service_id: Option<String>,
    pub limit: Option<usize>,
}

/// Outcome of one item in a bulk status update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkItemResult {
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatistics {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_service: BTreeMap<String, usize>,
    /// Mean days from submission to completion, over completed applications
    pub average_completion_days: Option<f64>,
}

pub fn compute_application_statistics(applications: &[Application]) -> ApplicationStatistics {
    let mut stats = ApplicationStatistics {
        total: applications.len(),
        ..Default::default()
    };
    let mut completion_days = Vec::new();
    for app in applications {
        *stats.by_status.entry(app.status.as_str().to_string()).or_insert(0) += 1;
        let service = if app.service_name.is_empty() {
            app.service_id.clone()
        } else {
            app.service_name.clone()
        };
        *stats.by_service.entry(service).or_insert(0) += 1;
        if let Some(done) = app.completed_at {
            completion_days.push((done - app.applied_at).num_seconds() as f64 / 86_400.0);
        }
    }
    if !completion_days.is_empty() {
        stats.average_completion_days =
            Some(completion_days.iter().sum::<f64>() / completion_days.len() as f64);
    }
    stats
}

fn require_reviewer(actor: &Actor) -> PortalResult<()> {
    if actor.role.can_review_applications() {
        Ok(())
    } else {
        Err(PortalError::forbidden("staff role required"))
    }
}

#[derive(Clone)]
pub struct ApplicationDesk {
    store: Arc<dyn DocumentStore>,
    catalog: ServiceCatalog,
    tracker: StatusTracker,
    notifications: NotificationCenter,
    logger: EventLogger,
}

impl ApplicationDesk {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        catalog: ServiceCatalog,
        tracker: StatusTracker,
        notifications: NotificationCenter,
        logger: EventLogger,
    ) -> Self {
        Self {
            store,
            catalog,
            tracker,
            notifications,
            logger,
        }
    }

    pub async fn submit(&self, actor: &Actor, input: &ApplicationInput) -> PortalResult<Application> {
        validate_application(input)?;

        let service_id = input.service_id.as_deref().unwrap_or_default().trim();
        let service = self.catalog.get(service_id).await?;
        if !service.is_active {
            return Err(PortalError::not_found("service", service_id));
        }

        let now = Utc::now();
        let id = new_document_id();
        let application = Application {
            application_id: display_id(&id, &now),
            id,
            user_id: actor.uid.clone(),
            service_id: service.id.clone(),
            service_name: service.name.clone(),
            applicant_details: ApplicantDetails {
                name: input.applicant_name.as_deref().unwrap_or_default().trim().to_string(),
                email: input.applicant_email.as_deref().unwrap_or_default().trim().to_string(),
                phone: input.applicant_phone.as_deref().unwrap_or_default().trim().to_string(),
                address: input.address.clone(),
                extra: input.additional_info.clone().unwrap_or_default(),
            },
            documents: input.documents.clone().unwrap_or_default(),
            status: ApplicationStatus::Pending,
            status_history: vec![StatusHistoryEntry {
                status: ApplicationStatus::Pending,
                timestamp: now,
                updated_by: actor.uid.clone(),
                comments: "Application submitted".to_string(),
            }],
            priority: input.priority.unwrap_or_default(),
            applied_at: now,
            updated_at: now,
            estimated_completion_date: now
                + Duration::days(parse_processing_days(&service.processing_time)),
            completed_at: None,
        };

        let body = to_document(&application)?;
        if let Err(e) = self
            .store
            .set(collections::APPLICATIONS, &application.id, body)
            .await
        {
            self.logger.error_with(
                "Failed to submit application",
                &e,
                Some(user_context(&actor.uid)),
            );
            return Err(e);
        }

        self.logger.user_action(
            "Application submitted",
            Some(json!({
                "applicationId": application.id,
                "serviceId": application.service_id,
            })),
            Some(user_context(&actor.uid)),
        );

        let message = format!(
            "Your application {} for {} has been received.",
            application.application_id, application.service_name
        );
        if let Err(e) = self
            .notifications
            .create(
                &application.user_id,
                NotificationType::ApplicationSubmitted,
                "Application Submitted",
                message,
                Some(application.id.clone()),
                json!({ "applicationId": application.application_id }),
            )
            .await
        {
            self.logger.warn(
                "Failed to create submission notification",
                Some(json!({ "applicationId": application.id, "error": e.to_string() })),
            );
        }
        Ok(application)
    }

    /// Visible to the owner and to reviewers
    pub async fn get(&self, actor: &Actor, id: &str) -> PortalResult<Application> {
        let application: Application = self
            .store
            .get(collections::APPLICATIONS, id)
            .await?
            .ok_or_else(|| PortalError::not_found("application", id))?
            .decode()?;
        if application.user_id != actor.uid && !actor.role.can_review_applications() {
            return Err(PortalError::forbidden("not your application"));
        }
        Ok(application)
    }

    async fn run_query(&self, query: Query) -> PortalResult<Vec<Application>> {
        self.store
            .query(collections::APPLICATIONS, &query)
            .await?
            .iter()
            .map(|doc| doc.decode())
            .collect()
    }

    /// The actor's own applications, newest first
    pub async fn list_own(
        &self,
        actor: &Actor,
        status: Option<ApplicationStatus>,
    ) -> PortalResult<Vec<Application>> {
        let mut query = Query::new().where_eq("userId", actor.uid.as_str());
        if let Some(status) = status {
            query = query.where_eq("status", status.as_str());
        }
        self.run_query(query.order_by("appliedAt", Direction::Descending))
            .await
    }

    pub async fn list_all(
        &self,
        actor: &Actor,
        filters: &ApplicationFilters,
    ) -> PortalResult<Vec<Application>> {
        require_reviewer(actor)?;
        let mut query = Query::new();
        if let Some(status) = filters.status {
            query = query.where_eq("status", status.as_str());
        }
        if let Some(service_id) = &filters.service_id {
            query = query.where_eq("serviceId", service_id.as_str());
        }
        query = query.order_by("appliedAt", Direction::Descending);
        if let Some(limit) = filters.limit {
            query = query.limit(limit);
        }
        self.run_query(query).await
    }

    pub async fn update_status(
        &self,
        actor: &Actor,
        id: &str,
        status: &str,
        comments: Option<&str>,
    ) -> PortalResult<Application> {
        require_reviewer(actor)?;
        self.tracker.transition(actor, id, status, comments).await
    }

    pub async fn cancel(&self, actor: &Actor, id: &str, reason: Option<&str>) -> PortalResult<Application> {
        self.tracker.cancel(actor, id, reason).await
    }

    /// Each id is transitioned independently; one failure does not stop the rest
    pub async fn bulk_update_status(
        &self,
        actor: &Actor,
        ids: &[String],
        status: &str,
        comments: Option<&str>,
    ) -> PortalResult<Vec<BulkItemResult>> {
        require_reviewer(actor)?;
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let result = match self.tracker.transition(actor, id, status, comments).await {
                Ok(_) => BulkItemResult {
                    id: id.clone(),
                    success: true,
                    error: None,
                },
                Err(e) => BulkItemResult {
                    id: id.clone(),
                    success: false,
                    error: Some(e.to_string()),
                },
            };
            results.push(result);
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        self.logger.user_action(
            "Bulk status update",
            Some(json!({
                "status": status,
                "requested": ids.len(),
                "succeeded": succeeded,
            })),
            Some(user_context(&actor.uid)),
        );
        Ok(results)
    }

    pub async fn statistics(&self, actor: &Actor) -> PortalResult<ApplicationStatistics> {
        require_reviewer(actor)?;
        let applications = self.run_query(Query::new()).await?;
        Ok(compute_application_statistics(&applications))
    }
}
