//! Application status transitions.
//!
//! Every change appends to `statusHistory` and updates `status` in the same
//! document write, so the last history entry always names the current status.
//! Owner notification happens after the write and never fails the transition.
//!
//! Transitions on the same application are serialized, so concurrent reviewers
//! each append their own entry instead of overwriting one another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::document_store::{collections, to_document, DocumentStore};
use crate::errors::{PortalError, PortalResult};
use crate::event_logger::{user_context, EventLogger};
use crate::models::{Application, ApplicationStatus, NotificationType, StatusHistoryEntry};
use crate::notifications::NotificationCenter;
use crate::role::Actor;

fn default_comment(status: ApplicationStatus) -> String {
    format!("Status updated to {}", status.as_str())
}

/// Apply one transition in memory
pub fn apply_transition(
    application: &mut Application,
    status: ApplicationStatus,
    updated_by: &str,
    comments: Option<&str>,
    now: DateTime<Utc>,
) {
    let comments = comments
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_comment(status));

    application.status_history.push(StatusHistoryEntry {
        status,
        timestamp: now,
        updated_by: updated_by.to_string(),
        comments,
    });
    application.status = status;
    application.updated_at = now;
    if status.marks_completion() {
        application.completed_at = Some(now);
    }
}

type ApplicationLocks = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn DocumentStore>,
    notifications: NotificationCenter,
    logger: EventLogger,
    locks: Arc<ApplicationLocks>,
}

impl StatusTracker {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        notifications: NotificationCenter,
        logger: EventLogger,
    ) -> Self {
        Self {
            store,
            notifications,
            logger,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Hold the returned guard across the read and write of one application
    async fn lock_application(&self, application_id: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Slots nobody holds or waits on only cost memory
            locks.retain(|_, slot| Arc::strong_count(slot) > 1);
            locks
                .entry(application_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }

    async fn load(&self, application_id: &str) -> PortalResult<Application> {
        self.store
            .get(collections::APPLICATIONS, application_id)
            .await?
            .ok_or_else(|| PortalError::not_found("application", application_id))?
            .decode()
    }

    async fn persist(&self, actor: &Actor, application: &Application) -> PortalResult<()> {
        let body = to_document(application)?;
        if let Err(e) = self
            .store
            .set(collections::APPLICATIONS, &application.id, body)
            .await
        {
            self.logger.error_with(
                "Failed to update application status",
                &e,
                Some(user_context(&actor.uid)),
            );
            return Err(e);
        }
        Ok(())
    }

    async fn notify_owner(&self, application: &Application, title: &str, message: String) {
        let result = self
            .notifications
            .create(
                &application.user_id,
                NotificationType::StatusUpdate,
                title,
                message,
                Some(application.id.clone()),
                json!({
                    "applicationId": application.application_id,
                    "status": application.status.as_str(),
                }),
            )
            .await;
        if let Err(e) = result {
            self.logger.warn(
                "Failed to create status notification",
                Some(json!({ "applicationId": application.id, "error": e.to_string() })),
            );
        }
    }

    /// Move an application to `new_status`, which is parsed before any read.
    /// `cancelled` is only reachable through [`StatusTracker::cancel`], so the
    /// owner and pending checks apply whoever asks.
    pub async fn transition(
        &self,
        actor: &Actor,
        application_id: &str,
        new_status: &str,
        comments: Option<&str>,
    ) -> PortalResult<Application> {
        let status: ApplicationStatus = new_status.parse()?;
        if status == ApplicationStatus::Cancelled {
            return self.cancel(actor, application_id, comments).await;
        }

        let _guard = self.lock_application(application_id).await;
        let mut application = self.load(application_id).await?;
        let previous = application.status;

        apply_transition(&mut application, status, &actor.uid, comments, Utc::now());
        self.persist(actor, &application).await?;

        self.logger.user_action(
            "Application status updated",
            Some(json!({
                "applicationId": application.id,
                "from": previous.as_str(),
                "to": status.as_str(),
            })),
            Some(user_context(&actor.uid)),
        );

        let message = format!(
            "Your application {} for {} is now {}.",
            application.application_id,
            application.service_name,
            status.label()
        );
        self.notify_owner(&application, "Application Status Updated", message)
            .await;
        Ok(application)
    }

    /// Withdraw a pending application on behalf of its owner
    pub async fn cancel(
        &self,
        actor: &Actor,
        application_id: &str,
        reason: Option<&str>,
    ) -> PortalResult<Application> {
        let _guard = self.lock_application(application_id).await;
        let mut application = self.load(application_id).await?;
        if application.user_id != actor.uid {
            self.logger.security(
                "Cancellation attempted by non-owner",
                Some(json!({ "applicationId": application_id })),
                Some(user_context(&actor.uid)),
            );
            return Err(PortalError::unauthorized(
                "only the applicant can cancel this application",
            ));
        }
        if application.status != ApplicationStatus::Pending {
            return Err(PortalError::CannotCancel {
                status: application.status.as_str().to_string(),
            });
        }

        let comments = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(|r| format!("Cancelled by applicant: {r}"))
            .unwrap_or_else(|| "Cancelled by applicant".to_string());
        apply_transition(
            &mut application,
            ApplicationStatus::Cancelled,
            &actor.uid,
            Some(&comments),
            Utc::now(),
        );
        self.persist(actor, &application).await?;

        self.logger.user_action(
            "Application cancelled",
            Some(json!({ "applicationId": application.id })),
            Some(user_context(&actor.uid)),
        );
        let message = format!(
            "Your application {} for {} has been cancelled.",
            application.application_id, application.service_name
        );
        self.notify_owner(&application, "Application Cancelled", message)
            .await;
        Ok(application)
    }
}
