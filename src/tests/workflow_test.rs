// src/tests/workflow_test.rs
// Applications desk end to end over an in-memory store

use std::sync::Arc;

use crate::app_state::AppState;
use crate::applications::ApplicationFilters;
use crate::config_loader::PortalConfig;
use crate::document_store::DocumentStore;
use crate::document_store_memory::MemoryDocumentStore;
use crate::errors::{PortalError, ValidationError};
use crate::event_logger::EventLogger;
use crate::input_validator::{ApplicationInput, ServiceInput};
use crate::log_sink::NullSink;
use crate::models::{ApplicationStatus, NotificationType, Service};
use crate::role::{Actor, Role};

fn state() -> AppState {
    let config = PortalConfig {
        ephemeral: true,
        ..Default::default()
    };
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
    let logger = EventLogger::new(config.logger.clone(), Some(store.clone()), Arc::new(NullSink));
    AppState::new(config, store, logger)
}

fn admin() -> Actor {
    Actor::new("admin-1", Role::Admin)
}

fn staff() -> Actor {
    Actor::new("staff-1", Role::Staff)
}

fn citizen(uid: &str) -> Actor {
    Actor::new(uid, Role::Citizen)
}

async fn birth_certificate(state: &AppState) -> Service {
    state.services.seed_defaults(&admin()).await.unwrap();
    state
        .services
        .search("birth", true)
        .await
        .unwrap()
        .into_iter()
        .next()
        .unwrap()
}

fn input(service_id: &str) -> ApplicationInput {
    ApplicationInput {
        service_id: Some(service_id.to_string()),
        applicant_name: Some("Asha Rao".into()),
        applicant_email: Some("asha@example.in".into()),
        applicant_phone: Some("98765 43210".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn submit_creates_pending_application_and_notification() {
    let state = state();
    let service = birth_certificate(&state).await;

    let app = state
        .applications
        .submit(&citizen("c1"), &input(&service.id))
        .await
        .unwrap();

    assert_eq!(app.status, ApplicationStatus::Pending);
    assert!(app.history_consistent());
    assert_eq!(app.service_name, "Birth Certificate");
    assert!(app.application_id.starts_with("APP-"));
    assert_eq!(app.application_id.len(), "APP-20240101-ABCDEF12".len());
    // "7-10 days"
    assert_eq!((app.estimated_completion_date - app.applied_at).num_days(), 10);

    let inbox = state.notifications.list_for_user("c1", true, None).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, NotificationType::ApplicationSubmitted);
}

#[tokio::test]
async fn submit_validates_before_touching_storage() {
    let state = state();
    let partial = ApplicationInput {
        service_id: Some("s1".into()),
        ..Default::default()
    };
    let err = state
        .applications
        .submit(&citizen("c1"), &partial)
        .await
        .unwrap_err();
    match err {
        PortalError::Validation(ValidationError::MissingFields(fields)) => {
            assert_eq!(fields, vec!["applicantName", "applicantEmail", "applicantPhone"])
        }
        other => panic!("unexpected {other:?}"),
    }

    let err = state
        .applications
        .submit(&citizen("c1"), &input("no-such-service"))
        .await
        .unwrap_err();
    assert!(matches!(err, PortalError::NotFound { .. }));
}

#[tokio::test]
async fn inactive_services_accept_no_applications() {
    let state = state();
    let service = birth_certificate(&state).await;
    state.services.deactivate(&admin(), &service.id).await.unwrap();

    let err = state
        .applications
        .submit(&citizen("c1"), &input(&service.id))
        .await
        .unwrap_err();
    assert!(matches!(err, PortalError::NotFound { .. }));
}

#[tokio::test]
async fn visibility_rules() {
    let state = state();
    let service = birth_certificate(&state).await;
    let app = state
        .applications
        .submit(&citizen("c1"), &input(&service.id))
        .await
        .unwrap();

    assert!(state.applications.get(&citizen("c1"), &app.id).await.is_ok());
    assert!(state.applications.get(&staff(), &app.id).await.is_ok());
    assert!(matches!(
        state.applications.get(&citizen("c2"), &app.id).await,
        Err(PortalError::Forbidden { .. })
    ));

    assert_eq!(state.applications.list_own(&citizen("c1"), None).await.unwrap().len(), 1);
    assert!(state.applications.list_own(&citizen("c2"), None).await.unwrap().is_empty());
    assert!(matches!(
        state
            .applications
            .list_all(&citizen("c1"), &ApplicationFilters::default())
            .await,
        Err(PortalError::Forbidden { .. })
    ));
    assert!(matches!(
        state
            .applications
            .update_status(&citizen("c1"), &app.id, "approved", None)
            .await,
        Err(PortalError::Forbidden { .. })
    ));
}

#[tokio::test]
async fn bulk_update_reports_each_item() {
    let state = state();
    let service = birth_certificate(&state).await;
    let a = state
        .applications
        .submit(&citizen("c1"), &input(&service.id))
        .await
        .unwrap();
    let b = state
        .applications
        .submit(&citizen("c2"), &input(&service.id))
        .await
        .unwrap();

    let ids = vec![a.id.clone(), "missing".to_string(), b.id.clone()];
    let results = state
        .applications
        .bulk_update_status(&staff(), &ids, "under_review", Some("batch"))
        .await
        .unwrap();

    let outcome: Vec<_> = results.iter().map(|r| r.success).collect();
    assert_eq!(outcome, vec![true, false, true]);
    assert!(results[1].error.is_some());

    let reviewing = state
        .applications
        .list_all(
            &staff(),
            &ApplicationFilters {
                status: Some(ApplicationStatus::UnderReview),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(reviewing.len(), 2);
}

#[tokio::test]
async fn statistics_by_status_and_service() {
    let state = state();
    let service = birth_certificate(&state).await;
    let a = state
        .applications
        .submit(&citizen("c1"), &input(&service.id))
        .await
        .unwrap();
    state
        .applications
        .submit(&citizen("c2"), &input(&service.id))
        .await
        .unwrap();
    state
        .applications
        .update_status(&staff(), &a.id, "completed", None)
        .await
        .unwrap();

    let stats = state.applications.statistics(&staff()).await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_status.get("pending"), Some(&1));
    assert_eq!(stats.by_status.get("completed"), Some(&1));
    assert_eq!(stats.by_service.get("Birth Certificate"), Some(&2));
    assert!(stats.average_completion_days.is_some());
}

#[tokio::test]
async fn service_create_requires_valid_category() {
    let state = state();
    let bad = ServiceInput {
        name: Some("Passport".into()),
        description: Some("Travel document".into()),
        category: Some("travel".into()),
        ..Default::default()
    };
    assert!(matches!(
        state.services.create(&admin(), &bad).await,
        Err(PortalError::Validation(ValidationError::InvalidCategory(_)))
    ));
}

#[tokio::test]
async fn reviewers_cannot_cancel_for_the_applicant() {
    let state = state();
    let service = birth_certificate(&state).await;
    let app = state
        .applications
        .submit(&citizen("c1"), &input(&service.id))
        .await
        .unwrap();

    assert!(matches!(
        state
            .applications
            .update_status(&staff(), &app.id, "cancelled", None)
            .await,
        Err(PortalError::Unauthorized { .. })
    ));

    let results = state
        .applications
        .bulk_update_status(&admin(), &[app.id.clone()], "cancelled", None)
        .await
        .unwrap();
    assert!(!results[0].success);
    assert!(results[0].error.is_some());

    let current = state.applications.get(&citizen("c1"), &app.id).await.unwrap();
    assert_eq!(current.status, ApplicationStatus::Pending);
    assert_eq!(current.status_history.len(), 1);
}
