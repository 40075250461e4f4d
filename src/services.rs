//! Service catalog: what citizens can apply for.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::document_store::{collections, new_document_id, to_document, Direction, DocumentStore, Query};
use crate::errors::{PortalError, PortalResult};
use crate::event_logger::{user_context, EventLogger};
use crate::input_validator::{validate_service, ServiceInput};
use crate::models::{Service, ServiceCategory};
use crate::role::Actor;

/// Seed file layout: `[[services]]` tables using the same keys as the API
#[derive(Debug, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub services: Vec<ServiceInput>,
}

pub fn load_seed_file(path: &Path) -> PortalResult<Vec<ServiceInput>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| PortalError::config(format!("cannot read {}: {e}", path.display())))?;
    let seed: SeedFile = toml::from_str(&text)
        .map_err(|e| PortalError::config(format!("invalid seed file {}: {e}", path.display())))?;
    Ok(seed.services)
}

fn seed_entry(name: &str, description: &str, category: &str, docs: &[&str], eligibility: &str, time: &str, fees: f64) -> ServiceInput {
    ServiceInput {
        name: Some(name.to_string()),
        description: Some(description.to_string()),
        category: Some(category.to_string()),
        required_documents: Some(docs.iter().map(|d| d.to_string()).collect()),
        eligibility_criteria: Some(eligibility.to_string()),
        processing_time: Some(time.to_string()),
        fees: Some(fees),
        is_active: Some(true),
    }
}

/// Built-in catalog used when no seed file is given
pub fn default_services() -> Vec<ServiceInput> {
    vec![
        seed_entry(
            "Birth Certificate",
            "Issue of a certified birth certificate",
            "certificate",
            &["Hospital discharge summary", "Parent ID proof"],
            "Births registered within the municipality",
            "7-10 days",
            50.0,
        ),
        seed_entry(
            "Income Certificate",
            "Certificate of annual household income",
            "certificate",
            &["Salary slips or income declaration", "Address proof"],
            "Residents of the district",
            "2 weeks",
            30.0,
        ),
        seed_entry(
            "Trade License",
            "License to operate a shop or small business",
            "license",
            &["Premises ownership or rent agreement", "ID proof"],
            "Business premises within city limits",
            "1 month",
            500.0,
        ),
        seed_entry(
            "Old Age Pension",
            "Monthly pension for senior citizens",
            "welfare",
            &["Age proof", "Bank passbook", "Income certificate"],
            "Citizens aged 60 and above below the income limit",
            "30 days",
            0.0,
        ),
    ]
}

fn require_admin(actor: &Actor, action: &str) -> PortalResult<()> {
    if actor.role.can_manage_services() {
        Ok(())
    } else {
        Err(PortalError::forbidden(format!("admin role required to {action}")))
    }
}

fn overlay(existing: &Service, patch: &ServiceInput) -> ServiceInput {
    ServiceInput {
        name: patch.name.clone().or_else(|| Some(existing.name.clone())),
        description: patch
            .description
            .clone()
            .or_else(|| Some(existing.description.clone())),
        category: patch
            .category
            .clone()
            .or_else(|| Some(existing.category.as_str().to_string())),
        required_documents: patch
            .required_documents
            .clone()
            .or_else(|| Some(existing.required_documents.clone())),
        eligibility_criteria: patch
            .eligibility_criteria
            .clone()
            .or_else(|| Some(existing.eligibility_criteria.clone())),
        processing_time: patch
            .processing_time
            .clone()
            .or_else(|| Some(existing.processing_time.clone())),
        fees: patch.fees.or(Some(existing.fees)),
        is_active: patch.is_active.or(Some(existing.is_active)),
    }
}

#[derive(Clone)]
pub struct ServiceCatalog {
    store: Arc<dyn DocumentStore>,
    logger: EventLogger,
}

impl ServiceCatalog {
    pub fn new(store: Arc<dyn DocumentStore>, logger: EventLogger) -> Self {
        Self { store, logger }
    }

    async fn write(&self, actor: &Actor, service: &Service, action: &str) -> PortalResult<()> {
        let result = match to_document(service) {
            Ok(body) => self.store.set(collections::SERVICES, &service.id, body).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            self.logger.error_with(
                format!("Failed to {action} service"),
                e,
                Some(user_context(&actor.uid)),
            );
        }
        result
    }

    pub async fn create(&self, actor: &Actor, input: &ServiceInput) -> PortalResult<Service> {
        require_admin(actor, "create services")?;
        let category = validate_service(input)?;
        let now = Utc::now();
        let service = Service {
            id: new_document_id(),
            name: input.name.as_deref().unwrap_or_default().trim().to_string(),
            description: input.description.as_deref().unwrap_or_default().trim().to_string(),
            category,
            required_documents: input.required_documents.clone().unwrap_or_default(),
            eligibility_criteria: input.eligibility_criteria.clone().unwrap_or_default(),
            processing_time: input.processing_time.clone().unwrap_or_default(),
            fees: input.fees.unwrap_or(0.0),
            is_active: input.is_active.unwrap_or(true),
            created_by: actor.uid.clone(),
            created_at: now,
            updated_at: now,
        };
        self.write(actor, &service, "create").await?;
        self.logger.user_action(
            "Service created",
            Some(json!({ "serviceId": service.id, "name": service.name })),
            Some(user_context(&actor.uid)),
        );
        Ok(service)
    }

    pub async fn get(&self, id: &str) -> PortalResult<Service> {
        self.store
            .get(collections::SERVICES, id)
            .await?
            .ok_or_else(|| PortalError::not_found("service", id))?
            .decode()
    }

    /// Services sorted by name
    pub async fn list(
        &self,
        category: Option<ServiceCategory>,
        active_only: bool,
    ) -> PortalResult<Vec<Service>> {
        let mut query = Query::new();
        if let Some(category) = category {
            query = query.where_eq("category", category.as_str());
        }
        if active_only {
            query = query.where_eq("isActive", true);
        }
        query = query.order_by("name", Direction::Ascending);
        self.store
            .query(collections::SERVICES, &query)
            .await?
            .iter()
            .map(|doc| doc.decode())
            .collect()
    }

    /// Case-insensitive substring match over name, description and category
    pub async fn search(&self, term: &str, active_only: bool) -> PortalResult<Vec<Service>> {
        let needle = term.trim().to_lowercase();
        let services = self.list(None, active_only).await?;
        if needle.is_empty() {
            return Ok(services);
        }
        Ok(services
            .into_iter()
            .filter(|s| {
                s.name.to_lowercase().contains(&needle)
                    || s.description.to_lowercase().contains(&needle)
                    || s.category.as_str().contains(&needle)
            })
            .collect())
    }

    /// Merge `patch` over the stored record and re-validate the result
    pub async fn update(&self, actor: &Actor, id: &str, patch: &ServiceInput) -> PortalResult<Service> {
        require_admin(actor, "update services")?;
        let existing = self.get(id).await?;
        let merged = overlay(&existing, patch);
        let category = validate_service(&merged)?;

        let service = Service {
            name: merged.name.unwrap_or_default().trim().to_string(),
            description: merged.description.unwrap_or_default().trim().to_string(),
            category,
            required_documents: merged.required_documents.unwrap_or_default(),
            eligibility_criteria: merged.eligibility_criteria.unwrap_or_default(),
            processing_time: merged.processing_time.unwrap_or_default(),
            fees: merged.fees.unwrap_or(existing.fees),
            is_active: merged.is_active.unwrap_or(existing.is_active),
            updated_at: Utc::now(),
            ..existing
        };
        self.write(actor, &service, "update").await?;
        self.logger.user_action(
            "Service updated",
            Some(json!({ "serviceId": service.id })),
            Some(user_context(&actor.uid)),
        );
        Ok(service)
    }

    /// Soft delete: the record stays, `isActive` becomes false
    pub async fn deactivate(&self, actor: &Actor, id: &str) -> PortalResult<Service> {
        require_admin(actor, "delete services")?;
        let existing = self.get(id).await?;
        let service = Service {
            is_active: false,
            updated_at: Utc::now(),
            ..existing
        };
        self.write(actor, &service, "delete").await?;
        self.logger.user_action(
            "Service deactivated",
            Some(json!({ "serviceId": service.id })),
            Some(user_context(&actor.uid)),
        );
        Ok(service)
    }

    /// Insert `inputs` unless a service with the same name already exists
    pub async fn seed(&self, actor: &Actor, inputs: &[ServiceInput]) -> PortalResult<usize> {
        let existing: Vec<String> = self
            .list(None, false)
            .await?
            .into_iter()
            .map(|s| s.name.to_lowercase())
            .collect();
        let mut created = 0;
        for input in inputs {
            let name = input.name.as_deref().unwrap_or_default().trim().to_lowercase();
            if existing.contains(&name) {
                continue;
            }
            self.create(actor, input).await?;
            created += 1;
        }
        tracing::info!(created, "Service catalog seeded");
        Ok(created)
    }

    pub async fn seed_defaults(&self, actor: &Actor) -> PortalResult<usize> {
        self.seed(actor, &default_services()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_loader::LoggerSettings;
    use crate::document_store_memory::MemoryDocumentStore;
    use crate::errors::ValidationError;
    use crate::log_sink::NullSink;
    use crate::role::Role;

    fn catalog() -> ServiceCatalog {
        let logger = EventLogger::new(LoggerSettings::default(), None, Arc::new(NullSink));
        ServiceCatalog::new(Arc::new(MemoryDocumentStore::new()), logger)
    }

    fn admin() -> Actor {
        Actor::new("admin-1", Role::Admin)
    }

    #[tokio::test]
    async fn only_admins_create() {
        let catalog = catalog();
        let input = &default_services()[0];
        let err = catalog
            .create(&Actor::new("s", Role::Staff), input)
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Forbidden { .. }));

        let created = catalog.create(&admin(), input).await.unwrap();
        let stored = catalog.get(&created.id).await.unwrap();
        assert_eq!(stored.name, "Birth Certificate");
        assert_eq!(stored.created_by, "admin-1");
        assert!(stored.is_active);
    }

    #[tokio::test]
    async fn update_revalidates_merged_record() {
        let catalog = catalog();
        let created = catalog.create(&admin(), &default_services()[0]).await.unwrap();

        let patch = ServiceInput {
            category: Some("passport".into()),
            ..Default::default()
        };
        let err = catalog.update(&admin(), &created.id, &patch).await.unwrap_err();
        assert!(matches!(
            err,
            PortalError::Validation(ValidationError::InvalidCategory(_))
        ));

        let patch = ServiceInput {
            fees: Some(75.0),
            ..Default::default()
        };
        let updated = catalog.update(&admin(), &created.id, &patch).await.unwrap();
        assert_eq!(updated.fees, 75.0);
        assert_eq!(updated.name, created.name);
        assert_eq!(updated.created_by, created.created_by);
    }

    #[tokio::test]
    async fn soft_delete_hides_from_active_listing() {
        let catalog = catalog();
        assert_eq!(catalog.seed_defaults(&admin()).await.unwrap(), 4);
        assert_eq!(catalog.seed_defaults(&admin()).await.unwrap(), 0);

        let licenses = catalog.list(Some(ServiceCategory::License), true).await.unwrap();
        assert_eq!(licenses.len(), 1);
        catalog.deactivate(&admin(), &licenses[0].id).await.unwrap();

        assert!(catalog.list(Some(ServiceCategory::License), true).await.unwrap().is_empty());
        assert_eq!(catalog.list(None, false).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn search_is_case_insensitive() {
        let catalog = catalog();
        catalog.seed_defaults(&admin()).await.unwrap();
        let found = catalog.search("CERTIFICATE", true).await.unwrap();
        let names: Vec<_> = found.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Birth Certificate", "Income Certificate"]);
    }
}
