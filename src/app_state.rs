//! Shared application state, built once per process.

use std::sync::Arc;

use crate::applications::ApplicationDesk;
use crate::auth::AuthService;
use crate::config_loader::PortalConfig;
use crate::document_store::DocumentStore;
use crate::event_logger::EventLogger;
use crate::identity::{IdentityProvider, StoreIdentityProvider};
use crate::log_query::LogQuery;
use crate::notifications::NotificationCenter;
use crate::services::ServiceCatalog;
use crate::status_tracker::StatusTracker;

/// Everything a request handler or CLI command needs, wired once at startup
pub struct AppState {
    pub config: PortalConfig,
    pub store: Arc<dyn DocumentStore>,
    pub logger: EventLogger,
    pub auth: AuthService,
    pub services: ServiceCatalog,
    pub applications: ApplicationDesk,
    pub notifications: NotificationCenter,
    pub logs: LogQuery,
}

impl AppState {
    /// Wire components over `store` with the default identity provider
    pub fn new(config: PortalConfig, store: Arc<dyn DocumentStore>, logger: EventLogger) -> Self {
        let identity: Arc<dyn IdentityProvider> = Arc::new(StoreIdentityProvider::new(
            store.clone(),
            config.auth.session_ttl_hours,
        ));
        Self::with_identity(config, store, identity, logger)
    }

    pub fn with_identity(
        config: PortalConfig,
        store: Arc<dyn DocumentStore>,
        identity: Arc<dyn IdentityProvider>,
        logger: EventLogger,
    ) -> Self {
        let notifications = NotificationCenter::new(store.clone());
        let services = ServiceCatalog::new(store.clone(), logger.clone());
        let tracker = StatusTracker::new(store.clone(), notifications.clone(), logger.clone());
        let applications = ApplicationDesk::new(
            store.clone(),
            services.clone(),
            tracker,
            notifications.clone(),
            logger.clone(),
        );
        let auth = AuthService::new(identity, store.clone(), logger.clone(), config.auth.clone());
        let logs = LogQuery::new(Some(store.clone()));

        Self {
            config,
            store,
            logger,
            auth,
            services,
            applications,
            notifications,
            logs,
        }
    }
}
