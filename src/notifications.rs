//! Per-user notification inbox.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use crate::document_store::{
    collections, new_document_id, to_document, BatchOp, Direction, DocumentStore, Query,
};
use crate::errors::{PortalError, PortalResult};
use crate::models::{Notification, NotificationType};

/// Per-user notification inbox
#[derive(Clone)]
pub struct NotificationCenter {
    store: Arc<dyn DocumentStore>,
}

impl NotificationCenter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        user_id: &str,
        kind: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
        application_id: Option<String>,
        data: Value,
    ) -> PortalResult<Notification> {
        let notification = Notification {
            id: new_document_id(),
            user_id: user_id.to_string(),
            kind,
            title: title.into(),
            message: message.into(),
            application_id,
            data,
            is_read: false,
            created_at: Utc::now(),
            read_at: None,
        };
        self.store
            .set(
                collections::NOTIFICATIONS,
                &notification.id,
                to_document(&notification)?,
            )
            .await?;
        Ok(notification)
    }

    /// Newest first
    pub async fn list_for_user(
        &self,
        user_id: &str,
        unread_only: bool,
        limit: Option<usize>,
    ) -> PortalResult<Vec<Notification>> {
        let mut query = Query::new().where_eq("userId", user_id);
        if unread_only {
            query = query.where_eq("isRead", false);
        }
        query = query.order_by("createdAt", Direction::Descending);
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        self.store
            .query(collections::NOTIFICATIONS, &query)
            .await?
            .iter()
            .map(|doc| doc.decode())
            .collect()
    }

    pub async fn mark_read(&self, user_id: &str, notification_id: &str) -> PortalResult<()> {
        let doc = self
            .store
            .get(collections::NOTIFICATIONS, notification_id)
            .await?
            .ok_or_else(|| PortalError::not_found("notification", notification_id))?;
        let notification: Notification = doc.decode()?;
        if notification.user_id != user_id {
            // Other users' notifications are reported as absent
            return Err(PortalError::not_found("notification", notification_id));
        }
        if notification.is_read {
            return Ok(());
        }
        self.store
            .update(
                collections::NOTIFICATIONS,
                notification_id,
                json!({ "isRead": true, "readAt": crate::timefmt::now_string() }),
            )
            .await
    }

    /// Mark every unread notification read in one batch; returns how many changed
    pub async fn mark_all_read(&self, user_id: &str) -> PortalResult<usize> {
        let unread = self.list_for_user(user_id, true, None).await?;
        if unread.is_empty() {
            return Ok(0);
        }
        let read_at = crate::timefmt::now_string();
        let count = unread.len();
        let ops = unread
            .into_iter()
            .map(|n| {
                BatchOp::update(
                    collections::NOTIFICATIONS,
                    n.id,
                    json!({ "isRead": true, "readAt": read_at }),
                )
            })
            .collect();
        self.store.commit(ops).await?;
        Ok(count)
    }

    pub async fn unread_count(&self, user_id: &str) -> PortalResult<usize> {
        Ok(self.list_for_user(user_id, true, None).await?.len())
    }
}
