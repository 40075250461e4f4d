//! Logger session identity and ephemeral-mode detection.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Ephemeral identity of one logger lifetime, used to correlate its entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
}

pub fn detect_ephemeral_mode() -> bool {
    std::env::var("PORTAL_EPHEMERAL").unwrap_or_else(|_| "0".into()) == "1"
}

impl SessionContext {
    pub fn new() -> Self {
        SessionContext {
            session_id: format!("session-{}", Uuid::new_v4().simple()),
            started_at: Utc::now(),
        }
    }

    pub fn with_id(session_id: &str) -> Self {
        SessionContext {
            session_id: session_id.to_string(),
            started_at: Utc::now(),
        }
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_are_distinct() {
        let a = SessionContext::new();
        let b = SessionContext::new();
        assert_ne!(a.session_id, b.session_id);
        assert!(a.session_id.starts_with("session-"));
    }
}
