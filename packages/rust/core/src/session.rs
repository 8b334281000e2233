//! Session state exposed to fragments through data bindings.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use fragmentsync_processor::Bindings;
use fragmentsync_shared::Identity;

/// Who is viewing the page, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Authenticated user id, `None` for anonymous visitors.
    pub user_id: Option<String>,
    pub now: DateTime<Utc>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self {
            user_id: None,
            now: Utc::now(),
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self {
            user_id: Some(id.into()),
            now: Utc::now(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn identity(&self) -> Identity {
        match &self.user_id {
            Some(id) => Identity::User(id.clone()),
            None => Identity::Anonymous,
        }
    }

    /// Default binding dictionary for this session.
    pub fn bindings(&self) -> Bindings {
        let authenticated = self.is_authenticated();
        let user = match &self.user_id {
            Some(id) => json!({ "id": id }),
            None => Value::Null,
        };

        Bindings::from([
            (
                "auth-state".to_string(),
                json!(if authenticated { "authenticated" } else { "anonymous" }),
            ),
            (
                "cta-primary".to_string(),
                json!(if authenticated { "Go to Dashboard" } else { "Get Started Free" }),
            ),
            ("cta-secondary".to_string(), json!("View Documentation")),
            (
                "current-timestamp".to_string(),
                json!(self.now.timestamp_millis()),
            ),
            ("user".to_string(), user),
        ])
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::anonymous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_bindings() {
        let session = Session::anonymous();
        let b = session.bindings();
        assert_eq!(b["auth-state"], json!("anonymous"));
        assert_eq!(b["cta-primary"], json!("Get Started Free"));
        assert_eq!(b["cta-secondary"], json!("View Documentation"));
        assert!(b["current-timestamp"].is_number());
        assert!(b["user"].is_null());
        assert_eq!(session.identity(), Identity::Anonymous);
    }

    #[test]
    fn authenticated_bindings() {
        let session = Session::user("u-42");
        let b = session.bindings();
        assert_eq!(b["auth-state"], json!("authenticated"));
        assert_eq!(b["cta-primary"], json!("Go to Dashboard"));
        assert_eq!(b["user"], json!({ "id": "u-42" }));
        assert_eq!(session.identity(), Identity::User("u-42".into()));
    }

    #[test]
    fn timestamp_is_session_time() {
        let now = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let session = Session { user_id: None, now };
        assert_eq!(
            session.bindings()["current-timestamp"],
            json!(1_700_000_000_000_i64)
        );
    }
}
