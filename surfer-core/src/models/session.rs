use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A browser session as the multiplexer reports it. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub run_id: String,
    pub url: String,
    pub visible: bool,
    pub is_connected: bool,
    pub user_agent: String,
    pub zoom_factor: f64,
    pub opened_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new(run_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id: run_id.into(),
            url: url.into(),
            visible: false,
            is_connected: true,
            user_agent: String::new(),
            zoom_factor: 1.0,
            opened_at: Utc::now(),
        }
    }

    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.opened_at).num_seconds()
    }
}
