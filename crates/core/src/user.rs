//! User records returned by the remote user service

use serde::{Deserialize, Serialize};

/// A user as reported by the user service
///
/// Only `id` is required; the service may add fields this crate ignores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl UserRecord {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            username: None,
            email: None,
            role: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}
