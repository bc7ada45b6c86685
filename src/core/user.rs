use serde::{Deserialize, Serialize};

use super::permission::PermissionLevel;

/// A directory row for a registered user. Rows are created on
/// registration (or owner bootstrap) and are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Stable external identifier (e.g. the chat-platform user id).
    pub id: String,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub permission_level: PermissionLevel,
    /// Opaque handle into the external credential store; absent until the
    /// user uploads a key.
    pub credential_ref: Option<String>,
}

/// Identity claims accompanying every request, as supplied by the external
/// identity provider. `authorize` refreshes the directory's denormalized
/// profile fields from these on each call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestUser {
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

impl RequestUser {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: None,
            full_name: None,
        }
    }
}
