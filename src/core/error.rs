use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::EngineError;

/// Failure taxonomy of the manager. Precondition failures are expected,
/// terminal outcomes and are returned to the caller as typed results;
/// nothing here is retried internally.
#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("you don't have permission to do that")]
    PermissionDenied,

    /// The acting user is unknown to the directory. Carries the current
    /// admin usernames so the caller knows whom to contact.
    #[error("user is not registered")]
    NotRegistered { admins: Vec<String> },

    #[error("user {user_id} is already registered")]
    AlreadyRegistered { user_id: String },

    /// The user has no stored credential, or the stored reference no longer
    /// resolves in the external credential store.
    #[error("no access credential is set; upload one first")]
    CredentialMissing,

    /// The stored credential is referenced by a running placement and
    /// cannot be rotated until that placement is gone.
    #[error("the stored credential is in use by a running job")]
    CredentialInUse,

    /// A worker hostname is already bound to a different join identity.
    #[error("worker {hostname} is already registered under a different join id")]
    WorkerCollision { hostname: String },

    #[error("{0} not found")]
    NotFound(String),

    /// The orchestration engine or credential store failed or timed out.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Durable-storage failure.
    #[error("storage error: {0}")]
    Store(anyhow::Error),

    #[error("runtime error: {0}")]
    Runtime(String),
}

impl ManagerError {
    /// Stable wire code for this failure, independent of the display text.
    pub fn code(&self) -> &'static str {
        match self {
            ManagerError::PermissionDenied => "permission_denied",
            ManagerError::NotRegistered { .. } => "not_registered",
            ManagerError::AlreadyRegistered { .. } => "already_registered",
            ManagerError::CredentialMissing => "credential_missing",
            ManagerError::CredentialInUse => "credential_in_use",
            ManagerError::WorkerCollision { .. } => "worker_collision",
            ManagerError::NotFound(_) => "not_found",
            ManagerError::Engine(_) => "engine_error",
            ManagerError::Store(_) => "store_error",
            ManagerError::Runtime(_) => "runtime_error",
        }
    }

    /// Auxiliary data surfaced to the caller alongside the message.
    pub fn data(&self) -> serde_json::Value {
        match self {
            ManagerError::NotRegistered { admins } => serde_json::json!({ "admins": admins }),
            ManagerError::AlreadyRegistered { user_id } => {
                serde_json::json!({ "user_id": user_id })
            }
            ManagerError::WorkerCollision { hostname } => {
                serde_json::json!({ "hostname": hostname })
            }
            _ => serde_json::Value::Null,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
            data: self.data(),
        }
    }
}

impl From<anyhow::Error> for ManagerError {
    fn from(err: anyhow::Error) -> Self {
        ManagerError::Store(err)
    }
}

/// JSON error payload returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

pub type Result<T> = std::result::Result<T, ManagerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = ManagerError::NotFound("job 7".to_string());
        assert_eq!(err.to_string(), "job 7 not found");
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn test_not_registered_carries_admins() {
        let err = ManagerError::NotRegistered {
            admins: vec!["@ada".to_string()],
        };
        let body = err.body();
        assert_eq!(body.code, "not_registered");
        assert_eq!(body.data["admins"][0], "@ada");
    }

    #[test]
    fn test_body_round_trip() {
        let body = ManagerError::CredentialInUse.body();
        let json = serde_json::to_string(&body).unwrap();
        let parsed: ErrorBody = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.code, "credential_in_use");
        assert!(parsed.data.is_null());
    }
}
