//! Boundary to the orchestration engine and its credential store.
//!
//! The manager never schedules containers itself; it pins a job to a worker
//! and a set of GPU uuids and hands the rest to the engine. These traits are
//! the seam: production talks to the engine's REST API (`http`), tests mock
//! them out.

pub mod http;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::core::job::MountSpec;

/// Service labels attached to every placement the manager creates. The GPU
/// label carries the pinned uuid set, `#`-separated, and is what the busy
/// scan reads back.
pub const LABEL_USER: &str = "gpool.user";
pub const LABEL_EXPIRE: &str = "gpool.expire";
pub const LABEL_GPUS: &str = "gpool.gpus";
const LABEL_GPU_SEP: char = '#';

/// Environment variable the engine forwards to the container so the runtime
/// can pin the device. One entry per GPU.
pub const RESOURCE_ENV: &str = "GPOOL_RESOURCE_GPU";

pub fn encode_gpu_label(uuids: &[String]) -> String {
    uuids.join(&LABEL_GPU_SEP.to_string())
}

pub fn decode_gpu_label(label: &str) -> Vec<String> {
    label
        .split(LABEL_GPU_SEP)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine answered with a non-success status.
    #[error("engine API error: {0}")]
    Api(String),

    /// Transport-level failure, including request timeouts.
    #[error("engine request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The credential is referenced by a running placement.
    #[error("credential is in use")]
    CredentialInUse,
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Ready,
    Down,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeAvailability {
    Active,
    Pause,
    Drain,
}

/// Live status of a node as reported by the engine. Never cached — always
/// fetched at request time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub hostname: String,
    pub state: NodeState,
    pub availability: NodeAvailability,
    #[serde(default)]
    pub addr: Option<String>,
}

impl NodeStatus {
    /// A node takes placements only while ready and active.
    pub fn is_online(&self) -> bool {
        self.state == NodeState::Ready && self.availability == NodeAvailability::Active
    }
}

/// Everything the engine needs to place a job. GPU uuids travel as opaque
/// env/constraint strings; the manager does not interpret them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementSpec {
    pub name: String,
    pub image: String,
    /// Engine placement constraints, e.g. `node.hostname==gpu-box-1`.
    pub constraints: Vec<String>,
    /// `KEY=value` pairs forwarded into the container environment.
    pub env: Vec<String>,
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub credential: Option<CredentialAttachment>,
    #[serde(default)]
    pub mounts: Vec<MountSpec>,
}

impl PlacementSpec {
    /// Standard labels for a job placement.
    pub fn job_labels(
        user_id: &str,
        expire: &DateTime<Utc>,
        gpu_uuids: &[String],
    ) -> HashMap<String, String> {
        HashMap::from([
            (LABEL_USER.to_string(), user_id.to_string()),
            (LABEL_EXPIRE.to_string(), expire.to_rfc3339()),
            (LABEL_GPUS.to_string(), encode_gpu_label(gpu_uuids)),
        ])
    }
}

/// A credential mounted into the placement at a fixed path, granting the
/// owner login access to the running container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialAttachment {
    pub handle: CredentialHandle,
    pub target_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialHandle {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementHandle {
    pub id: String,
}

/// Live placement state as the engine reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementStatus {
    pub handle: PlacementHandle,
    pub name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub state: String,
    /// Published ports, if any (e.g. the SSH port of the job container).
    #[serde(default)]
    pub ports: Vec<u16>,
}

impl PlacementStatus {
    /// GPU uuids this placement has pinned, per its labels.
    pub fn gpu_uuids(&self) -> Vec<String> {
        self.labels
            .get(LABEL_GPUS)
            .map(|l| decode_gpu_label(l))
            .unwrap_or_default()
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait OrchestrationEngine: Send + Sync {
    /// Live node listing. The catalog filters this down to online nodes.
    async fn list_nodes(&self) -> EngineResult<Vec<NodeStatus>>;

    /// Place a container. The engine is the scheduler of record: if the
    /// pinned resources are genuinely exclusive, at most one of two racing
    /// placements succeeds.
    async fn create_placement(&self, spec: &PlacementSpec) -> EngineResult<PlacementHandle>;

    /// Status of a single placement; `None` once the engine has forgotten
    /// the handle.
    async fn placement_status(
        &self,
        handle: &PlacementHandle,
    ) -> EngineResult<Option<PlacementStatus>>;

    /// All placements carrying a GPU label.
    async fn list_placements(&self) -> EngineResult<Vec<PlacementStatus>>;

    /// Tear a placement down. Removing an already-gone placement is Ok.
    async fn remove_placement(&self, handle: &PlacementHandle) -> EngineResult<()>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Store a credential blob under `name`, returning the engine handle.
    async fn store(&self, name: &str, blob: &str) -> EngineResult<CredentialHandle>;

    /// Resolve a credential by name; `None` if the store does not know it.
    async fn resolve(&self, name: &str) -> EngineResult<Option<CredentialHandle>>;

    /// Remove a stored credential. Fails with `CredentialInUse` while a
    /// running placement still references it.
    async fn remove(&self, handle: &CredentialHandle) -> EngineResult<()>;
}
