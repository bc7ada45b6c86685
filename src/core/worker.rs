use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A machine contributing GPU capacity to the pool. `hostname` is the
/// primary identity; `join_id` is the identity the orchestration engine
/// assigned when the machine joined. Rows are never deleted — stale workers
/// are filtered out by live online status, not removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub hostname: String,
    pub external_ip: Option<String>,
    pub join_id: String,
    /// Present only if the worker exports a shared filesystem.
    pub storage_root: Option<String>,
    /// Free-form platform/hardware metadata reported at join time.
    pub info: serde_json::Value,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// A GPU card on a worker. `uuid` is the vendor-assigned durable identity;
/// `(worker_hostname, index)` stays unique for display ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gpu {
    pub uuid: String,
    pub worker_hostname: String,
    pub index: u32,
    pub name: String,
    pub total_memory_mib: u64,
    pub info: serde_json::Value,
}

/// Payload a worker announces on `/join`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub hostname: String,
    #[serde(default)]
    pub external_ip: Option<String>,
    pub join_id: String,
    #[serde(default)]
    pub storage_root: Option<String>,
    #[serde(default)]
    pub gpus: Vec<GpuSpec>,
    #[serde(default)]
    pub info: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuSpec {
    pub uuid: String,
    pub index: u32,
    pub name: String,
    pub total_memory_mib: u64,
    #[serde(default)]
    pub info: serde_json::Value,
}
