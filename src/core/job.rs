use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::PlacementStatus;

/// A ledger row for a dispatched job. Rows are created atomically with a
/// successful placement and never deleted; completion only stamps
/// `end_time`. While `end_time` is `None` every uuid in `gpu_uuids` counts
/// as busy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub name: String,
    pub user_id: String,
    pub image: String,
    pub worker_hostname: String,
    pub gpu_uuids: Vec<String>,
    #[serde(default)]
    pub mounts: Vec<MountSpec>,
    /// The orchestration engine's placement id for this job.
    pub service_handle: String,
    pub start_time: DateTime<Utc>,
    pub expected_end_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Job {
    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }
}

/// A volume mount requested for a job, passed through to the engine
/// verbatim. Mounting mechanics are the engine's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    pub source: String,
    pub target: String,
}

/// What a user asks for when dispatching a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub image: String,
    pub worker_hostname: String,
    /// GPUs to pin, by vendor uuid. Passed to the engine as opaque strings.
    pub gpu_uuids: Vec<String>,
    pub duration_hours: u32,
    #[serde(default)]
    pub mounts: Vec<MountSpec>,
}

/// A user-facing job listing entry: the ledger row merged with whatever the
/// engine currently knows about the placement. `placement` is `None` when
/// the placement is gone (or the engine no longer knows the handle).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub job: Job,
    pub placement: Option<PlacementStatus>,
}

/// Job names are `<user>-<timestamp>-<nonce>`: readable, and unique even
/// when the same user dispatches twice within a second.
pub fn job_name(user_id: &str, start: &DateTime<Utc>) -> String {
    format!(
        "{}-{}-{}",
        user_id,
        start.format("%Y%m%d%H%M%S"),
        &uuid::Uuid::new_v4().to_string()[..8]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_job_name_format() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 13, 5, 9).unwrap();
        let name = job_name("u1", &start);
        assert!(name.starts_with("u1-20240301130509-"));
        assert_ne!(job_name("u1", &start), name);
    }
}
