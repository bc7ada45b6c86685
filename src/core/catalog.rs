//! Free-resource computation.
//!
//! "Is this GPU free" depends on two independently-changing facts — node
//! liveness and the active job set — that must be read together at request
//! time. Nothing here is cached or persisted; the manager feeds this
//! function live inputs on every listing.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::worker::{Gpu, Worker};
use crate::engine::NodeStatus;

/// What `list_resources` returns: online workers and, per worker, the GPUs
/// not pinned by any active job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceView {
    pub workers: HashMap<String, Worker>,
    pub gpus: HashMap<String, Vec<Gpu>>,
}

impl ResourceView {
    pub fn free_uuids(&self) -> HashSet<&str> {
        self.gpus
            .values()
            .flatten()
            .map(|gpu| gpu.uuid.as_str())
            .collect()
    }
}

/// Hostnames of nodes that are ready and active right now.
pub fn online_hostnames(nodes: &[NodeStatus]) -> Vec<String> {
    nodes
        .iter()
        .filter(|n| n.is_online())
        .map(|n| n.hostname.clone())
        .collect()
}

/// Join directory rows with live state: keep online workers, drop busy GPUs.
/// Workers with no free GPU left still appear, with an empty list — the
/// worker itself is online and reservable for follow-up requests.
pub fn free_resources(
    workers: Vec<Worker>,
    mut gpus_by_worker: HashMap<String, Vec<Gpu>>,
    busy: &HashSet<String>,
) -> ResourceView {
    let mut view = ResourceView::default();

    for worker in workers {
        let gpus = gpus_by_worker
            .remove(&worker.hostname)
            .unwrap_or_default()
            .into_iter()
            .filter(|gpu| !busy.contains(&gpu.uuid))
            .collect();
        view.gpus.insert(worker.hostname.clone(), gpus);
        view.workers.insert(worker.hostname.clone(), worker);
    }

    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{NodeAvailability, NodeState};
    use chrono::Utc;

    fn worker(hostname: &str) -> Worker {
        Worker {
            hostname: hostname.to_string(),
            external_ip: None,
            join_id: format!("join-{hostname}"),
            storage_root: None,
            info: serde_json::Value::Null,
            first_seen_at: Utc::now(),
            last_seen_at: Utc::now(),
        }
    }

    fn gpu(hostname: &str, uuid: &str, index: u32) -> Gpu {
        Gpu {
            uuid: uuid.to_string(),
            worker_hostname: hostname.to_string(),
            index,
            name: "NVIDIA A100".to_string(),
            total_memory_mib: 40_960,
            info: serde_json::Value::Null,
        }
    }

    fn node(hostname: &str, state: NodeState, availability: NodeAvailability) -> NodeStatus {
        NodeStatus {
            hostname: hostname.to_string(),
            state,
            availability,
            addr: None,
        }
    }

    #[test]
    fn test_online_filter() {
        let nodes = vec![
            node("w1", NodeState::Ready, NodeAvailability::Active),
            node("w2", NodeState::Down, NodeAvailability::Active),
            node("w3", NodeState::Ready, NodeAvailability::Drain),
        ];
        assert_eq!(online_hostnames(&nodes), vec!["w1".to_string()]);
    }

    #[test]
    fn test_busy_gpus_excluded() {
        let gpus = HashMap::from([(
            "w1".to_string(),
            vec![gpu("w1", "GPU-a", 0), gpu("w1", "GPU-b", 1)],
        )]);
        let busy = HashSet::from(["GPU-a".to_string()]);

        let view = free_resources(vec![worker("w1")], gpus, &busy);
        let free: Vec<_> = view.gpus["w1"].iter().map(|g| g.uuid.as_str()).collect();
        assert_eq!(free, vec!["GPU-b"]);
    }

    #[test]
    fn test_fully_busy_worker_still_listed() {
        let gpus = HashMap::from([("w1".to_string(), vec![gpu("w1", "GPU-a", 0)])]);
        let busy = HashSet::from(["GPU-a".to_string()]);

        let view = free_resources(vec![worker("w1")], gpus, &busy);
        assert!(view.workers.contains_key("w1"));
        assert!(view.gpus["w1"].is_empty());
    }

    #[test]
    fn test_worker_without_gpus() {
        let view = free_resources(vec![worker("w1")], HashMap::new(), &HashSet::new());
        assert!(view.gpus["w1"].is_empty());
        assert!(view.free_uuids().is_empty());
    }
}
