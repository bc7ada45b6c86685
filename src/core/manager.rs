//! The allocation and dispatch coordinator.
//!
//! Every boundary operation goes through here: the access gate authorizes,
//! the catalog computes free GPUs from live inputs, and dispatch/removal
//! drive the orchestration engine and the job ledger in a fixed order. The
//! manager keeps no in-memory state between requests; everything durable
//! lives in the database, everything live is fetched from the engine.

use std::sync::Arc;

use chrono::{Duration, Utc};

use super::catalog::{self, ResourceView};
use super::db::{Database, NewJob, WorkerRegistration};
use super::error::{ManagerError, Result};
use super::job::{job_name, Job, JobRequest, JobView};
use super::permission::PermissionLevel;
use super::user::{RequestUser, User};
use super::worker::{Worker, WorkerSpec};
use crate::engine::{
    CredentialAttachment, CredentialStore, EngineError, OrchestrationEngine, PlacementHandle,
    PlacementSpec, RESOURCE_ENV,
};

const CREDENTIAL_PREFIX: &str = "gpool-key-";
/// Where the engine materializes the credential inside the container,
/// granting the owner login access to their job.
const CREDENTIAL_TARGET_PATH: &str = "/root/.ssh/authorized_keys";

#[derive(Clone)]
pub struct Manager {
    db: Database,
    engine: Arc<dyn OrchestrationEngine>,
    credentials: Arc<dyn CredentialStore>,
}

impl Manager {
    pub fn new(
        db: Database,
        engine: Arc<dyn OrchestrationEngine>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            db,
            engine,
            credentials,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    fn credential_name(user_id: &str) -> String {
        format!("{CREDENTIAL_PREFIX}{user_id}")
    }

    /// Usernames a rejected caller can contact.
    fn admin_contacts(&self) -> Result<Vec<String>> {
        let admins = self.db.users_with_permission(PermissionLevel::Admin)?;
        Ok(admins.into_iter().filter_map(|u| u.username).collect())
    }

    // ---- access control gate ---------------------------------------------

    /// Precondition check for every gated operation. As a side effect the
    /// acting user's cached profile fields are refreshed from the request
    /// claims, which keeps the directory current without a sync job.
    /// On success the acting user's directory row is returned.
    pub fn authorize(&self, acting: &RequestUser, required: PermissionLevel) -> Result<User> {
        self.db.update_user_details(
            &acting.user_id,
            acting.username.as_deref(),
            acting.full_name.as_deref(),
        )?;

        let user = self.db.get_user(&acting.user_id)?;

        if required == PermissionLevel::User && user.is_none() {
            tracing::debug!(user_id = %acting.user_id, "Unregistered user rejected");
            return Err(ManagerError::NotRegistered {
                admins: self.admin_contacts()?,
            });
        }

        match user {
            Some(user) if user.permission_level.satisfies(required) => Ok(user),
            _ => Err(ManagerError::PermissionDenied),
        }
    }

    // ---- directory operations --------------------------------------------

    /// Register `target_user_id` at plain user level. Admin-gated.
    pub fn register_user(&self, acting: &RequestUser, target_user_id: &str) -> Result<()> {
        self.authorize(acting, PermissionLevel::Admin)?;

        if self.db.is_registered(target_user_id)? {
            return Err(ManagerError::AlreadyRegistered {
                user_id: target_user_id.to_string(),
            });
        }

        tracing::info!(user_id = %target_user_id, "Registering user");
        self.db
            .register_user(target_user_id, PermissionLevel::User)?;
        Ok(())
    }

    /// Grant `level` to a registered user. Granting a level requires the
    /// grantor to hold the next-more-privileged level, so admins cannot
    /// mint other admins.
    pub fn set_permission(
        &self,
        acting: &RequestUser,
        target_user_id: &str,
        level: PermissionLevel,
    ) -> Result<()> {
        self.authorize(acting, level.higher_permission())?;

        if !self.db.is_registered(target_user_id)? {
            return Err(ManagerError::NotRegistered {
                admins: self.admin_contacts()?,
            });
        }

        tracing::info!(user_id = %target_user_id, level = %level, "Setting permission level");
        self.db.register_user(target_user_id, level)?;
        Ok(())
    }

    /// Rotate the acting user's credential in the external store. The old
    /// credential is removed first; if a running placement still references
    /// it the rotation fails with `CredentialInUse` and nothing changes.
    pub async fn set_credential(&self, acting: &RequestUser, blob: &str) -> Result<()> {
        let user = self.authorize(acting, PermissionLevel::User)?;
        let name = Self::credential_name(&user.id);

        if let Some(existing) = self.credentials.resolve(&name).await? {
            match self.credentials.remove(&existing).await {
                Ok(()) => {}
                Err(EngineError::CredentialInUse) => return Err(ManagerError::CredentialInUse),
                Err(e) => return Err(e.into()),
            }
            tracing::info!(credential = %name, "Removed previous credential");
        }

        let handle = self.credentials.store(&name, blob).await?;
        if handle.name != name {
            return Err(ManagerError::Runtime(format!(
                "credential store returned handle {} for {}",
                handle.name, name
            )));
        }

        self.db.set_credential_ref(&user.id, Some(&name))?;
        tracing::info!(user_id = %user.id, credential = %name, "Credential stored");
        Ok(())
    }

    pub fn check_credential(&self, acting: &RequestUser) -> Result<bool> {
        let user = self.authorize(acting, PermissionLevel::User)?;
        Ok(user.credential_ref.is_some())
    }

    /// Worker join. Ungated: workers announce themselves, and their join
    /// identity comes from the engine, not from us.
    pub fn register_worker(
        &self,
        spec: &WorkerSpec,
        peer_ip: Option<String>,
    ) -> Result<Worker> {
        let external_ip = spec.external_ip.clone().or(peer_ip);

        match self.db.register_worker(spec, external_ip.as_deref())? {
            WorkerRegistration::Registered(worker) => {
                tracing::info!(
                    hostname = %worker.hostname,
                    join_id = %worker.join_id,
                    gpus = spec.gpus.len(),
                    "Worker registered"
                );
                Ok(worker)
            }
            WorkerRegistration::Collision => {
                tracing::warn!(
                    hostname = %spec.hostname,
                    join_id = %spec.join_id,
                    "Worker join rejected: hostname/join-id collision"
                );
                Err(ManagerError::WorkerCollision {
                    hostname: spec.hostname.clone(),
                })
            }
        }
    }

    // ---- resource catalog ------------------------------------------------

    /// Online workers and their free GPUs, recomputed from scratch: node
    /// liveness comes from the engine (never from the directory), the busy
    /// set from the active ledger unioned with live placement labels.
    pub async fn list_resources(&self, acting: &RequestUser) -> Result<ResourceView> {
        self.authorize(acting, PermissionLevel::User)?;

        let nodes = self.engine.list_nodes().await?;
        let online = catalog::online_hostnames(&nodes);

        let workers = self.db.get_workers(&online)?;
        let gpus = self.db.gpus_by_workers(&online)?;

        let mut busy = self.db.busy_gpu_uuids()?;
        for placement in self.engine.list_placements().await? {
            busy.extend(placement.gpu_uuids());
        }

        Ok(catalog::free_resources(workers, gpus, &busy))
    }

    // ---- job lifecycle ---------------------------------------------------

    /// Dispatch a job. Preconditions are checked in order and short-circuit;
    /// the ledger row is written only after the engine has confirmed the
    /// placement, so there is never a Job row without an attempted
    /// placement. Two racing dispatches over the same GPU are resolved by
    /// the engine, not by us.
    pub async fn dispatch(&self, acting: &RequestUser, request: &JobRequest) -> Result<Job> {
        let user = self.authorize(acting, PermissionLevel::User)?;

        let worker = self
            .db
            .get_worker(&request.worker_hostname)?
            .ok_or_else(|| ManagerError::NotFound(format!("worker {}", request.worker_hostname)))?;

        let cred_name = user
            .credential_ref
            .clone()
            .ok_or(ManagerError::CredentialMissing)?;
        // The reference may have gone stale behind our back; trust the
        // external store, not the cache.
        let credential = self
            .credentials
            .resolve(&cred_name)
            .await?
            .ok_or(ManagerError::CredentialMissing)?;

        let start = Utc::now();
        let expected_end = start + Duration::hours(i64::from(request.duration_hours));
        let name = job_name(&user.id, &start);

        let spec = PlacementSpec {
            name: name.clone(),
            image: request.image.clone(),
            constraints: vec![format!("node.hostname=={}", worker.hostname)],
            env: request
                .gpu_uuids
                .iter()
                .map(|uuid| format!("{RESOURCE_ENV}={uuid}"))
                .collect(),
            labels: PlacementSpec::job_labels(&user.id, &expected_end, &request.gpu_uuids),
            credential: Some(CredentialAttachment {
                handle: credential,
                target_path: CREDENTIAL_TARGET_PATH.to_string(),
            }),
            mounts: request.mounts.clone(),
        };

        let handle = self.engine.create_placement(&spec).await?;

        let job = self.db.insert_job(&NewJob {
            name,
            user_id: user.id.clone(),
            image: request.image.clone(),
            worker_hostname: worker.hostname.clone(),
            gpu_uuids: request.gpu_uuids.clone(),
            mounts: request.mounts.clone(),
            service_handle: handle.id.clone(),
            start_time: start,
            expected_end_time: expected_end,
        })?;

        tracing::info!(
            job_id = job.id,
            user_id = %user.id,
            worker = %job.worker_hostname,
            gpus = ?job.gpu_uuids,
            handle = %handle.id,
            "Job dispatched"
        );

        Ok(job)
    }

    /// The acting user's jobs, each merged with whatever the engine knows
    /// live. The ledger has history, the engine has runtime state; neither
    /// alone is a complete view.
    pub async fn list_jobs(&self, acting: &RequestUser) -> Result<Vec<JobView>> {
        let user = self.authorize(acting, PermissionLevel::User)?;

        let mut views = Vec::new();
        for job in self.db.jobs_for_user(&user.id)? {
            let placement = if job.is_active() {
                self.engine
                    .placement_status(&PlacementHandle {
                        id: job.service_handle.clone(),
                    })
                    .await?
            } else {
                None
            };
            views.push(JobView { job, placement });
        }
        Ok(views)
    }

    /// Tear a job down. Owners may remove their own jobs; admins anyone's.
    /// The external teardown comes first — if it fails the row stays
    /// active so the removal can be retried, rather than losing track of a
    /// running placement. Removing an already-ended job is a no-op.
    pub async fn remove_job(&self, acting: &RequestUser, job_id: i64) -> Result<()> {
        let user = self.authorize(acting, PermissionLevel::User)?;

        let job = self
            .db
            .get_job(job_id)?
            .ok_or_else(|| ManagerError::NotFound(format!("job {job_id}")))?;

        let owns = job.user_id == user.id;
        if !owns && !user.permission_level.satisfies(PermissionLevel::Admin) {
            return Err(ManagerError::PermissionDenied);
        }

        if job.end_time.is_some() {
            return Ok(());
        }

        self.engine
            .remove_placement(&PlacementHandle {
                id: job.service_handle.clone(),
            })
            .await?;
        self.db.end_job(job.id, Utc::now())?;

        tracing::info!(job_id = job.id, user_id = %user.id, "Job removed");
        Ok(())
    }

    /// Tear down jobs that outlived their reservation. Runs from the
    /// daemon's background task; a failed teardown is retried on the next
    /// tick because the row is only stamped after the engine confirms.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut swept = 0;

        for job in self.db.expired_jobs(now)? {
            let handle = PlacementHandle {
                id: job.service_handle.clone(),
            };
            match self.engine.remove_placement(&handle).await {
                Ok(()) => {
                    self.db.end_job(job.id, now)?;
                    tracing::info!(
                        job_id = job.id,
                        user_id = %job.user_id,
                        expected_end = %job.expected_end_time,
                        "Expired job torn down"
                    );
                    swept += 1;
                }
                Err(e) => {
                    tracing::warn!(job_id = job.id, error = %e, "Failed to tear down expired job");
                }
            }
        }

        Ok(swept)
    }
}
