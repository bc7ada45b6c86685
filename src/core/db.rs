use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use super::job::{Job, MountSpec};
use super::permission::PermissionLevel;
use super::user::User;
use super::worker::{Gpu, Worker, WorkerSpec};

const SCHEMA_SQL: &str = r#"
-- Directory: users, workers, gpus. Rows are never deleted.
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT UNIQUE,
    full_name TEXT,
    permission_level INTEGER NOT NULL DEFAULT 2,
    credential_ref TEXT,
    created_at INTEGER NOT NULL DEFAULT (unixepoch()),
    updated_at INTEGER NOT NULL DEFAULT (unixepoch()),
    CHECK (permission_level BETWEEN 0 AND 2)
);

CREATE TABLE IF NOT EXISTS workers (
    hostname TEXT PRIMARY KEY,
    external_ip TEXT,
    join_id TEXT NOT NULL UNIQUE,
    storage_root TEXT,
    info TEXT NOT NULL DEFAULT '{}',
    first_seen_at INTEGER NOT NULL DEFAULT (unixepoch()),
    last_seen_at INTEGER NOT NULL DEFAULT (unixepoch())
);

-- uuid is the durable GPU identity; (worker_hostname, idx) is kept unique
-- for display ordering.
CREATE TABLE IF NOT EXISTS gpus (
    uuid TEXT PRIMARY KEY,
    worker_hostname TEXT NOT NULL,
    idx INTEGER NOT NULL,
    name TEXT NOT NULL,
    total_memory_mib INTEGER NOT NULL,
    info TEXT NOT NULL DEFAULT '{}',
    FOREIGN KEY (worker_hostname) REFERENCES workers(hostname),
    UNIQUE (worker_hostname, idx)
);

-- Job ledger. Completion stamps end_time; rows stay forever (audit trail).
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    user_id TEXT NOT NULL,
    image TEXT NOT NULL,
    worker_hostname TEXT NOT NULL,
    service_handle TEXT NOT NULL UNIQUE,
    mounts TEXT,
    start_time INTEGER NOT NULL,
    expected_end_time INTEGER NOT NULL,
    end_time INTEGER,
    FOREIGN KEY (user_id) REFERENCES users(id),
    FOREIGN KEY (worker_hostname) REFERENCES workers(hostname)
);

CREATE TABLE IF NOT EXISTS jobs_gpus (
    job_id INTEGER NOT NULL,
    gpu_uuid TEXT NOT NULL,
    PRIMARY KEY (job_id, gpu_uuid),
    FOREIGN KEY (job_id) REFERENCES jobs(id)
);

CREATE TABLE IF NOT EXISTS manager_metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT (unixepoch())
);

-- Indexes for the hot read paths
CREATE INDEX IF NOT EXISTS idx_jobs_active ON jobs(id) WHERE end_time IS NULL;
CREATE INDEX IF NOT EXISTS idx_jobs_user ON jobs(user_id);
CREATE INDEX IF NOT EXISTS idx_jobs_expiry ON jobs(expected_end_time) WHERE end_time IS NULL;
CREATE INDEX IF NOT EXISTS idx_gpus_worker ON gpus(worker_hostname, idx);
CREATE INDEX IF NOT EXISTS idx_users_permission ON users(permission_level);
"#;

/// Fields of a job that exist before the ledger row does. The id is
/// assigned on insert.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub user_id: String,
    pub image: String,
    pub worker_hostname: String,
    pub gpu_uuids: Vec<String>,
    pub mounts: Vec<MountSpec>,
    pub service_handle: String,
    pub start_time: DateTime<Utc>,
    pub expected_end_time: DateTime<Utc>,
}

/// Outcome of a worker join. A collision never touches the existing row.
#[derive(Debug)]
pub enum WorkerRegistration {
    Registered(Worker),
    Collision,
}

/// Database handle over the directory store and the job ledger, with
/// connection pooling.
#[derive(Clone)]
pub struct Database {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let manager = SqliteConnectionManager::file(&db_path).with_init(|conn| {
            conn.execute("PRAGMA foreign_keys = ON", [])?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA busy_timeout = 5000;",
            )?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(10)
            .min_idle(Some(2))
            .build(manager)
            .context("Failed to create connection pool")?;

        let db = Self {
            pool: Arc::new(pool),
        };

        db.initialize_schema()?;
        Ok(db)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;

        if self.get_metadata("schema_version")?.is_none() {
            self.set_metadata("schema_version", "1")?;
        }

        Ok(())
    }

    /// Health check - verify database connectivity
    pub fn health_check(&self) -> Result<()> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .context("Database health check failed")?;
        Ok(())
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        let result: Option<String> = conn
            .query_row(
                "SELECT value FROM manager_metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to get metadata")?;
        Ok(result)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        conn.execute(
            "INSERT INTO manager_metadata (key, value, updated_at)
             VALUES (?1, ?2, unixepoch())
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = unixepoch()",
            params![key, value],
        )
        .context("Failed to set metadata")?;
        Ok(())
    }

    // ---- users -----------------------------------------------------------

    /// Ensure the bootstrap owner exists with owner privileges. Run once at
    /// daemon startup.
    pub fn bootstrap_owner(&self, owner_id: &str) -> Result<()> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        conn.execute(
            "INSERT INTO users (id, permission_level) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET permission_level = ?2, updated_at = unixepoch()",
            params![owner_id, PermissionLevel::Owner as u8],
        )
        .context("Failed to bootstrap owner")?;
        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        conn.query_row(
            "SELECT * FROM users WHERE id = ?1",
            params![user_id],
            row_to_user,
        )
        .optional()
        .context("Failed to get user")
    }

    pub fn is_registered(&self, user_id: &str) -> Result<bool> {
        Ok(self.get_user(user_id)?.is_some())
    }

    /// Create the user (or update the level of an existing one).
    pub fn register_user(&self, user_id: &str, level: PermissionLevel) -> Result<()> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        conn.execute(
            "INSERT INTO users (id, permission_level) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET permission_level = ?2, updated_at = unixepoch()",
            params![user_id, level as u8],
        )
        .context("Failed to register user")?;
        Ok(())
    }

    /// Refresh the denormalized identity fields from request claims.
    /// A no-op for unknown users.
    pub fn update_user_details(
        &self,
        user_id: &str,
        username: Option<&str>,
        full_name: Option<&str>,
    ) -> Result<()> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        conn.execute(
            "UPDATE users SET username = ?2, full_name = ?3, updated_at = unixepoch()
             WHERE id = ?1",
            params![user_id, username, full_name],
        )
        .context("Failed to update user details")?;
        Ok(())
    }

    /// Users holding `level` or better, most privileged first.
    pub fn users_with_permission(&self, level: PermissionLevel) -> Result<Vec<User>> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        let mut stmt = conn
            .prepare(
                "SELECT * FROM users WHERE permission_level <= ?1 ORDER BY permission_level, id",
            )
            .context("Failed to prepare permission query")?;
        let users = stmt
            .query_map(params![level as u8], row_to_user)
            .context("Failed to query users by permission")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to collect users")?;
        Ok(users)
    }

    pub fn set_credential_ref(&self, user_id: &str, credential_ref: Option<&str>) -> Result<()> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        conn.execute(
            "UPDATE users SET credential_ref = ?2, updated_at = unixepoch() WHERE id = ?1",
            params![user_id, credential_ref],
        )
        .context("Failed to set credential reference")?;
        Ok(())
    }

    // ---- workers and gpus ------------------------------------------------

    /// Idempotent worker join. Re-announcing under the same join id updates
    /// the mutable fields in place and registers any GPUs not yet known
    /// (known GPUs, matched by uuid, are left untouched). A hostname bound
    /// to a different join id — or a join id already bound to a different
    /// hostname — is a collision and changes nothing.
    pub fn register_worker(
        &self,
        spec: &WorkerSpec,
        external_ip: Option<&str>,
    ) -> Result<WorkerRegistration> {
        let mut conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        let existing_join_id: Option<String> = tx
            .query_row(
                "SELECT join_id FROM workers WHERE hostname = ?1",
                params![spec.hostname],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up worker")?;

        match existing_join_id {
            Some(join_id) if join_id != spec.join_id => {
                return Ok(WorkerRegistration::Collision);
            }
            Some(_) => {
                tx.execute(
                    "UPDATE workers SET external_ip = ?2, storage_root = ?3, info = ?4,
                            last_seen_at = unixepoch()
                     WHERE hostname = ?1",
                    params![
                        spec.hostname,
                        external_ip,
                        spec.storage_root,
                        spec.info.to_string(),
                    ],
                )
                .context("Failed to update worker")?;
            }
            None => {
                let claimed: Option<String> = tx
                    .query_row(
                        "SELECT hostname FROM workers WHERE join_id = ?1",
                        params![spec.join_id],
                        |row| row.get(0),
                    )
                    .optional()
                    .context("Failed to look up join id")?;
                if claimed.is_some() {
                    return Ok(WorkerRegistration::Collision);
                }

                tx.execute(
                    "INSERT INTO workers (hostname, external_ip, join_id, storage_root, info)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        spec.hostname,
                        external_ip,
                        spec.join_id,
                        spec.storage_root,
                        spec.info.to_string(),
                    ],
                )
                .context("Failed to insert worker")?;
            }
        }

        for gpu in &spec.gpus {
            tx.execute(
                "INSERT INTO gpus (uuid, worker_hostname, idx, name, total_memory_mib, info)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(uuid) DO NOTHING",
                params![
                    gpu.uuid,
                    spec.hostname,
                    gpu.index,
                    gpu.name,
                    gpu.total_memory_mib,
                    gpu.info.to_string(),
                ],
            )
            .context("Failed to register gpu")?;
        }

        tx.commit().context("Failed to commit worker registration")?;

        let worker = self
            .get_worker(&spec.hostname)?
            .context("Worker vanished after registration")?;
        Ok(WorkerRegistration::Registered(worker))
    }

    pub fn get_worker(&self, hostname: &str) -> Result<Option<Worker>> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        conn.query_row(
            "SELECT * FROM workers WHERE hostname = ?1",
            params![hostname],
            row_to_worker,
        )
        .optional()
        .context("Failed to get worker")
    }

    pub fn get_workers(&self, hostnames: &[String]) -> Result<Vec<Worker>> {
        if hostnames.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;

        let placeholders = hostnames.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let query = format!(
            "SELECT * FROM workers WHERE hostname IN ({}) ORDER BY hostname",
            placeholders
        );
        let mut stmt = conn
            .prepare(&query)
            .context("Failed to prepare workers query")?;
        let params: Vec<&dyn rusqlite::ToSql> = hostnames
            .iter()
            .map(|h| h as &dyn rusqlite::ToSql)
            .collect();
        let workers = stmt
            .query_map(params.as_slice(), row_to_worker)
            .context("Failed to query workers")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to collect workers")?;
        Ok(workers)
    }

    /// GPUs of the given workers, grouped by hostname, index order.
    pub fn gpus_by_workers(&self, hostnames: &[String]) -> Result<HashMap<String, Vec<Gpu>>> {
        if hostnames.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;

        let placeholders = hostnames.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let query = format!(
            "SELECT * FROM gpus WHERE worker_hostname IN ({}) ORDER BY worker_hostname, idx",
            placeholders
        );
        let mut stmt = conn
            .prepare(&query)
            .context("Failed to prepare gpus query")?;
        let params: Vec<&dyn rusqlite::ToSql> = hostnames
            .iter()
            .map(|h| h as &dyn rusqlite::ToSql)
            .collect();
        let gpus: Vec<Gpu> = stmt
            .query_map(params.as_slice(), row_to_gpu)
            .context("Failed to query gpus")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to collect gpus")?;

        let mut by_worker: HashMap<String, Vec<Gpu>> = HashMap::new();
        for gpu in gpus {
            by_worker
                .entry(gpu.worker_hostname.clone())
                .or_default()
                .push(gpu);
        }
        Ok(by_worker)
    }

    // ---- job ledger ------------------------------------------------------

    /// The single logical write of a dispatch: job row plus its GPU set,
    /// one transaction. This is the point after which the GPUs count as
    /// busy.
    pub fn insert_job(&self, new: &NewJob) -> Result<Job> {
        let mut conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        let mounts_json = if new.mounts.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&new.mounts).context("Failed to encode mounts")?)
        };

        tx.execute(
            "INSERT INTO jobs (name, user_id, image, worker_hostname, service_handle,
                               mounts, start_time, expected_end_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.name,
                new.user_id,
                new.image,
                new.worker_hostname,
                new.service_handle,
                mounts_json,
                new.start_time.timestamp(),
                new.expected_end_time.timestamp(),
            ],
        )
        .context("Failed to insert job")?;

        let job_id = tx.last_insert_rowid();
        for uuid in &new.gpu_uuids {
            tx.execute(
                "INSERT INTO jobs_gpus (job_id, gpu_uuid) VALUES (?1, ?2)",
                params![job_id, uuid],
            )
            .context("Failed to insert job gpu")?;
        }

        tx.commit().context("Failed to commit job insert")?;

        self.get_job(job_id)?.context("Job vanished after insert")
    }

    pub fn get_job(&self, job_id: i64) -> Result<Option<Job>> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;

        let job_opt = conn
            .query_row(
                "SELECT * FROM jobs WHERE id = ?1",
                params![job_id],
                row_to_job,
            )
            .optional()
            .context("Failed to get job")?;

        let Some(mut job) = job_opt else {
            return Ok(None);
        };

        let mut stmt = conn
            .prepare("SELECT gpu_uuid FROM jobs_gpus WHERE job_id = ?1 ORDER BY gpu_uuid")
            .context("Failed to prepare job gpus query")?;
        job.gpu_uuids = stmt
            .query_map(params![job_id], |row| row.get(0))
            .context("Failed to query job gpus")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to collect job gpus")?;

        Ok(Some(job))
    }

    /// Stamp `end_time`. The caller is responsible for tearing the external
    /// placement down first. Once set, the stamp never changes.
    pub fn end_job(&self, job_id: i64, end_time: DateTime<Utc>) -> Result<()> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        conn.execute(
            "UPDATE jobs SET end_time = ?2 WHERE id = ?1 AND end_time IS NULL",
            params![job_id, end_time.timestamp()],
        )
        .context("Failed to end job")?;
        Ok(())
    }

    pub fn active_jobs(&self) -> Result<Vec<Job>> {
        self.query_jobs("SELECT * FROM jobs WHERE end_time IS NULL ORDER BY id", &[])
    }

    pub fn jobs_for_user(&self, user_id: &str) -> Result<Vec<Job>> {
        self.query_jobs(
            "SELECT * FROM jobs WHERE user_id = ?1 ORDER BY id",
            &[&user_id],
        )
    }

    /// Active jobs whose expected end has passed.
    pub fn expired_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let ts = now.timestamp();
        self.query_jobs(
            "SELECT * FROM jobs WHERE end_time IS NULL AND expected_end_time <= ?1 ORDER BY id",
            &[&ts],
        )
    }

    /// uuids pinned by any active job. The busy set is always derived from
    /// here; it is never stored.
    pub fn busy_gpu_uuids(&self) -> Result<HashSet<String>> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        let mut stmt = conn
            .prepare(
                "SELECT jg.gpu_uuid FROM jobs_gpus jg
                 JOIN jobs j ON j.id = jg.job_id
                 WHERE j.end_time IS NULL",
            )
            .context("Failed to prepare busy gpus query")?;
        let uuids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("Failed to query busy gpus")?
            .collect::<std::result::Result<HashSet<_>, _>>()
            .context("Failed to collect busy gpus")?;
        Ok(uuids)
    }

    fn query_jobs(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Job>> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;

        let mut stmt = conn.prepare(sql).context("Failed to prepare jobs query")?;
        let mut jobs: Vec<Job> = stmt
            .query_map(params, row_to_job)
            .context("Failed to query jobs")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to collect jobs")?;

        if jobs.is_empty() {
            return Ok(jobs);
        }

        // Attach GPU sets in one pass.
        let job_ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();
        let placeholders = job_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let query = format!(
            "SELECT job_id, gpu_uuid FROM jobs_gpus WHERE job_id IN ({}) ORDER BY job_id, gpu_uuid",
            placeholders
        );
        let mut stmt = conn
            .prepare(&query)
            .context("Failed to prepare job gpus query")?;
        let id_params: Vec<&dyn rusqlite::ToSql> = job_ids
            .iter()
            .map(|id| id as &dyn rusqlite::ToSql)
            .collect();
        let assignments: Vec<(i64, String)> = stmt
            .query_map(id_params.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))
            .context("Failed to query job gpus")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to collect job gpus")?;

        let mut gpu_map: HashMap<i64, Vec<String>> = HashMap::new();
        for (job_id, uuid) in assignments {
            gpu_map.entry(job_id).or_default().push(uuid);
        }

        for job in jobs.iter_mut() {
            if let Some(uuids) = gpu_map.remove(&job.id) {
                job.gpu_uuids = uuids;
            }
        }

        Ok(jobs)
    }
}

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    let level: u8 = row.get("permission_level")?;
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        full_name: row.get("full_name")?,
        permission_level: PermissionLevel::from_repr(level).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Integer,
                format!("invalid permission level {level}").into(),
            )
        })?,
        credential_ref: row.get("credential_ref")?,
    })
}

fn row_to_worker(row: &Row) -> rusqlite::Result<Worker> {
    let info_json: String = row.get("info")?;
    Ok(Worker {
        hostname: row.get("hostname")?,
        external_ip: row.get("external_ip")?,
        join_id: row.get("join_id")?,
        storage_root: row.get("storage_root")?,
        info: parse_json_column(info_json),
        first_seen_at: unix_to_utc(row.get("first_seen_at")?),
        last_seen_at: unix_to_utc(row.get("last_seen_at")?),
    })
}

fn row_to_gpu(row: &Row) -> rusqlite::Result<Gpu> {
    let info_json: String = row.get("info")?;
    Ok(Gpu {
        uuid: row.get("uuid")?,
        worker_hostname: row.get("worker_hostname")?,
        index: row.get("idx")?,
        name: row.get("name")?,
        total_memory_mib: row.get("total_memory_mib")?,
        info: parse_json_column(info_json),
    })
}

fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
    let mounts_json: Option<String> = row.get("mounts")?;
    let mounts: Vec<MountSpec> = mounts_json
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?
        .unwrap_or_default();

    let end_time: Option<i64> = row.get("end_time")?;

    Ok(Job {
        id: row.get("id")?,
        name: row.get("name")?,
        user_id: row.get("user_id")?,
        image: row.get("image")?,
        worker_hostname: row.get("worker_hostname")?,
        gpu_uuids: Vec::new(), // Loaded separately
        mounts,
        service_handle: row.get("service_handle")?,
        start_time: unix_to_utc(row.get("start_time")?),
        expected_end_time: unix_to_utc(row.get("expected_end_time")?),
        end_time: end_time.map(unix_to_utc),
    })
}

fn unix_to_utc(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn parse_json_column(json: String) -> serde_json::Value {
    serde_json::from_str(&json).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::worker::GpuSpec;
    use chrono::Duration;
    use tempfile::TempDir;

    fn create_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(db_path).unwrap();
        (db, temp_dir)
    }

    fn worker_spec(hostname: &str, join_id: &str, gpu_uuids: &[&str]) -> WorkerSpec {
        WorkerSpec {
            hostname: hostname.to_string(),
            external_ip: None,
            join_id: join_id.to_string(),
            storage_root: None,
            gpus: gpu_uuids
                .iter()
                .enumerate()
                .map(|(i, uuid)| GpuSpec {
                    uuid: uuid.to_string(),
                    index: i as u32,
                    name: "NVIDIA A100".to_string(),
                    total_memory_mib: 40_960,
                    info: serde_json::Value::Null,
                })
                .collect(),
            info: serde_json::json!({"platform": "linux"}),
        }
    }

    fn insert_test_job(db: &Database, user: &str, worker: &str, uuids: &[&str]) -> Job {
        let start = Utc::now();
        db.insert_job(&NewJob {
            name: format!("{user}-test"),
            user_id: user.to_string(),
            image: "pytorch:latest".to_string(),
            worker_hostname: worker.to_string(),
            gpu_uuids: uuids.iter().map(|s| s.to_string()).collect(),
            mounts: vec![],
            service_handle: format!("svc-{user}-{}", uuids.join("-")),
            start_time: start,
            expected_end_time: start + Duration::hours(2),
        })
        .unwrap()
    }

    #[test]
    fn test_database_creation() {
        let (db, _temp) = create_test_db();
        assert!(db.health_check().is_ok());
        assert_eq!(
            db.get_metadata("schema_version").unwrap(),
            Some("1".to_string())
        );
    }

    #[test]
    fn test_bootstrap_owner() {
        let (db, _temp) = create_test_db();
        db.bootstrap_owner("owner-1").unwrap();

        let owner = db.get_user("owner-1").unwrap().unwrap();
        assert_eq!(owner.permission_level, PermissionLevel::Owner);

        // Bootstrapping again keeps a single row and owner privileges.
        db.bootstrap_owner("owner-1").unwrap();
        let admins = db.users_with_permission(PermissionLevel::Admin).unwrap();
        assert_eq!(admins.len(), 1);
    }

    #[test]
    fn test_register_and_update_user() {
        let (db, _temp) = create_test_db();
        db.register_user("u1", PermissionLevel::User).unwrap();
        assert!(db.is_registered("u1").unwrap());
        assert!(!db.is_registered("u2").unwrap());

        db.update_user_details("u1", Some("ada"), Some("Ada Lovelace"))
            .unwrap();
        let user = db.get_user("u1").unwrap().unwrap();
        assert_eq!(user.username.as_deref(), Some("ada"));
        assert_eq!(user.full_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(user.permission_level, PermissionLevel::User);

        // Details update for an unknown user changes nothing.
        db.update_user_details("ghost", Some("ghost"), None)
            .unwrap();
        assert!(!db.is_registered("ghost").unwrap());
    }

    #[test]
    fn test_credential_ref_round_trip() {
        let (db, _temp) = create_test_db();
        db.register_user("u1", PermissionLevel::User).unwrap();

        assert!(db.get_user("u1").unwrap().unwrap().credential_ref.is_none());
        db.set_credential_ref("u1", Some("gpool-key-u1")).unwrap();
        assert_eq!(
            db.get_user("u1")
                .unwrap()
                .unwrap()
                .credential_ref
                .as_deref(),
            Some("gpool-key-u1")
        );
        db.set_credential_ref("u1", None).unwrap();
        assert!(db.get_user("u1").unwrap().unwrap().credential_ref.is_none());
    }

    #[test]
    fn test_worker_registration_idempotent() {
        let (db, _temp) = create_test_db();

        let spec = worker_spec("gpu-box-1", "join-1", &["GPU-aaa", "GPU-bbb"]);
        let first = db.register_worker(&spec, Some("10.0.0.5")).unwrap();
        assert!(matches!(first, WorkerRegistration::Registered(_)));

        // Same join id: update in place, no duplicate gpus.
        let again = db.register_worker(&spec, Some("10.0.0.9")).unwrap();
        let WorkerRegistration::Registered(worker) = again else {
            panic!("expected idempotent registration");
        };
        assert_eq!(worker.external_ip.as_deref(), Some("10.0.0.9"));

        let gpus = db
            .gpus_by_workers(&["gpu-box-1".to_string()])
            .unwrap()
            .remove("gpu-box-1")
            .unwrap();
        assert_eq!(gpus.len(), 2);
        assert_eq!(gpus[0].uuid, "GPU-aaa");
    }

    #[test]
    fn test_worker_collision_leaves_row_unchanged() {
        let (db, _temp) = create_test_db();

        let spec = worker_spec("gpu-box-1", "join-1", &["GPU-aaa"]);
        db.register_worker(&spec, Some("10.0.0.5")).unwrap();

        let imposter = worker_spec("gpu-box-1", "join-2", &["GPU-zzz"]);
        let outcome = db.register_worker(&imposter, Some("10.9.9.9")).unwrap();
        assert!(matches!(outcome, WorkerRegistration::Collision));

        let worker = db.get_worker("gpu-box-1").unwrap().unwrap();
        assert_eq!(worker.join_id, "join-1");
        assert_eq!(worker.external_ip.as_deref(), Some("10.0.0.5"));
        let gpus = db.gpus_by_workers(&["gpu-box-1".to_string()]).unwrap();
        assert_eq!(gpus["gpu-box-1"].len(), 1);
    }

    #[test]
    fn test_join_id_claimed_by_other_hostname_is_collision() {
        let (db, _temp) = create_test_db();

        db.register_worker(&worker_spec("gpu-box-1", "join-1", &[]), None)
            .unwrap();
        let outcome = db
            .register_worker(&worker_spec("gpu-box-2", "join-1", &[]), None)
            .unwrap();
        assert!(matches!(outcome, WorkerRegistration::Collision));
        assert!(db.get_worker("gpu-box-2").unwrap().is_none());
    }

    #[test]
    fn test_existing_gpu_rows_untouched_on_rejoin() {
        let (db, _temp) = create_test_db();

        let mut spec = worker_spec("gpu-box-1", "join-1", &["GPU-aaa"]);
        db.register_worker(&spec, None).unwrap();

        // Re-announce with a changed name for a known uuid plus a new card.
        spec.gpus[0].name = "Renamed".to_string();
        spec.gpus.push(GpuSpec {
            uuid: "GPU-bbb".to_string(),
            index: 1,
            name: "NVIDIA A100".to_string(),
            total_memory_mib: 40_960,
            info: serde_json::Value::Null,
        });
        db.register_worker(&spec, None).unwrap();

        let gpus = db
            .gpus_by_workers(&["gpu-box-1".to_string()])
            .unwrap()
            .remove("gpu-box-1")
            .unwrap();
        assert_eq!(gpus.len(), 2);
        // Known row kept its original fields.
        assert_eq!(gpus[0].name, "NVIDIA A100");
    }

    #[test]
    fn test_job_insert_and_get() {
        let (db, _temp) = create_test_db();
        db.register_user("u1", PermissionLevel::User).unwrap();
        db.register_worker(&worker_spec("gpu-box-1", "join-1", &["GPU-aaa"]), None)
            .unwrap();

        let job = insert_test_job(&db, "u1", "gpu-box-1", &["GPU-aaa"]);
        assert!(job.id > 0);
        assert!(job.is_active());

        let fetched = db.get_job(job.id).unwrap().unwrap();
        assert_eq!(fetched.gpu_uuids, vec!["GPU-aaa"]);
        assert_eq!(fetched.user_id, "u1");
        assert!(fetched.end_time.is_none());
    }

    #[test]
    fn test_busy_gpus_and_end_job() {
        let (db, _temp) = create_test_db();
        db.register_user("u1", PermissionLevel::User).unwrap();
        db.register_worker(
            &worker_spec("gpu-box-1", "join-1", &["GPU-aaa", "GPU-bbb"]),
            None,
        )
        .unwrap();

        let job = insert_test_job(&db, "u1", "gpu-box-1", &["GPU-aaa"]);
        let busy = db.busy_gpu_uuids().unwrap();
        assert!(busy.contains("GPU-aaa"));
        assert!(!busy.contains("GPU-bbb"));

        db.end_job(job.id, Utc::now()).unwrap();
        assert!(db.busy_gpu_uuids().unwrap().is_empty());

        let ended = db.get_job(job.id).unwrap().unwrap();
        assert!(ended.end_time.is_some());
        // The ledger row survives completion.
        assert_eq!(db.jobs_for_user("u1").unwrap().len(), 1);
    }

    #[test]
    fn test_end_job_only_stamps_once() {
        let (db, _temp) = create_test_db();
        db.register_user("u1", PermissionLevel::User).unwrap();
        db.register_worker(&worker_spec("gpu-box-1", "join-1", &["GPU-aaa"]), None)
            .unwrap();

        let job = insert_test_job(&db, "u1", "gpu-box-1", &["GPU-aaa"]);
        let first_end = Utc::now();
        db.end_job(job.id, first_end).unwrap();
        db.end_job(job.id, first_end + Duration::hours(1)).unwrap();

        let stored = db.get_job(job.id).unwrap().unwrap();
        assert_eq!(stored.end_time.unwrap().timestamp(), first_end.timestamp());
    }

    #[test]
    fn test_expired_jobs() {
        let (db, _temp) = create_test_db();
        db.register_user("u1", PermissionLevel::User).unwrap();
        db.register_worker(
            &worker_spec("gpu-box-1", "join-1", &["GPU-aaa", "GPU-bbb"]),
            None,
        )
        .unwrap();

        let start = Utc::now() - Duration::hours(3);
        let expired = db
            .insert_job(&NewJob {
                name: "u1-old".to_string(),
                user_id: "u1".to_string(),
                image: "pytorch:latest".to_string(),
                worker_hostname: "gpu-box-1".to_string(),
                gpu_uuids: vec!["GPU-aaa".to_string()],
                mounts: vec![],
                service_handle: "svc-old".to_string(),
                start_time: start,
                expected_end_time: start + Duration::hours(2),
            })
            .unwrap();
        let _fresh = insert_test_job(&db, "u1", "gpu-box-1", &["GPU-bbb"]);

        let found = db.expired_jobs(Utc::now()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, expired.id);
    }

    #[test]
    fn test_mounts_round_trip() {
        let (db, _temp) = create_test_db();
        db.register_user("u1", PermissionLevel::User).unwrap();
        db.register_worker(&worker_spec("gpu-box-1", "join-1", &["GPU-aaa"]), None)
            .unwrap();

        let start = Utc::now();
        let mounts = vec![MountSpec {
            source: "nfs-root/u1".to_string(),
            target: "/data".to_string(),
        }];
        let job = db
            .insert_job(&NewJob {
                name: "u1-m".to_string(),
                user_id: "u1".to_string(),
                image: "pytorch:latest".to_string(),
                worker_hostname: "gpu-box-1".to_string(),
                gpu_uuids: vec!["GPU-aaa".to_string()],
                mounts: mounts.clone(),
                service_handle: "svc-m".to_string(),
                start_time: start,
                expected_end_time: start + Duration::hours(1),
            })
            .unwrap();

        assert_eq!(db.get_job(job.id).unwrap().unwrap().mounts, mounts);
    }
}
