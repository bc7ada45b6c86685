use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use gpool::client::{
    Ack, CredentialBody, CredentialStatus, DispatchBody, SetPermissionBody, TargetUserBody,
    UserBody,
};
use gpool::core::catalog::ResourceView;
use gpool::core::db::Database;
use gpool::core::error::ManagerError;
use gpool::core::job::{Job, JobView};
use gpool::core::manager::Manager;
use gpool::core::worker::{Worker, WorkerSpec};
use gpool::engine::http::HttpEngine;

#[derive(Clone)]
pub struct AppState {
    manager: Manager,
}

/// Wraps the domain error so every handler can use `?` and every failure
/// maps to one wire shape.
struct ApiError(ManagerError);

impl From<ManagerError> for ApiError {
    fn from(err: ManagerError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ManagerError::PermissionDenied | ManagerError::NotRegistered { .. } => {
                StatusCode::FORBIDDEN
            }
            ManagerError::AlreadyRegistered { .. }
            | ManagerError::CredentialInUse
            | ManagerError::WorkerCollision { .. } => StatusCode::CONFLICT,
            ManagerError::CredentialMissing => StatusCode::PRECONDITION_FAILED,
            ManagerError::NotFound(_) => StatusCode::NOT_FOUND,
            ManagerError::Engine(_) => StatusCode::BAD_GATEWAY,
            ManagerError::Store(_) | ManagerError::Runtime(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(code = self.0.code(), error = %self.0, "Request failed");
        }

        (status, Json(self.0.body())).into_response()
    }
}

pub async fn run(config: gpool::config::Config) -> anyhow::Result<()> {
    let db_path = match config.daemon.db_path.clone() {
        Some(path) => path,
        None => {
            let data_dir = gpool::core::get_data_dir()?;
            std::fs::create_dir_all(&data_dir)?;
            data_dir.join("manager.db")
        }
    };
    let db = Database::new(db_path)?;

    match &config.bootstrap.owner_id {
        Some(owner_id) => {
            db.bootstrap_owner(owner_id)?;
            tracing::info!(owner_id = %owner_id, "Bootstrap owner ensured");
        }
        None => {
            tracing::warn!("No bootstrap owner configured; only pre-registered users can act");
        }
    }

    let engine = Arc::new(HttpEngine::build(&config.engine)?);
    let manager = Manager::new(db, engine.clone(), engine);

    tokio::spawn(expiry_sweeper_task(
        manager.clone(),
        config.daemon.sweep_interval_secs,
    ));

    let app = router(AppState { manager });
    let host = &config.daemon.host;
    let port = config.daemon.port;
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on: {addr}");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/join", post(join))
        .route("/resources", post(list_resources))
        .route("/jobs", post(dispatch_job))
        .route("/jobs/list", post(list_jobs))
        .route("/jobs/{id}/remove", post(remove_job))
        .route("/users/register", post(register_user))
        .route("/users/permission", post(set_permission))
        .route("/credential", post(set_credential))
        .route("/credential/check", post(check_credential))
        .route("/health", get(get_health))
        .with_state(state)
}

/// Tear down jobs that outlived their reservation. A failed teardown is
/// retried on the next tick.
async fn expiry_sweeper_task(manager: Manager, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        interval.tick().await;
        match manager.sweep_expired().await {
            Ok(0) => {}
            Ok(swept) => tracing::info!(count = swept, "Swept expired jobs"),
            Err(e) => tracing::warn!(error = %e, "Expiry sweep failed"),
        }
    }
}

#[axum::debug_handler]
async fn join(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(spec): Json<WorkerSpec>,
) -> Result<Json<Worker>, ApiError> {
    // The peer address is the fallback when the worker does not know its
    // externally reachable address.
    let worker = state
        .manager
        .register_worker(&spec, Some(addr.ip().to_string()))?;
    Ok(Json(worker))
}

#[axum::debug_handler]
async fn list_resources(
    State(state): State<AppState>,
    Json(body): Json<UserBody>,
) -> Result<Json<ResourceView>, ApiError> {
    let view = state.manager.list_resources(&body.user).await?;
    Ok(Json(view))
}

#[axum::debug_handler]
async fn dispatch_job(
    State(state): State<AppState>,
    Json(body): Json<DispatchBody>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let job = state.manager.dispatch(&body.user, &body.job).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

#[axum::debug_handler]
async fn list_jobs(
    State(state): State<AppState>,
    Json(body): Json<UserBody>,
) -> Result<Json<Vec<JobView>>, ApiError> {
    let views = state.manager.list_jobs(&body.user).await?;
    Ok(Json(views))
}

#[axum::debug_handler]
async fn remove_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UserBody>,
) -> Result<Json<Ack>, ApiError> {
    state.manager.remove_job(&body.user, id).await?;
    Ok(Json(Ack { ok: true }))
}

#[axum::debug_handler]
async fn register_user(
    State(state): State<AppState>,
    Json(body): Json<TargetUserBody>,
) -> Result<Json<Ack>, ApiError> {
    state.manager.register_user(&body.user, &body.user_id)?;
    Ok(Json(Ack { ok: true }))
}

#[axum::debug_handler]
async fn set_permission(
    State(state): State<AppState>,
    Json(body): Json<SetPermissionBody>,
) -> Result<Json<Ack>, ApiError> {
    state
        .manager
        .set_permission(&body.user, &body.user_id, body.permission_level)?;
    Ok(Json(Ack { ok: true }))
}

#[axum::debug_handler]
async fn set_credential(
    State(state): State<AppState>,
    Json(body): Json<CredentialBody>,
) -> Result<Json<Ack>, ApiError> {
    state
        .manager
        .set_credential(&body.user, &body.credential)
        .await?;
    Ok(Json(Ack { ok: true }))
}

#[axum::debug_handler]
async fn check_credential(
    State(state): State<AppState>,
    Json(body): Json<UserBody>,
) -> Result<Json<CredentialStatus>, ApiError> {
    let is_set = state.manager.check_credential(&body.user)?;
    Ok(Json(CredentialStatus { is_set }))
}

#[axum::debug_handler]
async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    match state.manager.db().health_check() {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "degraded", "detail": e.to_string() })),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use gpool::core::permission::PermissionLevel;
    use gpool::core::user::RequestUser;
    use gpool::core::worker::GpuSpec;
    use gpool::engine::{
        CredentialHandle, CredentialStore, EngineResult, NodeAvailability, NodeState, NodeStatus,
        OrchestrationEngine, PlacementHandle, PlacementSpec, PlacementStatus,
    };
    use tempfile::TempDir;
    use tower::ServiceExt;

    /// Fixed-answer engine for router-level tests; the interesting logic is
    /// covered by the manager's own tests with mock expectations.
    struct StubEngine;

    #[async_trait]
    impl OrchestrationEngine for StubEngine {
        async fn list_nodes(&self) -> EngineResult<Vec<NodeStatus>> {
            Ok(vec![NodeStatus {
                hostname: "gpu-box-1".to_string(),
                state: NodeState::Ready,
                availability: NodeAvailability::Active,
                addr: None,
            }])
        }

        async fn create_placement(&self, _spec: &PlacementSpec) -> EngineResult<PlacementHandle> {
            Ok(PlacementHandle {
                id: "svc-1".to_string(),
            })
        }

        async fn placement_status(
            &self,
            _handle: &PlacementHandle,
        ) -> EngineResult<Option<PlacementStatus>> {
            Ok(None)
        }

        async fn list_placements(&self) -> EngineResult<Vec<PlacementStatus>> {
            Ok(vec![])
        }

        async fn remove_placement(&self, _handle: &PlacementHandle) -> EngineResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl CredentialStore for StubEngine {
        async fn store(&self, name: &str, _blob: &str) -> EngineResult<CredentialHandle> {
            Ok(CredentialHandle {
                id: "cfg-1".to_string(),
                name: name.to_string(),
            })
        }

        async fn resolve(&self, name: &str) -> EngineResult<Option<CredentialHandle>> {
            Ok(Some(CredentialHandle {
                id: "cfg-1".to_string(),
                name: name.to_string(),
            }))
        }

        async fn remove(&self, _handle: &CredentialHandle) -> EngineResult<()> {
            Ok(())
        }
    }

    fn test_app() -> (Router, Database, TempDir) {
        use axum::extract::connect_info::MockConnectInfo;

        let temp = TempDir::new().unwrap();
        let db = Database::new(temp.path().join("test.db")).unwrap();
        db.bootstrap_owner("owner-1").unwrap();
        db.update_user_details("owner-1", Some("root"), None)
            .unwrap();

        let engine = Arc::new(StubEngine);
        let manager = Manager::new(db.clone(), engine.clone(), engine);
        let app = router(AppState { manager })
            .layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 5], 4242))));
        (app, db, temp)
    }

    fn post_json(uri: &str, body: &impl serde::Serialize) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _db, _temp) = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unregistered_dispatch_is_forbidden() {
        let (app, db, _temp) = test_app();

        let body = DispatchBody {
            user: RequestUser::new("ghost"),
            job: gpool::core::job::JobRequest {
                image: "pytorch:latest".to_string(),
                worker_hostname: "gpu-box-1".to_string(),
                gpu_uuids: vec!["GPU-AAA".to_string()],
                duration_hours: 1,
                mounts: vec![],
            },
        };

        let response = app.oneshot(post_json("/jobs", &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let json = body_json(response).await;
        assert_eq!(json["code"], "not_registered");
        assert_eq!(json["data"]["admins"][0], "root");
        assert!(db.active_jobs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_join_then_resources() {
        let (app, db, _temp) = test_app();
        db.register_user("u1", PermissionLevel::User).unwrap();

        let spec = WorkerSpec {
            hostname: "gpu-box-1".to_string(),
            external_ip: None,
            join_id: "join-1".to_string(),
            storage_root: None,
            gpus: vec![GpuSpec {
                uuid: "GPU-AAA".to_string(),
                index: 0,
                name: "NVIDIA A100".to_string(),
                total_memory_mib: 40_960,
                info: serde_json::Value::Null,
            }],
            info: serde_json::Value::Null,
        };
        let response = app
            .clone()
            .oneshot(post_json("/join", &spec))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(post_json(
                "/resources",
                &UserBody {
                    user: RequestUser::new("u1"),
                },
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["gpus"]["gpu-box-1"][0]["uuid"], "GPU-AAA");
    }

    #[tokio::test]
    async fn test_worker_collision_maps_to_conflict() {
        let (app, _db, _temp) = test_app();

        let mut spec = WorkerSpec {
            hostname: "gpu-box-1".to_string(),
            external_ip: None,
            join_id: "join-1".to_string(),
            storage_root: None,
            gpus: vec![],
            info: serde_json::Value::Null,
        };
        let response = app
            .clone()
            .oneshot(post_json("/join", &spec))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        spec.join_id = "join-2".to_string();
        let response = app.oneshot(post_json("/join", &spec)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["code"], "worker_collision");
    }
}
