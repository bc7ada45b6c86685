//! Typed client for the manager API, used by the `gpool` CLI.
//!
//! The request body types here are the wire contract; the daemon's handlers
//! deserialize exactly these shapes.

use anyhow::{bail, Context};
use reqwest::Client as ReqwestClient;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::catalog::ResourceView;
use crate::core::error::ErrorBody;
use crate::core::job::{Job, JobRequest, JobView};
use crate::core::permission::PermissionLevel;
use crate::core::user::RequestUser;
use crate::core::worker::{Worker, WorkerSpec};

#[derive(Debug, Serialize, Deserialize)]
pub struct UserBody {
    pub user: RequestUser,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TargetUserBody {
    pub user: RequestUser,
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetPermissionBody {
    pub user: RequestUser,
    pub user_id: String,
    pub permission_level: PermissionLevel,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialBody {
    pub user: RequestUser,
    pub credential: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CredentialStatus {
    pub is_set: bool,
}

/// Body of every mutation endpoint with nothing else to report.
#[derive(Debug, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DispatchBody {
    pub user: RequestUser,
    pub job: JobRequest,
}

#[derive(Debug, Clone)]
pub struct Client {
    client: ReqwestClient,
    base_url: String,
}

impl Client {
    pub fn build(config: &crate::config::Config) -> anyhow::Result<Self> {
        crate::tls::ensure_rustls_provider_installed();
        let host = &config.daemon.host;
        let port = config.daemon.port;
        let base_url = format!("http://{host}:{port}");
        let client = ReqwestClient::new();
        Ok(Self { client, base_url })
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> anyhow::Result<T> {
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to reach manager at {}", self.base_url))?;

        if resp.status().is_success() {
            return resp.json().await.context("Failed to decode response");
        }

        let status = resp.status();
        match resp.json::<ErrorBody>().await {
            Ok(body) => {
                let mut message = body.message;
                if let Some(admins) = body.data.get("admins").and_then(|a| a.as_array()) {
                    let contacts: Vec<String> = admins
                        .iter()
                        .filter_map(|a| a.as_str())
                        .map(|a| format!("@{a}"))
                        .collect();
                    if !contacts.is_empty() {
                        message = format!("{message} (contact: {})", contacts.join(", "));
                    }
                }
                bail!("{message}")
            }
            Err(_) => bail!("Manager returned {status}"),
        }
    }

    pub async fn join(&self, spec: &WorkerSpec) -> anyhow::Result<Worker> {
        self.post("/join", spec).await
    }

    pub async fn resources(&self, user: &RequestUser) -> anyhow::Result<ResourceView> {
        self.post("/resources", &UserBody { user: user.clone() })
            .await
    }

    pub async fn dispatch(&self, user: &RequestUser, job: JobRequest) -> anyhow::Result<Job> {
        self.post(
            "/jobs",
            &DispatchBody {
                user: user.clone(),
                job,
            },
        )
        .await
    }

    pub async fn jobs(&self, user: &RequestUser) -> anyhow::Result<Vec<JobView>> {
        self.post("/jobs/list", &UserBody { user: user.clone() })
            .await
    }

    pub async fn remove_job(&self, user: &RequestUser, job_id: i64) -> anyhow::Result<()> {
        let _: Ack = self
            .post(
                &format!("/jobs/{job_id}/remove"),
                &UserBody { user: user.clone() },
            )
            .await?;
        Ok(())
    }

    pub async fn register_user(&self, user: &RequestUser, user_id: &str) -> anyhow::Result<()> {
        let _: Ack = self
            .post(
                "/users/register",
                &TargetUserBody {
                    user: user.clone(),
                    user_id: user_id.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    pub async fn set_permission(
        &self,
        user: &RequestUser,
        user_id: &str,
        level: PermissionLevel,
    ) -> anyhow::Result<()> {
        let _: Ack = self
            .post(
                "/users/permission",
                &SetPermissionBody {
                    user: user.clone(),
                    user_id: user_id.to_string(),
                    permission_level: level,
                },
            )
            .await?;
        Ok(())
    }

    pub async fn set_credential(&self, user: &RequestUser, credential: &str) -> anyhow::Result<()> {
        let _: Ack = self
            .post(
                "/credential",
                &CredentialBody {
                    user: user.clone(),
                    credential: credential.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    pub async fn check_credential(&self, user: &RequestUser) -> anyhow::Result<bool> {
        let status: CredentialStatus = self
            .post("/credential/check", &UserBody { user: user.clone() })
            .await?;
        Ok(status.is_set)
    }
}
