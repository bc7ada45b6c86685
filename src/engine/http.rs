//! REST client for the orchestration engine.
//!
//! One client implements both boundary traits: placements and nodes live
//! under `/nodes` and `/services`, credentials under `/configs`. Every
//! request carries the configured timeout so a stalled engine cannot wedge
//! request handlers.

use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use super::{
    CredentialHandle, CredentialStore, EngineError, EngineResult, NodeStatus, OrchestrationEngine,
    PlacementHandle, PlacementSpec, PlacementStatus, LABEL_GPUS,
};
use crate::config::EngineConfig;

#[derive(Debug, Clone)]
pub struct HttpEngine {
    client: ReqwestClient,
    base_url: String,
}

#[derive(Deserialize)]
struct CreatedResponse {
    id: String,
}

#[derive(Deserialize)]
struct ConfigResponse {
    id: String,
    name: String,
}

impl HttpEngine {
    pub fn build(config: &EngineConfig) -> anyhow::Result<Self> {
        crate::tls::ensure_rustls_provider_installed();
        let client = ReqwestClient::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn fail(resp: reqwest::Response) -> EngineError {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        EngineError::Api(format!("{status}: {text}"))
    }
}

#[async_trait]
impl OrchestrationEngine for HttpEngine {
    async fn list_nodes(&self) -> EngineResult<Vec<NodeStatus>> {
        let resp = self
            .client
            .get(format!("{}/nodes", self.base_url))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::fail(resp).await);
        }
        resp.json().await.map_err(EngineError::from)
    }

    async fn create_placement(&self, spec: &PlacementSpec) -> EngineResult<PlacementHandle> {
        tracing::debug!(name = %spec.name, image = %spec.image, "Creating placement");
        let resp = self
            .client
            .post(format!("{}/services", self.base_url))
            .json(spec)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::fail(resp).await);
        }
        let created: CreatedResponse = resp.json().await?;
        Ok(PlacementHandle { id: created.id })
    }

    async fn placement_status(
        &self,
        handle: &PlacementHandle,
    ) -> EngineResult<Option<PlacementStatus>> {
        let resp = self
            .client
            .get(format!("{}/services/{}", self.base_url, handle.id))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::fail(resp).await);
        }
        resp.json().await.map(Some).map_err(EngineError::from)
    }

    async fn list_placements(&self) -> EngineResult<Vec<PlacementStatus>> {
        let resp = self
            .client
            .get(format!("{}/services", self.base_url))
            .query(&[("label", LABEL_GPUS)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::fail(resp).await);
        }
        resp.json().await.map_err(EngineError::from)
    }

    async fn remove_placement(&self, handle: &PlacementHandle) -> EngineResult<()> {
        tracing::debug!(handle = %handle.id, "Removing placement");
        let resp = self
            .client
            .delete(format!("{}/services/{}", self.base_url, handle.id))
            .send()
            .await?;
        // Already-gone placements count as removed.
        if resp.status() == StatusCode::NOT_FOUND || resp.status().is_success() {
            return Ok(());
        }
        Err(Self::fail(resp).await)
    }
}

#[async_trait]
impl CredentialStore for HttpEngine {
    async fn store(&self, name: &str, blob: &str) -> EngineResult<CredentialHandle> {
        let resp = self
            .client
            .post(format!("{}/configs", self.base_url))
            .json(&serde_json::json!({ "name": name, "data": blob }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::fail(resp).await);
        }
        let config: ConfigResponse = resp.json().await?;
        Ok(CredentialHandle {
            id: config.id,
            name: config.name,
        })
    }

    async fn resolve(&self, name: &str) -> EngineResult<Option<CredentialHandle>> {
        let resp = self
            .client
            .get(format!("{}/configs/{}", self.base_url, name))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::fail(resp).await);
        }
        let config: ConfigResponse = resp.json().await?;
        Ok(Some(CredentialHandle {
            id: config.id,
            name: config.name,
        }))
    }

    async fn remove(&self, handle: &CredentialHandle) -> EngineResult<()> {
        let resp = self
            .client
            .delete(format!("{}/configs/{}", self.base_url, handle.id))
            .send()
            .await?;
        match resp.status() {
            // A running placement still references the credential.
            StatusCode::CONFLICT => Err(EngineError::CredentialInUse),
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            _ => Err(Self::fail(resp).await),
        }
    }
}
