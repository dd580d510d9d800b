use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use super::client::{NimbusClient, SubmitOutcome};
use super::pool::{PoolError, TcpConnector};

/// Which transport handles a given operation class (spec.md §4.1,
/// "Feature-flag hybridization"). JAR upload and CLI-style submission are
/// pinned to `Rest`; everything else is configurable per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Binary,
    Rest,
}

impl ClientKind {
    fn from_env(var: &str, default: ClientKind) -> Self {
        match std::env::var(var).ok().as_deref() {
            Some("true") | Some("1") => ClientKind::Rest,
            Some("false") | Some("0") => ClientKind::Binary,
            _ => default,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HybridFlags {
    pub status: ClientKind,
    pub kill: ClientKind,
    pub lifecycle: ClientKind,
    pub cluster_info: ClientKind,
}

impl HybridFlags {
    pub fn from_env() -> Self {
        Self {
            status: ClientKind::from_env("STORM_STATUS_USE_REST", ClientKind::Binary),
            kill: ClientKind::from_env("STORM_KILL_USE_REST", ClientKind::Binary),
            lifecycle: ClientKind::from_env("STORM_LIFECYCLE_USE_REST", ClientKind::Binary),
            cluster_info: ClientKind::from_env("STORM_CLUSTER_INFO_USE_REST", ClientKind::Binary),
        }
    }
}

#[derive(Debug, Error)]
pub enum HybridError {
    #[error("no Storm cluster configured yet")]
    NoClusterConfigured,
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("rest fallback error: {0}")]
    Rest(String),
}

impl HybridError {
    /// "No cluster configured yet" is treated as transient by callers
    /// (spec.md §4.1): the dependency manager will cause a requeue once a
    /// cluster reference resolves.
    pub fn is_transient(&self) -> bool {
        matches!(self, HybridError::NoClusterConfigured | HybridError::Pool(_))
    }
}

struct Configured {
    binary: Arc<NimbusClient<TcpConnector>>,
    rest_base_url: String,
}

/// Owns the currently-selected client behind a read/write lock, replacing
/// it atomically when cluster configuration changes (spec.md §4.1,
/// §9 "Global state" — this is the operator's one instance, constructed
/// in `main` and passed to reconcilers, never a process-wide singleton).
pub struct NimbusClientHandle {
    current: RwLock<Option<Configured>>,
    flags: HybridFlags,
    http: reqwest::Client,
}

impl NimbusClientHandle {
    pub fn new(flags: HybridFlags) -> Self {
        Self {
            current: RwLock::new(None),
            flags,
            http: reqwest::Client::new(),
        }
    }

    pub async fn set_cluster(&self, binary: Arc<NimbusClient<TcpConnector>>, rest_base_url: String) {
        let mut guard = self.current.write().await;
        *guard = Some(Configured { binary, rest_base_url });
    }

    pub async fn clear(&self) {
        *self.current.write().await = None;
    }

    async fn binary(&self) -> Result<Arc<NimbusClient<TcpConnector>>, HybridError> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|c| c.binary.clone())
            .ok_or(HybridError::NoClusterConfigured)
    }

    async fn rest_base_url(&self) -> Result<String, HybridError> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|c| c.rest_base_url.clone())
            .ok_or(HybridError::NoClusterConfigured)
    }

    /// Submission always goes through the REST/CLI-style fallback
    /// (spec.md §4.1): JAR upload semantics are awkward over the framed
    /// binary protocol and Storm's own CLI does the same.
    pub async fn submit_topology(
        &self,
        name: &str,
        jar_path: &str,
        json_config: serde_json::Value,
        main_class: &str,
        args: &[String],
    ) -> Result<SubmitOutcome, HybridError> {
        let base = self.rest_base_url().await?;
        let response = self
            .http
            .post(format!("{base}/api/v1/topology/submit"))
            .json(&serde_json::json!({
                "name": name,
                "jarPath": jar_path,
                "config": json_config,
                "mainClass": main_class,
                "args": args,
            }))
            .send()
            .await
            .map_err(|e| HybridError::Rest(e.to_string()))?;
        if response.status() == reqwest::StatusCode::CONFLICT {
            return Ok(SubmitOutcome::AlreadyAlive);
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| HybridError::Rest(e.to_string()))?;
        let topology_id = body
            .get("topologyId")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(name)
            .to_string();
        Ok(SubmitOutcome::Submitted { topology_id })
    }

    pub async fn kill_topology_with_opts(&self, name: &str, wait_secs: u32) -> Result<(), HybridError> {
        match self.flags.kill {
            ClientKind::Binary => Ok(self.binary().await?.kill_topology_with_opts(name, wait_secs).await?),
            ClientKind::Rest => {
                let base = self.rest_base_url().await?;
                self.http
                    .post(format!("{base}/api/v1/topology/{name}/kill"))
                    .json(&serde_json::json!({ "waitSecs": wait_secs }))
                    .send()
                    .await
                    .map_err(|e| HybridError::Rest(e.to_string()))?;
                Ok(())
            }
        }
    }

    pub async fn get_topology_info(&self, id: &str) -> Result<super::client::TopologySummary, HybridError> {
        match self.flags.status {
            ClientKind::Binary => Ok(self.binary().await?.get_topology_info(id).await?),
            ClientKind::Rest => {
                let base = self.rest_base_url().await?;
                let resp = self
                    .http
                    .get(format!("{base}/api/v1/topology/{id}"))
                    .send()
                    .await
                    .map_err(|e| HybridError::Rest(e.to_string()))?;
                resp.json().await.map_err(|e| HybridError::Rest(e.to_string()))
            }
        }
    }

    pub async fn get_cluster_info(&self) -> Result<serde_json::Value, HybridError> {
        match self.flags.cluster_info {
            ClientKind::Binary => Ok(self.binary().await?.get_cluster_info().await?),
            ClientKind::Rest => {
                let base = self.rest_base_url().await?;
                let resp = self
                    .http
                    .get(format!("{base}/api/v1/cluster/summary"))
                    .send()
                    .await
                    .map_err(|e| HybridError::Rest(e.to_string()))?;
                resp.json().await.map_err(|e| HybridError::Rest(e.to_string()))
            }
        }
    }

    pub async fn activate(&self, name: &str) -> Result<(), HybridError> {
        match self.flags.lifecycle {
            ClientKind::Binary => Ok(self.binary().await?.activate(name).await?),
            ClientKind::Rest => {
                let base = self.rest_base_url().await?;
                self.http
                    .post(format!("{base}/api/v1/topology/{name}/activate"))
                    .send()
                    .await
                    .map_err(|e| HybridError::Rest(e.to_string()))?;
                Ok(())
            }
        }
    }

    pub async fn is_topology_name_allowed(&self, name: &str) -> Result<bool, HybridError> {
        Ok(self.binary().await?.is_topology_name_allowed(name).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_kind_defaults_to_binary_when_env_unset() {
        // SAFETY: test runs in a single thread and does not race other
        // tests reading the same env var.
        unsafe { std::env::remove_var("STORM_STATUS_USE_REST") };
        assert_eq!(ClientKind::from_env("STORM_STATUS_USE_REST", ClientKind::Binary), ClientKind::Binary);
    }

    #[tokio::test]
    async fn unconfigured_handle_reports_no_cluster_configured() {
        let handle = NimbusClientHandle::new(HybridFlags::from_env());
        let err = handle.get_cluster_info().await.unwrap_err();
        assert!(matches!(err, HybridError::NoClusterConfigured));
        assert!(err.is_transient());
    }
}
