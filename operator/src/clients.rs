//! Per-cluster Nimbus client registry. `storm_client::NimbusClientHandle`
//! is shaped for a single configured cluster (spec.md §4.1, §9 "Global
//! state"); the operator reconciles an arbitrary number of `StormCluster`
//! resources at once, so it keeps one handle per `(namespace, name)` and
//! points each at that cluster's headless Nimbus service and UI REST
//! endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use storm_client::{HybridFlags, NimbusClient, NimbusClientHandle, Pool, PoolConfig, TcpConnector};
use storm_types::StormCluster;

use crate::workloads::{NIMBUS_PORT, UI_PORT};

#[derive(Default)]
pub struct NimbusClients {
    handles: Mutex<HashMap<(String, String), Arc<NimbusClientHandle>>>,
}

impl NimbusClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `cluster`, creating and wiring it on first
    /// use and re-pointing it whenever the cluster's workload names could
    /// have changed (cheap: `set_cluster` only swaps a lock-guarded enum).
    pub async fn get_or_create(&self, cluster: &StormCluster) -> Arc<NimbusClientHandle> {
        let namespace = cluster.metadata.namespace.clone().unwrap_or_default();
        let name = cluster.metadata.name.clone().unwrap_or_default();
        let key = (namespace.clone(), name.clone());

        let mut handles = self.handles.lock().await;
        if let Some(existing) = handles.get(&key) {
            return existing.clone();
        }

        let handle = Arc::new(NimbusClientHandle::new(HybridFlags::from_env()));
        let nimbus_host = format!("{name}-nimbus.{namespace}.svc.cluster.local");
        let pool = Pool::new(TcpConnector { host: nimbus_host, port: NIMBUS_PORT as u16 }, PoolConfig::default());
        let binary = Arc::new(NimbusClient::new(pool));
        let rest_base_url = format!("http://{name}-ui.{namespace}.svc.cluster.local:{UI_PORT}");
        handle.set_cluster(binary, rest_base_url).await;

        handles.insert(key, handle.clone());
        handle
    }

    pub async fn forget(&self, namespace: &str, name: &str) {
        self.handles.lock().await.remove(&(namespace.to_string(), name.to_string()));
    }
}
