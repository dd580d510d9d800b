use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::pool::{Connector, Pool, PoolError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopologySummary {
    pub id: String,
    pub name: String,
    pub status: String,
    pub uptime_secs: u64,
    pub num_workers: i32,
    pub num_executors: i32,
    pub num_tasks: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Submitted { topology_id: String },
    AlreadyAlive,
}

/// Typed, retryable Nimbus RPC access (spec.md §4.1). Generic over the
/// pool's connector so tests can substitute a `MockTransport`-backed pool.
pub struct NimbusClient<C: Connector> {
    pool: Arc<Pool<C>>,
}

impl<C: Connector> NimbusClient<C> {
    pub fn new(pool: Arc<Pool<C>>) -> Self {
        Self { pool }
    }

    pub async fn submit_topology(
        &self,
        name: &str,
        jar_path: &str,
        json_config: serde_json::Value,
        main_class: &str,
        args: &[String],
    ) -> Result<SubmitOutcome, PoolError> {
        let payload = json!({
            "name": name,
            "jarPath": jar_path,
            "config": json_config,
            "mainClass": main_class,
            "args": args,
        });
        match self.pool.call_with_retry("SubmitTopology", payload).await {
            Ok(value) => {
                let topology_id = value
                    .get("topologyId")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or(name)
                    .to_string();
                Ok(SubmitOutcome::Submitted { topology_id })
            }
            Err(e) if super::errors::is_already_exists(&e) => Ok(SubmitOutcome::AlreadyAlive),
            Err(e) => Err(e),
        }
    }

    pub async fn kill_topology_with_opts(&self, name: &str, wait_secs: u32) -> Result<(), PoolError> {
        let payload = json!({ "name": name, "waitSecs": wait_secs });
        match self.pool.call_with_retry("KillTopologyWithOpts", payload).await {
            Ok(_) => Ok(()),
            Err(e) if super::errors::is_not_found(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn activate(&self, name: &str) -> Result<(), PoolError> {
        self.pool.call_with_retry("Activate", json!({ "name": name })).await.map(|_| ())
    }

    pub async fn deactivate(&self, name: &str) -> Result<(), PoolError> {
        self.pool.call_with_retry("Deactivate", json!({ "name": name })).await.map(|_| ())
    }

    pub async fn rebalance(
        &self,
        name: &str,
        wait_secs: u32,
        num_workers: Option<i32>,
        num_executors: Option<std::collections::BTreeMap<String, i32>>,
    ) -> Result<(), PoolError> {
        let payload = json!({
            "name": name,
            "waitSecs": wait_secs,
            "numWorkers": num_workers,
            "numExecutors": num_executors,
        });
        self.pool.call_with_retry("Rebalance", payload).await.map(|_| ())
    }

    pub async fn get_topology_info(&self, id: &str) -> Result<TopologySummary, PoolError> {
        let value = self
            .pool
            .call_with_retry("GetTopologyInfo", json!({ "id": id }))
            .await?;
        Ok(serde_json::from_value(value).unwrap_or(TopologySummary {
            id: id.to_string(),
            name: id.to_string(),
            status: "UNKNOWN".to_string(),
            uptime_secs: 0,
            num_workers: 0,
            num_executors: 0,
            num_tasks: 0,
        }))
    }

    pub async fn get_cluster_info(&self) -> Result<serde_json::Value, PoolError> {
        self.pool.call_with_retry("GetClusterInfo", json!({})).await
    }

    pub async fn get_leader(&self) -> Result<serde_json::Value, PoolError> {
        self.pool.call_with_retry("GetLeader", json!({})).await
    }

    pub async fn get_topology_conf(&self, id: &str) -> Result<serde_json::Value, PoolError> {
        self.pool.call_with_retry("GetTopologyConf", json!({ "id": id })).await
    }

    pub async fn get_topology(&self, id: &str) -> Result<serde_json::Value, PoolError> {
        self.pool.call_with_retry("GetTopology", json!({ "id": id })).await
    }

    pub async fn is_topology_name_allowed(&self, name: &str) -> Result<bool, PoolError> {
        let value = self
            .pool
            .call_with_retry("IsTopologyNameAllowed", json!({ "name": name }))
            .await?;
        Ok(value.as_bool().unwrap_or(true))
    }

    pub async fn set_log_config(&self, name: &str, config: serde_json::Value) -> Result<(), PoolError> {
        self.pool
            .call_with_retry("SetLogConfig", json!({ "name": name, "config": config }))
            .await
            .map(|_| ())
    }

    pub async fn debug(&self, name: &str, component: &str, enable: bool, sample_pct: f64) -> Result<(), PoolError> {
        let payload = json!({
            "name": name,
            "component": component,
            "enable": enable,
            "samplePct": sample_pct,
        });
        self.pool.call_with_retry("Debug", payload).await.map(|_| ())
    }

    pub fn pool_stats(&self) -> super::pool::PoolStats {
        self.pool.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::connection::{MockTransport, TransportError};
    use crate::rpc::pool::{PoolConfig, TcpConnector};
    use async_trait::async_trait;

    struct ScriptedConnector;

    #[async_trait]
    impl Connector for ScriptedConnector {
        type Conn = MockTransport;
        async fn connect(&self) -> Result<MockTransport, TransportError> {
            Ok(MockTransport::new())
        }
    }

    fn test_pool() -> Arc<Pool<ScriptedConnector>> {
        Pool::new(
            ScriptedConnector,
            PoolConfig {
                max_connections: 2,
                min_idle_connections: 0,
                max_idle_time: std::time::Duration::from_secs(60),
                max_lifetime: std::time::Duration::from_secs(3600),
                acquire_timeout: std::time::Duration::from_millis(500),
                max_retries: 1,
                retry_delay: std::time::Duration::from_millis(1),
            },
        )
    }

    #[tokio::test]
    async fn submit_topology_returns_already_alive_on_already_alive_exception() {
        // Inject the scripted failure directly through a one-off mock pool.
        struct FailOnceConnector;
        #[async_trait]
        impl Connector for FailOnceConnector {
            type Conn = MockTransport;
            async fn connect(&self) -> Result<MockTransport, TransportError> {
                let mut t = MockTransport::new();
                t.queue(
                    "SubmitTopology",
                    Err(TransportError::Remote {
                        exception: "AlreadyAliveException".into(),
                        message: "already running".into(),
                    }),
                );
                Ok(t)
            }
        }
        let pool = Pool::new(
            FailOnceConnector,
            PoolConfig {
                max_connections: 1,
                min_idle_connections: 0,
                max_idle_time: std::time::Duration::from_secs(60),
                max_lifetime: std::time::Duration::from_secs(3600),
                acquire_timeout: std::time::Duration::from_millis(500),
                max_retries: 0,
                retry_delay: std::time::Duration::from_millis(1),
            },
        );
        let client = NimbusClient::new(pool);
        let outcome = client
            .submit_topology("t1", "/tmp/j.jar", serde_json::json!({}), "com.ex.Main", &[])
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::AlreadyAlive);
    }

    #[tokio::test]
    async fn kill_topology_treats_not_found_as_success() {
        struct NotFoundConnector;
        #[async_trait]
        impl Connector for NotFoundConnector {
            type Conn = MockTransport;
            async fn connect(&self) -> Result<MockTransport, TransportError> {
                let mut t = MockTransport::new();
                t.queue(
                    "KillTopologyWithOpts",
                    Err(TransportError::Remote {
                        exception: "NotAliveException".into(),
                        message: "gone".into(),
                    }),
                );
                Ok(t)
            }
        }
        let pool = Pool::new(
            NotFoundConnector,
            PoolConfig {
                max_connections: 1,
                min_idle_connections: 0,
                max_idle_time: std::time::Duration::from_secs(60),
                max_lifetime: std::time::Duration::from_secs(3600),
                acquire_timeout: std::time::Duration::from_millis(500),
                max_retries: 0,
                retry_delay: std::time::Duration::from_millis(1),
            },
        );
        let client = NimbusClient::new(pool);
        assert!(client.kill_topology_with_opts("t1", 30).await.is_ok());
    }

    #[tokio::test]
    async fn get_cluster_info_round_trips_through_mock_transport() {
        let pool = test_pool();
        let client = NimbusClient::new(pool);
        let info = client.get_cluster_info().await.unwrap();
        assert!(info.is_null());
    }

    // Silence unused-import warnings for the TcpConnector re-export used by
    // downstream crates wiring a real client.
    #[allow(dead_code)]
    fn _type_check(_: TcpConnector) {}
}
