use async_trait::async_trait;
use kube::api::{Api, ListParams};
use storm_common::Error;
use storm_types::{StormCluster, StormTopology, StormWorkerPool};

/// Capability the coordinator's sub-components (dependency manager,
/// provisioner, recovery engine) need to read cross-resource state, without
/// holding pointers to one another (spec.md §9 "Cyclic references").
/// Constructed once at the operator's top level and passed down.
#[async_trait]
pub trait ResourceLookup: Send + Sync {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<StormCluster>, Error>;
    async fn get_topology(&self, namespace: &str, name: &str) -> Result<Option<StormTopology>, Error>;
    async fn get_worker_pool(&self, namespace: &str, name: &str) -> Result<Option<StormWorkerPool>, Error>;

    async fn list_clusters(&self, namespace: &str) -> Result<Vec<StormCluster>, Error>;
    async fn list_topologies(&self, namespace: &str) -> Result<Vec<StormTopology>, Error>;
    async fn list_worker_pools(&self, namespace: &str) -> Result<Vec<StormWorkerPool>, Error>;

    async fn topologies_for_cluster(&self, namespace: &str, cluster_name: &str) -> Result<Vec<StormTopology>, Error> {
        Ok(self
            .list_topologies(namespace)
            .await?
            .into_iter()
            .filter(|t| t.spec.cluster_ref == cluster_name)
            .collect())
    }

    async fn worker_pools_for_topology(
        &self,
        namespace: &str,
        topology_name: &str,
    ) -> Result<Vec<StormWorkerPool>, Error> {
        Ok(self
            .list_worker_pools(namespace)
            .await?
            .into_iter()
            .filter(|p| p.spec.topology_ref == topology_name)
            .collect())
    }
}

/// Production `ResourceLookup` backed by the Kubernetes API.
pub struct KubeResourceLookup {
    client: kube::Client,
}

impl KubeResourceLookup {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceLookup for KubeResourceLookup {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<StormCluster>, Error> {
        let api: Api<StormCluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_topology(&self, namespace: &str, name: &str) -> Result<Option<StormTopology>, Error> {
        let api: Api<StormTopology> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_worker_pool(&self, namespace: &str, name: &str) -> Result<Option<StormWorkerPool>, Error> {
        let api: Api<StormWorkerPool> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_clusters(&self, namespace: &str) -> Result<Vec<StormCluster>, Error> {
        let api: Api<StormCluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_topologies(&self, namespace: &str) -> Result<Vec<StormTopology>, Error> {
        let api: Api<StormTopology> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_worker_pools(&self, namespace: &str) -> Result<Vec<StormWorkerPool>, Error> {
        let api: Api<StormWorkerPool> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    /// In-memory `ResourceLookup` for coordinator unit tests (no API server
    /// required, per this exercise's constraints).
    #[derive(Default)]
    pub struct FakeResourceLookup {
        pub clusters: Mutex<Vec<StormCluster>>,
        pub topologies: Mutex<Vec<StormTopology>>,
        pub worker_pools: Mutex<Vec<StormWorkerPool>>,
    }

    #[async_trait]
    impl ResourceLookup for FakeResourceLookup {
        async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<StormCluster>, Error> {
            Ok(self
                .clusters
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.metadata.namespace.as_deref() == Some(namespace) && c.metadata.name.as_deref() == Some(name))
                .cloned())
        }

        async fn get_topology(&self, namespace: &str, name: &str) -> Result<Option<StormTopology>, Error> {
            Ok(self
                .topologies
                .lock()
                .unwrap()
                .iter()
                .find(|t| t.metadata.namespace.as_deref() == Some(namespace) && t.metadata.name.as_deref() == Some(name))
                .cloned())
        }

        async fn get_worker_pool(&self, namespace: &str, name: &str) -> Result<Option<StormWorkerPool>, Error> {
            Ok(self
                .worker_pools
                .lock()
                .unwrap()
                .iter()
                .find(|p| p.metadata.namespace.as_deref() == Some(namespace) && p.metadata.name.as_deref() == Some(name))
                .cloned())
        }

        async fn list_clusters(&self, namespace: &str) -> Result<Vec<StormCluster>, Error> {
            Ok(self
                .clusters
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.metadata.namespace.as_deref() == Some(namespace))
                .cloned()
                .collect())
        }

        async fn list_topologies(&self, namespace: &str) -> Result<Vec<StormTopology>, Error> {
            Ok(self
                .topologies
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.metadata.namespace.as_deref() == Some(namespace))
                .cloned()
                .collect())
        }

        async fn list_worker_pools(&self, namespace: &str) -> Result<Vec<StormWorkerPool>, Error> {
            Ok(self
                .worker_pools
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
                .cloned()
                .collect())
        }
    }
}
