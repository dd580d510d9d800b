use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    api::{Patch, PatchParams, Resource},
    core::NamespaceResourceScope,
    Api, Client, Error as KubeError,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use storm_types::{StormCluster, StormClusterStatus, StormTopology, StormTopologyStatus, StormWorkerPool, StormWorkerPoolStatus};

use crate::MANAGER_NAME;

/// A CR type whose status sub-object can be reached and replaced.
pub trait Object<S> {
    fn mut_status(&mut self) -> &mut S;
}

/// A status sub-object that tracks when it was last written.
pub trait Status {
    fn set_last_updated(&mut self, last_updated: Time);
}

macro_rules! impl_status_plumbing {
    ($kind:ty, $status:ty) => {
        impl Object<$status> for $kind {
            fn mut_status(&mut self) -> &mut $status {
                if self.status.is_none() {
                    self.status = Some(Default::default());
                }
                self.status.as_mut().unwrap()
            }
        }

        impl Status for $status {
            fn set_last_updated(&mut self, last_updated: Time) {
                self.last_updated = Some(last_updated);
            }
        }
    };
}

impl_status_plumbing!(StormCluster, StormClusterStatus);
impl_status_plumbing!(StormTopology, StormTopologyStatus);
impl_status_plumbing!(StormWorkerPool, StormWorkerPoolStatus);

/// Patch the resource's status sub-object with the provided function,
/// via a JSON merge computed against the current in-memory copy (so the
/// framework's optimistic-concurrency check on `resourceVersion` is the
/// only source of write conflicts, never a stale local diff).
pub async fn patch_status<S, T>(
    client: Client,
    instance: &T,
    f: impl FnOnce(&mut S),
) -> Result<T, KubeError>
where
    S: Status,
    T: Clone + Resource + Object<S> + Serialize + DeserializeOwned + Debug + Resource<Scope = NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
{
    let patch = Patch::Json::<T>({
        let mut modified = instance.clone();
        let status = modified.mut_status();
        f(status);
        status.set_last_updated(Time(chrono::Utc::now()));
        json_patch::diff(
            &serde_json::to_value(instance).unwrap(),
            &serde_json::to_value(&modified).unwrap(),
        )
    });
    let name = instance.meta().name.as_deref().unwrap();
    let namespace = instance.meta().namespace.as_deref().unwrap();
    let api: Api<T> = Api::namespaced(client, namespace);
    api.patch_status(name, &PatchParams::apply(MANAGER_NAME), &patch)
        .await
}
