use std::time::Duration;

pub mod backoff;
pub mod colors;
mod error;
pub mod metrics;
pub mod patch;
pub mod shutdown;

pub use error::Error;

/// Name of the field manager used for all server-side-apply status
/// patches, so two operator replicas never fight over field ownership.
pub const MANAGER_NAME: &str = "storm-operator";

/// Default interval for requeuing a managed resource once it has settled.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(30);

pub mod annotations {
    pub use storm_types::{FINALIZER, RESTART_ANNOTATION, SPEC_HASH_ANNOTATION};
}

/// Content hash of a serializable spec, stamped on dependent workloads so
/// a config change triggers a rolling restart (spec.md §4.4 step 4).
pub fn hash_spec<T: serde::Serialize>(spec: &T) -> String {
    use sha2::{Digest, Sha256};
    let bytes = serde_json::to_vec(spec).expect("spec must serialize");
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

pub fn signal_ready() {
    let _ = std::fs::write("/tmp/ready", "ready");
}
