/// The reconciler-facing error bulkhead. Each reconciler returns this type
/// from its `reconcile` function; `storm-client`'s own error taxonomies are
/// translated into the `Transient`/`External`/`Configuration` variants here
/// at the call site (spec.md §7's taxonomy).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("invalid user input: {0}")]
    UserInput(String),

    #[error("json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("parse duration: {source}")]
    ParseDuration {
        #[from]
        source: parse_duration::parse::Error,
    },

    /// A dependency, RPC call, or I/O operation failed in a way that is
    /// expected to resolve itself; the reconciler should requeue.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The Storm control plane (or an external system) rejected the
    /// request in a way this operator cannot fix by retrying as-is.
    #[error("external system rejected request: {0}")]
    External(String),

    /// A programming invariant was violated (unreachable state machine
    /// transition, missing required context). Never auto-recovered.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Kube { .. })
    }
}
