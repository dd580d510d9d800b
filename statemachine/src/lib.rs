pub mod cluster;
pub mod engine;
pub mod topology;
pub mod workerpool;

pub use cluster::{new_cluster_machine, ClusterEvent};
pub use engine::{NoTransition, StateMachine, TransitionRecord, ValidationError};
pub use topology::{new_topology_machine, TopologyEvent};
pub use workerpool::{new_worker_pool_machine, WorkerPoolEvent};
