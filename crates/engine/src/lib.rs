//! Debug-session orchestration engine.
//!
//! Attaches a remote debugger to a process running inside a container
//! without rebuilding the image. The flow resolves which workload
//! controller owns the target pod, encodes debug intent as reserved
//! annotations on its pod template, lets the admission webhook inject the
//! debug entrypoint server-side, waits out the rollout, and bridges a local
//! TCP port to the in-pod debug server.

pub mod annotations;
pub mod cluster;
pub mod debug;
pub mod error;
pub mod process;
pub mod provision;
pub mod rollout;
pub mod scripts;
pub mod session;
pub mod workload;

pub use annotations::DebugAnnotations;
pub use cluster::ClusterApi;
pub use debug::{DebugMode, DebugSession, DebugTarget};
pub use error::{Error, Result};
pub use process::ProcessInfo;
pub use session::Session;
pub use workload::{WorkloadKind, WorkloadObject, WorkloadRef};
