//! Mutating admission service for podtap debug sessions.
//!
//! Watches workload updates and rewrites the pod spec of any object carrying
//! the full set of `podtap.dev/` annotations so the target container starts
//! under the debug entrypoint.

pub mod config;
pub mod mutate;
pub mod review;
pub mod server;

pub use config::Config;
pub use mutate::{decide, Decision, PatchOperation};
pub use server::build_router;
