//! End-to-end debug-session orchestration.
//!
//! Ties the flow together: selection → process enumeration → decision
//! (attach in place vs. relaunch under a controller) → [annotate → update →
//! server-side webhook mutation → rollout wait] → tunnel establishment.
//! Every step is fatal on failure; there is no retry and no rollback of an
//! already-mutated workload.

use tracing::{info, instrument};

use crate::annotations::DebugAnnotations;
use crate::cluster::ClusterApi;
use crate::error::{Error, Result};
use crate::process::{self, ProcessInfo};
use crate::provision::{self, CertificateSource};
use crate::rollout::{self, RolloutConfig};
use crate::session::{Session, SessionTunnel};
use crate::workload;

/// How the debugger gets hold of the target process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugMode {
    /// Attach to the running pid in place.
    Attach,
    /// Kill the pid and relaunch its command line under the debugger,
    /// without touching the owning controller.
    Restart,
    /// Rewrite the owning controller through the annotation protocol so the
    /// webhook injects the debug entrypoint into a fresh pod.
    Relaunch,
}

/// The fully resolved target tuple the core consumes. Selection (flags or
/// prompting) happens outside the engine.
#[derive(Debug, Clone)]
pub struct DebugTarget {
    pub pod: String,
    pub container: String,
    pub pid: u32,
    pub local_port: u16,
    pub remote_port: u16,
}

/// One debug-session invocation against one target.
pub struct DebugSession {
    cluster: ClusterApi,
    target: DebugTarget,
    rollout: RolloutConfig,
}

impl DebugSession {
    #[must_use]
    pub fn new(cluster: ClusterApi, target: DebugTarget) -> Self {
        Self {
            cluster,
            target,
            rollout: RolloutConfig::default(),
        }
    }

    #[must_use]
    pub fn with_rollout_config(mut self, rollout: RolloutConfig) -> Self {
        self.rollout = rollout;
        self
    }

    /// Enumerate processes and resolve the target pid's command line.
    async fn resolve_process(&self) -> Result<ProcessInfo> {
        let processes =
            process::enumerate(&self.cluster, &self.target.pod, &self.target.container).await?;
        processes
            .into_iter()
            .find(|p| p.pid == self.target.pid)
            .ok_or_else(|| Error::ProcessListing {
                line: format!("pid {} not found in container", self.target.pid),
            })
    }

    /// Run the session: remote setup, then a live tunnel the caller owns.
    #[instrument(skip(self, certs), fields(pod = %self.target.pod, mode = ?mode))]
    pub async fn run(&self, mode: DebugMode, certs: &dyn CertificateSource) -> Result<Session> {
        let process = self.resolve_process().await?;
        info!(pid = process.pid, command = %process.command(), "debugging process");

        let mut tunnel = SessionTunnel::new(
            self.cluster.clone(),
            &self.target.pod,
            &self.target.container,
            self.target.local_port,
            self.target.remote_port,
        );

        match mode {
            DebugMode::Attach => {
                tunnel.install_debugger().await?;
                tunnel.attach(process.pid).await?;
            }
            DebugMode::Restart => {
                tunnel.install_debugger().await?;
                tunnel.relaunch(process.pid, &process.argv).await?;
            }
            DebugMode::Relaunch => {
                let pod = self.relaunch_workload(&process, certs).await?;
                tunnel.retarget(pod);
                // The webhook-injected entrypoint starts the debugger
                // itself; the tunnel only has to wait for the new pod.
            }
        }

        Ok(tunnel.open())
    }

    /// The controller path: resolve the root workload, annotate its pod
    /// template, write it back (the admission webhook rewrites the spec
    /// server-side), wait out the rollout, and return the new pod name.
    ///
    /// The reserved annotations persist on the cluster object afterward;
    /// nothing here cleans them up.
    async fn relaunch_workload(
        &self,
        process: &ProcessInfo,
        certs: &dyn CertificateSource,
    ) -> Result<String> {
        let pod = self.cluster.get_pod(&self.target.pod).await?;
        let mut root = workload::resolve_root(&self.cluster, &pod).await?;
        info!(root = %root.to_ref(self.cluster.namespace()), "resolved owning workload");

        let annotations = DebugAnnotations::new(
            &self.target.container,
            &process.argv,
            self.target.remote_port,
        );
        annotations.apply(&mut root)?;

        provision::ensure_entrypoint_config_map(&self.cluster, certs).await?;
        // Self-signed material doubles as its own CA bundle.
        let ca_bundle = certs
            .certificate_pem()
            .map_err(|e| Error::Stream(format!("certificate source failed: {e}")))?;
        provision::ensure_webhook_config(&self.cluster, ca_bundle).await?;

        let updated = self.cluster.update_workload(&root).await?;

        // Pod roots skip the wait inside await_rollout: the mutation was
        // applied directly, so the same pod identity comes back.
        let new_pod = rollout::await_rollout(&self.cluster, &updated, &self.rollout).await?;
        new_pod
            .metadata
            .name
            .ok_or_else(|| Error::Stream("resolved pod has no name".to_string()))
    }
}
