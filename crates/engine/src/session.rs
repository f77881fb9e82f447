//! Debugger launch and the local↔pod tunnel.
//!
//! Remote work happens in two explicitly synchronized phases before the
//! tunnel is requested: the idempotent toolchain install runs to completion
//! first, then the launch payload (attach or relaunch) runs until it prints
//! its readiness marker, which means the remote debug port is listening.
//! Only then does the port-forward proceed, so the tunnel can never race a
//! listener that has not bound yet.

use std::net::Ipv4Addr;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::ClusterApi;
use crate::error::{Error, Result};
use crate::scripts;

/// Tunnel builder bound to one pod/container and one port pair.
pub struct SessionTunnel {
    cluster: ClusterApi,
    pod: String,
    container: String,
    local_port: u16,
    remote_port: u16,
}

/// A live debug session. Owned exclusively by the invocation that created
/// it and torn down exactly once, via [`Session::shutdown`] or by dropping
/// the stop token holder.
pub struct Session {
    pub local_port: u16,
    pub remote_port: u16,
    ready: oneshot::Receiver<()>,
    stop: CancellationToken,
    serve: JoinHandle<Result<()>>,
}

impl Session {
    /// Wait for the one-shot readiness signal: the local listener is bound
    /// and accepting connections.
    pub async fn ready(&mut self) -> Result<()> {
        (&mut self.ready)
            .await
            .map_err(|_| Error::Stream("tunnel closed before signaling readiness".to_string()))
    }

    /// A clone of the stop signal, e.g. to wire up signal handling.
    #[must_use]
    pub fn stop_signal(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Request teardown.
    pub fn shutdown(&self) {
        self.stop.cancel();
    }

    /// Block until the tunnel exits (external stop signal or failure).
    pub async fn join(self) -> Result<()> {
        self.serve
            .await
            .map_err(|e| Error::Stream(format!("tunnel task failed: {e}")))?
    }
}

impl SessionTunnel {
    #[must_use]
    pub fn new(
        cluster: ClusterApi,
        pod: impl Into<String>,
        container: impl Into<String>,
        local_port: u16,
        remote_port: u16,
    ) -> Self {
        Self {
            cluster,
            pod: pod.into(),
            container: container.into(),
            local_port,
            remote_port,
        }
    }

    /// Point the tunnel at a different pod (after a rollout produced a new
    /// one).
    pub fn retarget(&mut self, pod: impl Into<String>) {
        self.pod = pod.into();
    }

    /// Phase one: run the idempotent debugger install to completion.
    pub async fn install_debugger(&self) -> Result<()> {
        info!(pod = %self.pod, "installing debugger toolchain");
        self.run_script_to_completion("podtap-install.sh", scripts::INSTALL_DEBUGGER, &[])
            .await?;
        Ok(())
    }

    /// Phase two: attach the debugger to an existing pid and wait for the
    /// launch-readiness marker.
    pub async fn attach(&self, pid: u32) -> Result<()> {
        info!(pod = %self.pod, pid, "attaching debugger to process");
        self.launch(
            "podtap-attach.sh",
            &scripts::attach_script(),
            &[self.remote_port.to_string(), pid.to_string()],
        )
        .await
    }

    /// Phase two, relaunch flavor: terminate the pid and restart its command
    /// line under the debugger, then wait for the launch-readiness marker.
    pub async fn relaunch(&self, pid: u32, argv: &[String]) -> Result<()> {
        info!(pod = %self.pod, pid, "relaunching process under debugger");
        let mut args = vec![self.remote_port.to_string(), pid.to_string()];
        args.extend(argv.iter().cloned());
        self.launch("podtap-relaunch.sh", &scripts::relaunch_script(), &args)
            .await
    }

    /// Deliver a script over exec stdin and run it, waiting for exec
    /// completion.
    async fn run_script_to_completion(
        &self,
        name: &str,
        script: &str,
        args: &[String],
    ) -> Result<String> {
        self.deliver(name, script).await?;
        self.cluster
            .exec_capture(&self.pod, &self.container, run_command(name, args))
            .await
    }

    /// Deliver a launch script, run it, and consume its output until the
    /// readiness marker appears.
    async fn launch(&self, name: &str, script: &str, args: &[String]) -> Result<()> {
        self.deliver(name, script).await?;
        let mut attached = self
            .cluster
            .exec_streamed(&self.pod, &self.container, run_command(name, args))
            .await?;
        let stdout = attached
            .stdout()
            .ok_or_else(|| Error::Stream("launch exec did not provide stdout".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut signaled = false;
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| Error::Stream(e.to_string()))?
        {
            debug!(pod = %self.pod, line = %line, "launch output");
            if line.contains(scripts::READY_MARKER) {
                signaled = true;
                break;
            }
        }
        if !signaled {
            return Err(Error::Stream(
                "debugger never signaled launch readiness".to_string(),
            ));
        }
        // The script exits right after the marker; let the stream drain.
        let _ = attached.join().await;
        Ok(())
    }

    async fn deliver(&self, name: &str, script: &str) -> Result<()> {
        self.cluster
            .exec_with_stdin(
                &self.pod,
                &self.container,
                vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    format!("cat /dev/stdin > /{name}"),
                ],
                script.as_bytes(),
            )
            .await
    }

    /// Bind the local listener and serve the tunnel in the background.
    ///
    /// The returned [`Session`] signals readiness exactly once when the
    /// listener is bound, and serves until its stop signal fires. Each
    /// accepted connection gets its own port-forward stream.
    #[must_use]
    pub fn open(self) -> Session {
        let (ready_tx, ready_rx) = oneshot::channel();
        let stop = CancellationToken::new();
        let serve_stop = stop.clone();
        let local_port = self.local_port;
        let remote_port = self.remote_port;
        let serve = tokio::spawn(async move { self.serve(ready_tx, serve_stop).await });
        Session {
            local_port,
            remote_port,
            ready: ready_rx,
            stop,
            serve,
        }
    }

    async fn serve(self, ready: oneshot::Sender<()>, stop: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, self.local_port))
            .await
            .map_err(|e| Error::Stream(format!("failed to bind 127.0.0.1:{}: {e}", self.local_port)))?;
        info!(
            local_port = self.local_port,
            remote_port = self.remote_port,
            pod = %self.pod,
            "tunnel listening"
        );
        let _ = ready.send(());

        loop {
            tokio::select! {
                () = stop.cancelled() => {
                    info!(pod = %self.pod, "tunnel stopped");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (client_conn, peer) = accepted
                        .map_err(|e| Error::Stream(format!("accept failed: {e}")))?;
                    debug!(%peer, "tunnel connection accepted");
                    let mut forwarder = self
                        .cluster
                        .portforward(&self.pod, self.remote_port)
                        .await?;
                    let Some(upstream) = forwarder.take_stream(self.remote_port) else {
                        return Err(Error::Stream(
                            "port-forward did not provide a stream".to_string(),
                        ));
                    };
                    tokio::spawn(bridge(client_conn, upstream, forwarder));
                }
            }
        }
    }
}

async fn bridge(
    mut client: tokio::net::TcpStream,
    mut upstream: impl tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    forwarder: kube::api::Portforwarder,
) {
    if let Err(e) = tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
        warn!(error = %e, "tunnel connection ended with error");
    }
    drop(upstream);
    if let Err(e) = forwarder.join().await {
        warn!(error = %e, "port-forward teardown failed");
    }
}

fn run_command(name: &str, args: &[String]) -> Vec<String> {
    let mut command = vec!["sh".to_string(), format!("/{name}")];
    command.extend(args.iter().cloned());
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_command_invokes_delivered_script() {
        let cmd = run_command("podtap-attach.sh", &["2345".to_string(), "17".to_string()]);
        assert_eq!(cmd, ["sh", "/podtap-attach.sh", "2345", "17"]);
    }
}
