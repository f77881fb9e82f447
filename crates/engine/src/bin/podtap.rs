//! Podtap CLI.
//!
//! Thin front end over the orchestration engine: flags resolve the
//! {pod, container, process, ports, mode} tuple and the engine does the
//! rest. No interactive prompting here.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use engine::provision::FileCertificateSource;
use engine::{ClusterApi, DebugMode, DebugSession, DebugTarget};

/// Attach a remote debugger to a process in a Kubernetes pod.
#[derive(Parser)]
#[command(name = "podtap")]
#[command(about = "Attach a remote debugger to a process running in a pod")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Namespace of the target pod
    #[arg(long, default_value = "default", global = true)]
    namespace: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List the processes running in a container
    ListProcesses {
        /// Target pod
        #[arg(long)]
        pod: String,

        /// Target container
        #[arg(long)]
        container: String,
    },

    /// Attach the debugger to a running process in place
    Attach(SessionArgs),

    /// Kill the process and relaunch it under the debugger, in place
    Restart(SessionArgs),

    /// Rewrite the owning workload so a fresh pod starts under the debugger
    Relaunch {
        #[command(flatten)]
        session: SessionArgs,

        /// PEM certificate the webhook serves TLS with (placed into the
        /// entrypoint config map on first provisioning)
        #[arg(long, env = "PODTAP_WEBHOOK_CERT", default_value = "webhook-cert.pem")]
        webhook_cert: PathBuf,

        /// PEM private key matching the certificate
        #[arg(long, env = "PODTAP_WEBHOOK_KEY", default_value = "webhook-key.pem")]
        webhook_key: PathBuf,
    },
}

#[derive(Args)]
struct SessionArgs {
    /// Target pod
    #[arg(long)]
    pod: String,

    /// Target container
    #[arg(long)]
    container: String,

    /// Pid of the target process inside the container
    #[arg(long)]
    pid: u32,

    /// Local port the debugger client connects to
    #[arg(long, default_value_t = 2345)]
    local_port: u16,

    /// Port the in-pod debug server listens on
    #[arg(long, default_value_t = 2345)]
    remote_port: u16,
}

impl SessionArgs {
    fn target(&self) -> DebugTarget {
        DebugTarget {
            pod: self.pod.clone(),
            container: self.container.clone(),
            pid: self.pid,
            local_port: self.local_port,
            remote_port: self.remote_port,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("podtap=info".parse()?))
        .init();

    let cli = Cli::parse();

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let cluster = ClusterApi::new(client, &cli.namespace);

    match cli.command {
        Commands::ListProcesses { pod, container } => {
            let processes = engine::process::enumerate(&cluster, &pod, &container).await?;
            for process in processes {
                println!("{:>8}  {}", process.pid, process.command());
            }
            Ok(())
        }
        Commands::Attach(args) => {
            let certs = no_certs();
            run_session(cluster, args.target(), DebugMode::Attach, &certs).await
        }
        Commands::Restart(args) => {
            let certs = no_certs();
            run_session(cluster, args.target(), DebugMode::Restart, &certs).await
        }
        Commands::Relaunch {
            session,
            webhook_cert,
            webhook_key,
        } => {
            let certs = FileCertificateSource {
                cert_path: webhook_cert,
                key_path: webhook_key,
            };
            run_session(cluster, session.target(), DebugMode::Relaunch, &certs).await
        }
    }
}

/// Attach and restart never provision the webhook, so they never read
/// certificate material.
fn no_certs() -> FileCertificateSource {
    FileCertificateSource {
        cert_path: PathBuf::new(),
        key_path: PathBuf::new(),
    }
}

async fn run_session(
    cluster: ClusterApi,
    target: DebugTarget,
    mode: DebugMode,
    certs: &FileCertificateSource,
) -> Result<()> {
    let local_port = target.local_port;
    let session = DebugSession::new(cluster, target);
    let mut session = session.run(mode, certs).await?;

    session.ready().await?;
    info!(port = local_port, "debugger tunnel ready on 127.0.0.1");
    println!("Debugger listening on 127.0.0.1:{local_port} (ctrl-c to stop)");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for ctrl-c")?;
    session.shutdown();
    session.join().await?;
    Ok(())
}
