use std::net::SocketAddr;

use axum_server::tls_rustls::RustlsConfig;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webhook::{build_router, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webhook=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let tls = RustlsConfig::from_pem_file(&config.cert_path, &config.key_path).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "admission service listening");

    axum_server::bind_rustls(addr, tls)
        .serve(build_router().into_make_service())
        .await?;

    Ok(())
}
