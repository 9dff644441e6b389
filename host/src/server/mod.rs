use std::net::SocketAddr;

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use tracing::info;

use crate::{tls::TlsManager, HostState, ListenSection};

pub mod api;

/// Start the HTTPS listener with the managed key material.
pub async fn serve(state: HostState, listen: &ListenSection, tls: &TlsManager) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", listen.interface, listen.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", listen.interface, listen.port))?;

    let rustls_config = RustlsConfig::from_pem_file(&tls.cert_file, &tls.key_file)
        .await
        .context("failed to load the TLS key material")?;

    info!("listening on https://{addr}");
    let router = api::create_router(state);
    axum_server::bind_rustls(addr, rustls_config)
        .serve(router.into_make_service())
        .await
        .context("server couldn't serve")?;

    Ok(())
}
