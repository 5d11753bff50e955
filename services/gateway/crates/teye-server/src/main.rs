//! Terminal Eye gateway entry point.
//!
//! Initialises tracing, loads the command catalog from the JSON document
//! named by `--config`, and serves the WebSocket command protocol over
//! HTTP, or HTTPS when the `terminal_eye.ssl` setting is on.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use teye_common::{CommandCatalog, GatewayConfig};
use teye_server::runner::TokioSpawner;
use teye_server::session::CommandEngine;
use teye_server::state::AppState;
use teye_server::transport;

// ===================================================================
// Command line
// ===================================================================

/// Expose a fixed catalog of commands to WebSocket clients.
#[derive(Parser, Debug)]
#[command(name = "teye-server", version, about)]
struct Args {
    /// Path to the JSON configuration document
    #[arg(long, env = "TEYE_CONFIG")]
    config: PathBuf,

    /// Listen port (overrides `terminal_eye.port`, default 1234)
    #[arg(short, long, env = "TEYE_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, env = "TEYE_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Serve the diagnostic console on `GET /`
    #[arg(short, long)]
    debug: bool,
}

// ===================================================================
// Catalog loading
// ===================================================================

fn load_config(path: &Path) -> Result<GatewayConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {}", path.display()))?;
    GatewayConfig::from_json(&text)
        .with_context(|| format!("failed to parse configuration file {}", path.display()))
}

/// Broken entries stay loadable but every request to them fails; make
/// that visible at startup.
fn report_defects(catalog: &CommandCatalog) {
    for (name, spec) in catalog.iter() {
        for index in spec.unnamed_args() {
            tracing::error!(
                command = name,
                index,
                "argument has no name; requests for this command will be rejected",
            );
        }
    }
}

// ===================================================================
// Entry point
// ===================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialise tracing with RUST_LOG env filter.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // 2. Load the catalog once; it is read-only from here on.
    let GatewayConfig { settings, catalog } = load_config(&args.config)?;
    report_defects(&catalog);

    let port = args.port.unwrap_or_else(|| settings.port());
    let addr = SocketAddr::new(args.bind, port);

    tracing::info!(
        config = %args.config.display(),
        commands = catalog.len(),
        default_uid = catalog.default_uid(),
        default_gid = catalog.default_gid(),
        tls_enabled = settings.ssl,
        debug = args.debug,
        "configuration loaded",
    );

    let engine = CommandEngine::new(Arc::new(catalog), Arc::new(TokioSpawner));
    let state = AppState::new(engine, args.debug);

    // 3. Bind and serve (TLS or plaintext).
    if settings.ssl {
        let cert_path = settings
            .ssl_cert
            .as_ref()
            .context("terminal_eye.ssl is set but terminal_eye.ssl_cert is missing")?;
        let key_path = settings
            .ssl_key
            .as_ref()
            .context("terminal_eye.ssl is set but terminal_eye.ssl_key is missing")?;

        // Both ring and aws-lc may be compiled in; pick one explicitly.
        let _ = rustls::crypto::ring::default_provider().install_default();

        tracing::info!("TLS enabled — loading cert from {}", cert_path.display());
        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .context("failed to load TLS certificates")?;

        tracing::info!("Terminal Eye listening — wss://{addr}");

        axum_server::bind_rustls(addr, tls_config)
            .serve(
                transport::router(state).into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .context("HTTPS server error")?;
    } else {
        tracing::info!("Terminal Eye listening — ws://{addr} (TLS disabled)");

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind TCP listener on {addr}"))?;

        transport::serve(listener, state, shutdown_signal())
            .await
            .context("HTTP server error")?;
    }

    tracing::info!("Terminal Eye shut down");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) for graceful shutdown.
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}
