// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use fleet_engine::bus::TlsOptions;
use fleet_engine::Supervisor;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fleet-server", version, about = "Cloud-side session gateway for the Fleet Protocol.")]
struct Cli {
    /// Path to the gateway's JSON configuration file.
    config_path: PathBuf,

    /// Connect to the broker over TLS.
    #[arg(long)]
    tls: bool,

    /// CA certificate used to verify the broker, required with --tls.
    #[arg(long, requires = "tls")]
    ca: Option<PathBuf>,

    /// Client certificate presented to the broker, required with --tls.
    #[arg(long, requires = "tls")]
    cert: Option<PathBuf>,

    /// Client private key, required with --tls.
    #[arg(long, requires = "tls")]
    key: Option<PathBuf>,
}

/// Priority: `FLEET_LOG_LEVEL` > `RUST_LOG` > default ("info"). Uses
/// `try_init` so it is safe to call more than once, e.g. from tests.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("FLEET_LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn tls_options(cli: &Cli) -> anyhow::Result<Option<TlsOptions>> {
    if !cli.tls {
        return Ok(None);
    }
    let ca_path = cli.ca.clone().ok_or_else(|| anyhow::anyhow!("--tls requires --ca"))?;
    let cert_path = cli.cert.clone().ok_or_else(|| anyhow::anyhow!("--tls requires --cert"))?;
    let key_path = cli.key.clone().ok_or_else(|| anyhow::anyhow!("--tls requires --key"))?;
    Ok(Some(TlsOptions { ca_path, cert_path, key_path }))
}

/// Waits for SIGTERM or SIGINT and asks every session to stop. A second
/// signal forces immediate exit rather than waiting on a session that's
/// stuck publishing its best-effort `Disconnect`.
async fn watch_for_shutdown(supervisor: Arc<Supervisor>) {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

    tokio::select! {
        _ = async { if let Some(s) = sigterm.as_mut() { s.recv().await } else { std::future::pending().await } } => {
            info!("received SIGTERM, stopping every session");
        }
        _ = async { if let Some(s) = sigint.as_mut() { s.recv().await } else { std::future::pending().await } } => {
            info!("received SIGINT, stopping every session");
        }
    }
    supervisor.stop_all();

    tokio::select! {
        _ = async { if let Some(s) = sigterm.as_mut() { s.recv().await } else { std::future::pending().await } } => {}
        _ = async { if let Some(s) = sigint.as_mut() { s.recv().await } else { std::future::pending().await } } => {}
    }
    info!("received a second signal, forcing exit");
    std::process::exit(130);
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let tls = match tls_options(&cli) {
        Ok(tls) => tls,
        Err(error) => {
            eprintln!("error: {error}");
            std::process::exit(2);
        }
    };

    let supervisor = match Supervisor::start(&cli.config_path, tls) {
        Ok(supervisor) => Arc::new(supervisor),
        Err(error) => {
            error!(%error, "fatal: failed to start from configuration");
            std::process::exit(2);
        }
    };

    tokio::spawn(watch_for_shutdown(Arc::clone(&supervisor)));

    let exit_code = tokio::task::spawn_blocking(move || supervisor.join())
        .await
        .unwrap_or_else(|_| {
            error!("supervisor join task panicked");
            1
        });
    std::process::exit(exit_code);
}
