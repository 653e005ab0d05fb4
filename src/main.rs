//! vk-discord-relay binary entrypoint.
//! Loads env + settings, wires the poller and runs it until SIGINT/SIGTERM.

use std::process::ExitCode;
use std::sync::atomic::Ordering;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vk_discord_relay::config::{self, Credentials};
use vk_discord_relay::{build_poller, telemetry};

/// Filter from RUST_LOG, else LOG_LEVEL, else `info`.
/// `LOG_FORMAT=json` switches to one JSON object per line.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env("LOG_LEVEL"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {e:#}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn run() -> anyhow::Result<()> {
    // Config errors are fatal and abort before the poller starts.
    let settings = config::load_settings_default().context("loading settings")?;
    let creds = Credentials::from_env().context("reading credentials")?;
    info!(?creds, channels = settings.channels.len(), "configuration loaded");

    if let Some(addr) = settings.metrics_addr.as_deref() {
        telemetry::install_prometheus(addr)?;
        info!(%addr, "prometheus exporter listening");
    }

    let poller = build_poller(&settings, creds).await?;
    let shutdown = poller.shutdown_handle();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("termination signal received, finishing current channel");
        shutdown.store(true, Ordering::SeqCst);
    });

    let seen = poller.run().await;
    info!(seen = seen.len(), "relay stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}
