mod config;
mod listener;

use std::net::SocketAddr;

use config::RelayConfig;
use firehose_producer::Producer;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Exceptional init failure: log and exit.
fn fatal(msg: &str, error: &dyn std::fmt::Display) -> ! {
    error!(%error, "{msg}");
    std::process::exit(1);
}

fn setup_logging() {
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::prelude::*;

    let level = std::env::var("FIREHOSE_RELAY_LOG_LEVEL")
        .ok()
        .and_then(|val| {
            val.parse::<LevelFilter>().ok().or_else(|| {
                eprintln!("invalid FIREHOSE_RELAY_LOG_LEVEL: {val:?}, defaulting to WARN");
                None
            })
        })
        .unwrap_or(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(level)
        .with(tracing_microjson::JsonLayer::new(std::io::stderr).with_target(true))
        .init();
}

fn setup_rustls() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls ring provider");
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() {
    setup_logging();
    setup_rustls();

    let relay = RelayConfig::from_env().unwrap_or_else(|e| fatal("relay config error", &e));
    let config =
        firehose_producer::Config::from_env().unwrap_or_else(|e| fatal("producer config error", &e));

    let mut producer =
        Producer::new(config).unwrap_or_else(|e| fatal("failed to build producer", &e));
    producer.start();

    let addr = SocketAddr::from(([0, 0, 0, 0], relay.listener_port));
    let listener = TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| fatal("failed to bind listener", &e));
    info!(%addr, "relay listening");

    let cancel = CancellationToken::new();
    let server = tokio::spawn(listener::serve(listener, producer.sender(), cancel.clone()));

    shutdown_signal().await;
    info!("shutdown requested, draining");

    cancel.cancel();
    if let Err(e) = server.await {
        error!(error = %e, "listener task panicked");
    }
    producer.stop().await;
    info!("relay stopped");
}
