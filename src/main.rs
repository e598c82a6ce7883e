mod annotation;
mod config;
mod error;
mod handlers;
mod health;
mod injector;
mod loader;
mod metrics;
mod namespace;
mod patch;
mod sidecar;
mod tls;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use clap::Parser;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder as HttpBuilder;
use hyper_util::service::TowerToHyperService;
use kube::Client;
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

use crate::health::Readiness;

#[derive(Parser)]
#[command(name = "sidecar-injector", about = "Kubernetes sidecar injection webhook")]
struct Cli {
    /// Path to the configuration file
    #[arg(
        long,
        default_value = "/etc/sidecar-injector/config.yaml",
        env = "INJECTOR_CONFIG"
    )]
    config: String,
}

async fn shutdown_signal(shutdown_tx: watch::Sender<()>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received CTRL+C, starting graceful shutdown"),
            _ = sigterm.recv() => info!("received SIGTERM, starting graceful shutdown"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for ctrl_c");
        info!("received CTRL+C, starting graceful shutdown");
    }

    let _ = shutdown_tx.send(());
}

async fn run_https_server(
    addr: SocketAddr,
    tls_acceptor: TlsAcceptor,
    router: Router,
    readiness: Readiness,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let listener = TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind HTTPS on {addr}: {e}"));

    info!(%addr, "HTTPS webhook server listening");
    readiness.mark_ready();

    loop {
        let (tcp_stream, remote_addr) = tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("failed to accept TCP connection: {e}");
                        continue;
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                info!("HTTPS server shutting down");
                break;
            }
        };

        let tls_acceptor = tls_acceptor.clone();
        let router = router.clone();

        tokio::spawn(async move {
            let tls_stream = match tls_acceptor.accept(tcp_stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!(%remote_addr, "TLS handshake failed: {e}");
                    return;
                }
            };

            let io = TokioIo::new(tls_stream);
            let service = TowerToHyperService::new(router.into_service());

            if let Err(e) = HttpBuilder::new(hyper_util::rt::TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                error!(%remote_addr, "error serving connection: {e}");
            }
        });
    }
}

async fn run_http_server(addr: SocketAddr, router: Router, mut shutdown_rx: watch::Receiver<()>) {
    let listener = TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind HTTP on {addr}: {e}"));

    info!(%addr, "HTTP metrics/health server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
            info!("HTTP server shutting down");
        })
        .await
        .unwrap_or_else(|e| error!("HTTP server error: {e}"));
}

fn parse_addr(name: &str, value: &str) -> SocketAddr {
    value.parse().unwrap_or_else(|e| {
        eprintln!("Invalid {name} '{value}': {e}");
        std::process::exit(1);
    })
}

#[tokio::main]
async fn main() {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install default CryptoProvider");

    let cli = Cli::parse();

    let config = config::InjectorConfig::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Failed to load config from {}: {e}", cli.config);
        std::process::exit(1);
    });

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    let injection = &config.injection;
    info!(
        listen_addr = %config.listen_addr,
        metrics_addr = %config.metrics_addr,
        log_level = %config.log_level,
        injection.annotation = %injection.annotation_key(),
        injection.data_key = %injection.data_key,
        injection.allow_annotation_overrides = injection.allow_annotation_overrides,
        injection.allow_label_overrides = injection.allow_label_overrides,
        injection.failure_policy = ?injection.failure_policy,
        "sidecar-injector starting"
    );

    let config_namespace = match namespace::load_config_namespace(
        injection.config_namespace.as_deref(),
        &injection.namespace_file,
    ) {
        Ok(ns) => {
            info!(namespace = %ns, "shared sidecar configmap namespace resolved");
            Some(ns)
        }
        Err(e) => {
            warn!("only pod namespaces will be searched for sidecar configmaps: {e}");
            None
        }
    };

    let tls_config = tls::load_tls_config(&config.tls_cert_path, &config.tls_key_path)
        .unwrap_or_else(|e| {
            eprintln!("Failed to load TLS config: {e}");
            std::process::exit(1);
        });
    let tls_acceptor = TlsAcceptor::from(tls_config);

    let client = Client::try_default().await.unwrap_or_else(|e| {
        eprintln!("Failed to create Kubernetes client: {e}");
        std::process::exit(1);
    });

    let mut registry = Registry::default();
    let injector_metrics = Arc::new(metrics::InjectorMetrics::new(&mut registry));

    let app_state = Arc::new(handlers::AppState {
        injector: injector::SidecarInjector::new(client, injection.clone(), config_namespace)
            .with_metrics(injector_metrics.clone()),
        metrics: injector_metrics,
    });

    let webhook_router = Router::new()
        .route("/mutate", post(handlers::handle_mutate::<Client>))
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .with_state(app_state);

    let readiness = Readiness::default();
    let metrics_router = health::router(registry, readiness.clone());

    let listen_addr = parse_addr("listen_addr", &config.listen_addr);
    let metrics_addr = parse_addr("metrics_addr", &config.metrics_addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let https_shutdown_rx = shutdown_rx.clone();
    let http_shutdown_rx = shutdown_rx;

    tokio::spawn(shutdown_signal(shutdown_tx));

    tokio::join!(
        run_https_server(listen_addr, tls_acceptor, webhook_router, readiness, https_shutdown_rx),
        run_http_server(metrics_addr, metrics_router, http_shutdown_rx),
    );

    info!("sidecar-injector shut down gracefully");
}
