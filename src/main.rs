//! NetApp Files provisioner
//!
//! Loads a backend config, initializes the NAS storage driver against the
//! selected service client and serves it over REST, with health and
//! Prometheus endpoints alongside.

use anyhow::Context;
use clap::Parser;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use anf_provisioner::{
    ApiServer, ApiServerConfig, BackendFactory, BackendOptions, DriverConfig, DriverContext,
    DriverMetrics, DriverOptions, NasStorageDriver, StaticEntitlements, StorageDriver,
    StorageDriverRef,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// NetApp Files provisioner - NFS and SMB volumes from capacity pools
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend config file (JSON or YAML)
    #[arg(long, env = "ANF_CONFIG")]
    config: PathBuf,

    /// Secrets file (YAML map of clientID/clientSecret)
    #[arg(long, env = "ANF_SECRETS")]
    secrets: Option<PathBuf>,

    /// Service client implementation
    #[arg(long, env = "ANF_BACKEND", default_value = "memory")]
    backend: String,

    /// Inventory file for the memory client
    #[arg(long, env = "ANF_INVENTORY")]
    inventory: Option<PathBuf>,

    /// Identifier the host assigned to this backend
    #[arg(long, env = "BACKEND_UUID", default_value = "")]
    backend_uuid: String,

    /// Run with Docker volume plugin semantics
    #[arg(long, env = "DOCKER_CONTEXT")]
    docker: bool,

    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: SocketAddr,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: SocketAddr,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting NetApp Files provisioner");
    info!("  Version: {}", anf_provisioner::VERSION);
    info!("  Config: {}", args.config.display());
    info!("  Backend client: {}", args.backend);
    info!("  REST API: {}", args.api_addr);

    let config = DriverConfig::from_file(&args.config)
        .with_context(|| format!("failed to load config {}", args.config.display()))?;
    let secrets: BTreeMap<String, String> = match &args.secrets {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read secrets {}", path.display()))?;
            serde_yaml::from_str(&raw).context("invalid secrets file")?
        }
        None => BTreeMap::new(),
    };

    let client = BackendFactory::create(
        &args.backend,
        &config,
        BackendOptions {
            inventory: args.inventory.clone(),
        },
    )?;

    let context = if args.docker {
        DriverContext::Docker
    } else {
        DriverContext::Csi
    };
    let options = DriverOptions {
        backend_uuid: args.backend_uuid.clone(),
        ..DriverOptions::for_context(context)
    };

    let driver = NasStorageDriver::initialize(
        config,
        &secrets,
        options,
        client,
        Arc::new(StaticEntitlements::allow_all()),
    )
    .await
    .context("driver initialization failed")?;
    let driver: StorageDriverRef = Arc::new(driver);
    info!("Driver initialized for backend {}", driver.backend_name());

    let registry = prometheus::Registry::new();
    DriverMetrics::global().register(&registry)?;

    // Start health server
    let health_addr = args.health_addr;
    let health_driver = driver.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr, health_driver).await {
            error!("Health server error: {:#}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr;
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, registry).await {
            error!("Metrics server error: {:#}", e);
        }
    });

    let api_server = Arc::new(ApiServer::new(
        ApiServerConfig {
            rest_addr: args.api_addr,
            ..Default::default()
        },
        driver.clone(),
    ));

    let signal_server = api_server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_server.shutdown();
        }
    });

    api_server.run().await?;

    driver.terminate();
    info!("Provisioner shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("tower=warn".parse()?)
        .add_directive("tower_http=info".parse()?)
        .add_directive("axum=info".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(status: hyper::StatusCode, body: &'static str) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(hyper::Body::from(body));
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: SocketAddr, driver: StorageDriverRef) -> anyhow::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let driver = driver.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let ready = driver.initialized();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => text_response(StatusCode::OK, "ok"),
                        "/readyz" if ready => text_response(StatusCode::OK, "ok"),
                        "/readyz" => {
                            text_response(StatusCode::SERVICE_UNAVAILABLE, "not ready")
                        }
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, Infallible>(response)
                }
            }))
        }
    });

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .context("health server failed")?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr, registry: prometheus::Registry) -> anyhow::Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                async move {
                    if req.uri().path() != "/metrics" {
                        return Ok::<_, Infallible>(text_response(
                            StatusCode::NOT_FOUND,
                            "not found",
                        ));
                    }

                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
                        error!("Failed to encode metrics: {}", e);
                        return Ok(text_response(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "metrics encoding failed",
                        ));
                    }

                    let mut response = Response::new(Body::from(buffer));
                    if let Ok(value) = HeaderValue::from_str(encoder.format_type()) {
                        response.headers_mut().insert(CONTENT_TYPE, value);
                    }
                    Ok(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .context("metrics server failed")?;

    Ok(())
}
