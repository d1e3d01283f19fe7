use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    extract::{ConnectInfo, Request},
    routing::any,
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use portico::{
    adapters::{HealthChecker, HttpClientAdapter, HttpHandler},
    auth::AuthVerifier,
    config::{self, GatewayConfigValidator},
    core::{GatewayService, RateLimiter},
    metrics,
    ports::http_client::HttpClient,
    tracing_setup,
    utils::{ConnectionTracker, GracefulShutdown},
};
use redis::aio::ConnectionManager;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration and exit
    Validate {
        /// Configuration file to validate (defaults to the environment)
        #[clap(short, long)]
        config: Option<String>,
    },
    /// Start the gateway server (default)
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    match args.command {
        Some(Commands::Validate { config }) => {
            return validate_config_command(config.as_deref());
        }
        Some(Commands::Serve) | None => {}
    }

    let cfg = config::load_config().context("Failed to load configuration")?;

    tracing_setup::init_tracing(&cfg.observability)
        .map_err(|e| eyre!("Failed to initialize tracing: {e}"))?;

    GatewayConfigValidator::validate(&cfg)
        .map_err(|e| eyre!("Configuration validation failed: {e}"))?;

    if cfg.observability.metrics_enabled {
        metrics::init_metrics();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        port = cfg.server.port,
        "Starting Portico API Gateway"
    );

    // Coordination store: rate-limit decisions and the readiness probe both
    // depend on it
    let redis_client =
        redis::Client::open(cfg.redis.url.as_str()).context("Failed to parse Redis URL")?;
    let manager_config = redis::aio::ConnectionManagerConfig::new()
        .set_number_of_retries(cfg.redis.max_retries)
        .set_connection_timeout(Duration::from_secs(cfg.redis.connection_timeout_secs))
        .set_response_timeout(Duration::from_secs(cfg.redis.response_timeout_secs));
    let redis = ConnectionManager::new_with_config(redis_client, manager_config)
        .await
        .context("Failed to connect to Redis")?;
    {
        let mut conn = redis.clone();
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        pong.context("Failed to ping Redis")?;
    }
    tracing::info!(url = %cfg.redis.url, "Redis connected");

    let connection_tracker = Arc::new(ConnectionTracker::new());
    let gateway = Arc::new(
        GatewayService::new(&cfg.proxy, connection_tracker.clone())
            .context("Failed to build upstream groups")?,
    );
    let http_client: Arc<dyn HttpClient> = Arc::new(
        HttpClientAdapter::new(&cfg.proxy).context("Failed to create HTTP client adapter")?,
    );
    let auth = Arc::new(
        AuthVerifier::from_config(&cfg.auth, http_client.clone())
            .await
            .context("Failed to initialize authentication")?,
    );

    let rate_limiter = if cfg.rate_limit.enabled {
        tracing::info!(
            algorithm = cfg.rate_limit.algorithm.as_str(),
            bucket_size = cfg.rate_limit.bucket_size,
            refill_rate = cfg.rate_limit.refill_rate,
            "Rate limiting initialized"
        );
        Some(Arc::new(RateLimiter::from_config(
            redis.clone(),
            &cfg.rate_limit,
        )))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let cfg = Arc::new(cfg);
    let handler = Arc::new(HttpHandler::new(
        gateway.clone(),
        http_client.clone(),
        auth,
        rate_limiter,
        connection_tracker.clone(),
        Some(redis.clone()),
        cfg.clone(),
    ));

    // One probe task per group that configures one
    let mut probe_handles = Vec::new();
    for group in gateway.groups() {
        if group.health_check().is_some() {
            let checker = HealthChecker::new(group.clone(), http_client.clone());
            probe_handles.push(tokio::spawn(async move {
                checker.run().await;
            }));
        }
    }

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let make_request_route = |handler: Arc<HttpHandler>| {
        any(
            move |ConnectInfo(client_addr): ConnectInfo<SocketAddr>, req: Request| {
                let handler = handler.clone();
                async move { handler.handle_request(req, Some(client_addr)).await }
            },
        )
    };

    let app = Router::new()
        .route("/{*path}", make_request_route(handler.clone()))
        .route("/", make_request_route(handler.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!(
        read_timeout_secs = cfg.server.read_timeout_secs,
        write_timeout_secs = cfg.server.write_timeout_secs,
        idle_timeout_secs = cfg.server.idle_timeout_secs,
        "Portico API Gateway listening on {}",
        addr
    );

    for (name, upstream) in &cfg.proxy.upstreams {
        tracing::info!(
            group = %name,
            urls = ?upstream.urls,
            weight = upstream.weight,
            "Configured upstream group"
        );
    }

    // Serve until a shutdown signal, then drain within the bounded window
    let shutdown_for_server = graceful_shutdown.clone();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let reason = shutdown_for_server.wait_for_shutdown_signal().await;
        tracing::info!("Shutdown signal received: {:?}", reason);
    });
    let server_handle = tokio::spawn(async move { server.await });

    graceful_shutdown.wait_for_shutdown_signal().await;

    for handle in &probe_handles {
        handle.abort();
    }

    match tokio::time::timeout(graceful_shutdown.shutdown_timeout(), server_handle).await {
        Ok(join_result) => {
            join_result
                .context("Server task failed")?
                .context("Server error")?;
            tracing::info!("Graceful shutdown completed");
        }
        Err(_) => {
            tracing::warn!(
                "Drain timeout of {:?} exceeded, forcing shutdown",
                graceful_shutdown.shutdown_timeout()
            );
        }
    }

    tracing_setup::shutdown_tracing();
    Ok(())
}

/// Validate configuration and exit
fn validate_config_command(config_path: Option<&str>) -> Result<()> {
    let cfg = match config_path {
        Some(path) => {
            println!("🔍 Validating configuration file: {path}");
            config::load_config_from_file(path)
        }
        None => {
            println!("🔍 Validating configuration from environment");
            config::load_config()
        }
    };

    let cfg = match cfg {
        Ok(cfg) => {
            println!("✅ Configuration parsing: OK");
            cfg
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match GatewayConfigValidator::validate(&cfg) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Port: {}", cfg.server.port);
            println!("   • Redis URL: {}", cfg.redis.url);
            println!("   • Auth type: {}", cfg.auth.auth_type.as_str());
            println!(
                "   • Rate limiting: {} ({})",
                if cfg.rate_limit.enabled { "enabled" } else { "disabled" },
                cfg.rate_limit.algorithm.as_str()
            );
            println!("   • Upstream groups: {}", cfg.proxy.upstreams.len());
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Set PORTICO__AUTH__JWT_SECRET (or switch auth type)");
            println!("   • Ensure all upstream URLs start with http:// or https://");
            println!("   • Check that rate limit sizes and rates are positive");
            std::process::exit(1);
        }
    }
}
