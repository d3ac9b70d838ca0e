// src/main.rs

use axum::serve;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use rust_prebid::adapters::AdapterRegistry;
use rust_prebid::api::{router, AppState};
use rust_prebid::bidding::{CircuitBreakers, ExchangeCoordinator, ReqwestHttpClient};
use rust_prebid::cache::HttpCacheClient;
use rust_prebid::config::{ConfigSource, FileConfigSource};
use rust_prebid::logging::{LogLevel, RuntimeLogger};
use rust_prebid::mock_bidder;

#[derive(Parser, Debug)]
#[command(author = "whiteCcinn", version = "1.0", about = "A Prebid-style bid brokering server")]
struct CliArgs {
    #[arg(short, long, default_value_t = 8080)]
    port: u16,
    #[arg(long, default_value = "logs")]
    log_dir: String,
    #[arg(short, long, default_value = "static/config.json")]
    config: String,
    /// 同时启动本地 mock bidder / mock cache
    #[arg(long)]
    mock_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 设置环境变量 TZ 为东八区
    std::env::set_var("TZ", "Asia/Shanghai");

    let args = CliArgs::parse();

    // 初始化全局 tracing 日志
    let log_file = rolling::hourly(&args.log_dir, "rust_prebid.json");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);
    let subscriber = Registry::default()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().json().with_writer(non_blocking));
    tracing::subscriber::set_global_default(subscriber)?;
    info!("Prebid server starting on port {}", args.port);

    // 初始化运行日志记录器（用于记录服务运行状态、竞价日志、熔断事件等）
    let runtime_logger = RuntimeLogger::new(&args.log_dir, "runtime", 1000, 100, 1000);
    runtime_logger.log(LogLevel::Info, "Prebid server is starting...").await;

    let config = Arc::new(FileConfigSource::new(&args.config).load()?);
    let adapters = AdapterRegistry::from_config(&config)?;
    info!(adapters = ?adapters.names(), "adapters registered");

    let breakers = Arc::new(CircuitBreakers::new(config.circuit_breaker.clone()));
    spawn_breaker_listener(&breakers, Arc::clone(&runtime_logger));

    let mut coordinator = ExchangeCoordinator::new(adapters, breakers, Arc::new(ReqwestHttpClient::default()))
        .with_runtime_logger(Arc::clone(&runtime_logger));
    if config.cache.enabled {
        coordinator = coordinator.with_cache(Arc::new(HttpCacheClient::new(&config.cache.endpoint)), config.cache.clone());
    }

    if let Some(mock_port) = args.mock_port {
        tokio::spawn(async move {
            if let Err(e) = mock_bidder::start_mock_server(mock_port).await {
                error!(error = %e, "mock bidder server failed");
            }
        });
    }

    let state = Arc::new(AppState {
        coordinator,
        config,
        runtime_logger: Arc::clone(&runtime_logger),
    });

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = TcpListener::bind(&addr).await?;
    runtime_logger.log(LogLevel::Info, &format!("Prebid server running at http://{}", addr)).await;

    let shutdown_logger = Arc::clone(&runtime_logger);
    serve(listener, router(state).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            if let Err(e) = signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl_c");
            }
            shutdown_logger.log(LogLevel::Info, "Shutting down gracefully...").await;
        })
        .await?;

    runtime_logger.log(LogLevel::Info, "Prebid server shut down.").await;
    runtime_logger.shutdown().await;
    Ok(())
}

/// 把熔断状态变化写入运行日志
fn spawn_breaker_listener(breakers: &CircuitBreakers, runtime_logger: Arc<RuntimeLogger>) {
    let mut events = breakers.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let line = serde_json::json!({
                        "log_type": "circuit_breaker",
                        "adapter": event.adapter,
                        "transition": event.transition,
                    })
                    .to_string();
                    runtime_logger.log(LogLevel::Warn, &line).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "circuit breaker events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
