//! Kline collector CLI.
//!
//! 기본 동작(`run`)은 백필, 실시간 스케줄러, 스트림 컨슈머, 오케스트레이터
//! HTTP 서버를 하나의 취소 토큰 아래에서 함께 실행합니다.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::future::join_all;
use kline_collector::orchestrator::{self, OrchestratorState};
use kline_collector::{
    BackfillEngine, CandleConsumer, CollectorError, KlineService, RealtimeScheduler,
};
use kline_core::{init_logging, AppConfig, Timeframe};
use kline_data::{
    CandleRepository, Database, RedisStreamTransport, StreamTransport, TimescaleCandleRepository,
};
use kline_exchange::{BinanceClient, ExchangeClient};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "kline-collector")]
#[command(about = "Kline backfill / realtime relay / stream ingestion", long_about = None)]
#[command(version)]
struct Cli {
    /// 설정 파일 경로 (기본: config/default.toml, 없으면 기본값)
    #[arg(long, env = "KLINE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// 전체 파이프라인 실행 (기본값)
    Run,

    /// 모든 심볼을 한 번 백필하고 종료
    Backfill,

    /// 한 심볼의 최신 캔들을 조회/발행하고 종료
    Fetch {
        /// 심볼 (예: BTCUSDT)
        #[arg(long)]
        pair: String,

        /// 캔들 간격 (기본: sync.interval)
        #[arg(long)]
        interval: Option<Timeframe>,

        /// 조회 개수 (기본: sync.limit)
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env는 선택 사항
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config =
        AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    init_logging(&config.log).map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?;
    info!(env = %config.app_env, "Kline collector 시작");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await?,
        Commands::Backfill => backfill_once(config).await?,
        Commands::Fetch {
            pair,
            interval,
            limit,
        } => {
            let interval = interval.unwrap_or(config.sync.interval);
            let limit = limit.unwrap_or(config.sync.limit);
            fetch_once(config, &pair.to_uppercase(), interval, limit).await?
        }
    }

    info!("Kline collector 종료");
    Ok(())
}

// =============================================================================
// 명령
// =============================================================================

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let db = connect_database(&config).await?;
    let repository: Arc<dyn CandleRepository> =
        Arc::new(TimescaleCandleRepository::new(db.clone()));
    let transport: Arc<dyn StreamTransport> = Arc::new(connect_transport(&config).await?);
    let exchange: Arc<dyn ExchangeClient> = Arc::new(BinanceClient::new(&config.exchange)?);

    let cancel = CancellationToken::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    if config.sync.enabled {
        let engine = BackfillEngine::from_config(exchange.clone(), repository.clone(), &config)?;
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move {
            let stats = engine.run(&token).await;
            stats.log_summary("백필");
        }));
    } else {
        info!("Backfill disabled");
    }

    let service = Arc::new(KlineService::from_config(
        exchange.clone(),
        transport.clone(),
        &config,
    ));

    let scheduler = RealtimeScheduler::from_config(service.clone(), &config);
    tasks.push(tokio::spawn(scheduler.run(cancel.clone())));

    let consumer = CandleConsumer::from_config(repository.clone(), transport.clone(), &config);
    let token = cancel.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = consumer.run(token.clone()).await {
            // 구독을 못 하면 수집한 데이터가 저장되지 않으므로 전체를 내린다
            error!(error = %e, "Consumer failed, shutting down");
            token.cancel();
        }
    }));

    let app = orchestrator::router(OrchestratorState {
        service,
        default_interval: config.sync.interval,
    });
    let listener = tokio::net::TcpListener::bind(config.http.bind_addr())
        .await
        .map_err(CollectorError::Server)?;
    info!(addr = %config.http.bind_addr(), "HTTP server listening");

    let token = cancel.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
    });

    let server_exited = tokio::select! {
        _ = shutdown_signal() => false,
        _ = cancel.cancelled() => false,
        joined = &mut server => {
            error!(result = ?joined, "HTTP server exited unexpectedly");
            true
        }
    };
    cancel.cancel();

    let grace = Duration::from_secs(config.http.shutdown_timeout_secs);
    if !server_exited {
        match tokio::time::timeout(grace, &mut server).await {
            Ok(Ok(Err(e))) => warn!(error = %e, "HTTP server error during shutdown"),
            Ok(_) => {}
            Err(_) => {
                warn!("HTTP graceful shutdown timed out, aborting");
                server.abort();
            }
        }
    }

    if tokio::time::timeout(grace, join_all(tasks)).await.is_err() {
        warn!("Background tasks did not stop in time");
    }

    db.pool().close().await;
    Ok(())
}

async fn backfill_once(config: AppConfig) -> anyhow::Result<()> {
    let db = connect_database(&config).await?;
    let repository: Arc<dyn CandleRepository> =
        Arc::new(TimescaleCandleRepository::new(db.clone()));
    let exchange: Arc<dyn ExchangeClient> = Arc::new(BinanceClient::new(&config.exchange)?);

    let engine = BackfillEngine::from_config(exchange, repository, &config)?;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });

    let stats = engine.run(&cancel).await;
    stats.log_summary("백필");

    db.pool().close().await;
    Ok(())
}

async fn fetch_once(
    config: AppConfig,
    pair: &str,
    interval: Timeframe,
    limit: u32,
) -> anyhow::Result<()> {
    let transport: Arc<dyn StreamTransport> = Arc::new(connect_transport(&config).await?);
    let exchange: Arc<dyn ExchangeClient> = Arc::new(BinanceClient::new(&config.exchange)?);
    let service = KlineService::from_config(exchange, transport, &config);

    let count = service.fetch_and_publish(pair, interval, limit).await?;
    info!(pair, interval = %interval, count, subject = service.subject(), "Fetch completed");
    Ok(())
}

// =============================================================================
// 자원 초기화
// =============================================================================

async fn connect_database(config: &AppConfig) -> Result<Database, CollectorError> {
    let db = Database::connect(&config.database)
        .await
        .map_err(CollectorError::Database)?;

    if config.database.run_migrations {
        db.migrate().await.map_err(CollectorError::Database)?;
    }

    Ok(db)
}

async fn connect_transport(config: &AppConfig) -> Result<RedisStreamTransport, CollectorError> {
    let transport = RedisStreamTransport::connect(&config.stream)
        .await
        .map_err(CollectorError::Transport)?;

    transport
        .ensure_stream(&config.stream.subject, &config.stream.durable_name)
        .await
        .map_err(CollectorError::Transport)?;

    Ok(transport)
}

/// Ctrl+C 또는 SIGTERM을 기다립니다.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => warn!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
