use std::path::PathBuf;
use std::sync::Arc;

use ohlcv_api::server::{AppState, start_server};
use ohlcv_core::common::time::{RealTimeProvider, TimeProvider};
use ohlcv_core::config::AppConfig;
use ohlcv_feed::yahoo::YahooProvider;
use ohlcv_market::MarketContext;
use ohlcv_market::poller::{LivePoller, PollerSchedule};
use ohlcv_market::service::MarketService;
use ohlcv_market::sweeper::RetentionSweeper;
use ohlcv_store::market::SqliteCandleStore;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod settings;

/// # Summary
/// 初始化日志：控制台输出 + `<data_dir>/logs` 下按天滚动的文件。
///
/// # Returns
/// 文件写入线程的 guard，需持有到进程退出。
fn init_tracing(config: &AppConfig) -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    let log_dir = PathBuf::from(&config.database.data_dir).join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "ohlcv.log"));

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,sqlx=warn"))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init()?;
    Ok(guard)
}

/// # Summary
/// 应用启动入口，纯粹的 DI 容器。
///
/// # Logic
/// 1. 加载配置并初始化日志。
/// 2. 实例化基础设施层（SQLite 存储、Yahoo 行情源）。
/// 3. 启动对账：补齐上一交易日与当日，建立会话投影。
/// 4. 启动轮询、清理与 HTTP 三个后台任务。
/// 5. 等待退出信号，中止全部任务。
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. 配置与日志
    let extra_config = std::env::var_os(settings::CONFIG_PATH_ENV).map(PathBuf::from);
    let config = settings::load(extra_config.as_deref())?;
    let _guard = init_tracing(&config)?;
    info!("OHLCV cache starting...");

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    let calendar = config.market.calendar()?;
    let symbols = config.market.normalized_symbols()?;
    config.completeness.validate()?;
    config.poller.validate()?;
    info!(
        symbols = ?symbols,
        interval = %calendar.timeframe(),
        timezone = %calendar.timezone(),
        "Configuration loaded"
    );

    // 2. 基础设施层
    let clock: Arc<dyn TimeProvider> = Arc::new(RealTimeProvider);
    let store = Arc::new(SqliteCandleStore::new(&config.database.data_dir)?);
    let provider = Arc::new(YahooProvider::new(&config.provider, calendar, clock.clone())?);
    let ctx = MarketContext::new(calendar, clock.clone(), store, provider);

    // 3. 启动对账，必须先于轮询
    let service = Arc::new(MarketService::new(
        ctx.clone(),
        symbols.clone(),
        &config.completeness,
    ));
    service.bootstrap().await;

    let poller = Arc::new(LivePoller::new(
        ctx.clone(),
        symbols.clone(),
        PollerSchedule::new(calendar, &config.poller),
    ));
    poller.seed_last_seen();

    let sweeper = Arc::new(RetentionSweeper::new(
        ctx.clone(),
        symbols,
        config.poller.max_wait(),
    ));
    sweeper.mark_swept(calendar.local_date(clock.now()));

    // 4. 后台任务
    let poller_task = tokio::spawn(poller.run());
    let sweeper_task = tokio::spawn(sweeper.run());

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState { query: service };
    let server_task = tokio::spawn(async move {
        if let Err(e) = start_server(state, &bind_addr).await {
            error!(error = %e, "API server stopped");
        }
    });

    info!("All tasks running. Waiting for signals...");

    // 5. 等待退出信号
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting...");
    poller_task.abort();
    sweeper_task.abort();
    server_task.abort();

    ctx.stats.log_summary("shutdown");
    Ok(())
}
