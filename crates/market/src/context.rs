use crate::stats::IngestStats;
use ohlcv_core::calendar::MarketCalendar;
use ohlcv_core::common::time::TimeProvider;
use ohlcv_core::market::port::MarketDataProvider;
use ohlcv_core::store::port::CandleStore;
use ohlcv_session::SessionCache;
use std::sync::Arc;

/// # Summary
/// 后台任务与查询服务共享的依赖句柄。
///
/// # Invariants
/// - 进程启动时构造一次，之后只克隆 `Arc`，所有任务看到同一份存储、缓存与统计。
#[derive(Clone)]
pub struct MarketContext {
    pub calendar: MarketCalendar,
    pub clock: Arc<dyn TimeProvider>,
    pub store: Arc<dyn CandleStore>,
    pub provider: Arc<dyn MarketDataProvider>,
    pub cache: Arc<SessionCache>,
    pub stats: Arc<IngestStats>,
}

impl MarketContext {
    /// # Summary
    /// 组装上下文，会话缓存与统计在此创建。
    ///
    /// # Arguments
    /// * `calendar`: 交易日历。
    /// * `clock`: 时钟。
    /// * `store`: K 线存储。
    /// * `provider`: 行情源。
    pub fn new(
        calendar: MarketCalendar,
        clock: Arc<dyn TimeProvider>,
        store: Arc<dyn CandleStore>,
        provider: Arc<dyn MarketDataProvider>,
    ) -> Self {
        Self {
            calendar,
            clock,
            store,
            provider,
            cache: Arc::new(SessionCache::new(calendar)),
            stats: Arc::new(IngestStats::new()),
        }
    }
}
