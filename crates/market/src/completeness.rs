use chrono::{DateTime, NaiveDate, Utc};
use ohlcv_core::calendar::MarketCalendar;
use ohlcv_core::common::time::TimeProvider;
use ohlcv_core::config::CompletenessConfig;
use ohlcv_core::store::error::StoreError;
use ohlcv_core::store::port::CandleStore;
use std::sync::Arc;
use tracing::debug;

/// 一次完整性判定的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completeness {
    pub date: NaiveDate,
    // 存储中已有的 K 线数量
    pub stored: usize,
    // 判定为完整所需的最少数量
    pub required: usize,
}

impl Completeness {
    pub fn is_complete(&self) -> bool {
        self.stored >= self.required
    }
}

/// # Summary
/// 完整性检查器：比较存储中某日 K 线数量与理论数量，决定是否需要回补。
///
/// # Invariants
/// - 已收盘的交易日要求达到 `ceil(完整数量 × full_day_percent / 100)`。
/// - 盘中的当日要求达到 `ExpectedCandleCount(now) − in_progress_tolerance`。
/// - 周末、未来日期以及开盘前的当日都视为完整。
pub struct CompletenessChecker {
    store: Arc<dyn CandleStore>,
    calendar: MarketCalendar,
    clock: Arc<dyn TimeProvider>,
    full_day_percent: usize,
    in_progress_tolerance: usize,
}

impl CompletenessChecker {
    pub fn new(
        store: Arc<dyn CandleStore>,
        calendar: MarketCalendar,
        clock: Arc<dyn TimeProvider>,
        config: &CompletenessConfig,
    ) -> Self {
        Self {
            store,
            calendar,
            clock,
            full_day_percent: config.full_day_percent,
            in_progress_tolerance: config.in_progress_tolerance,
        }
    }

    /// 完整交易日所需的最少 K 线数量 (向上取整)。
    pub fn full_day_required(&self) -> usize {
        let full = self.calendar.full_day_candle_count();
        (full * self.full_day_percent).div_ceil(100)
    }

    /// # Summary
    /// 计算 `date` 在 `now` 时刻判定为完整所需的 K 线数量。
    ///
    /// # Logic
    /// 1. 未来日期与非交易日为 0。
    /// 2. 当日且尚未收盘：理论数量减去容差 (开盘前理论数量为 0)。
    /// 3. 其余 (已收盘的当日或历史交易日)：完整交易日阈值。
    pub fn required_count(&self, date: NaiveDate, now: DateTime<Utc>) -> usize {
        let today = self.calendar.local_date(now);
        if date > today || !self.calendar.is_trading_day(date) {
            return 0;
        }
        if date == today && now < self.calendar.close_at(today) {
            return self
                .calendar
                .expected_candle_count(now)
                .saturating_sub(self.in_progress_tolerance);
        }
        self.full_day_required()
    }

    /// 对已知数量做判定，不访问存储。
    pub fn assess(&self, date: NaiveDate, stored: usize) -> Completeness {
        Completeness {
            date,
            stored,
            required: self.required_count(date, self.clock.now()),
        }
    }

    /// # Summary
    /// 读取存储并判定某证券某日是否完整。
    ///
    /// # Arguments
    /// * `symbol`: 证券代码。
    /// * `date`: 市场本地日期。
    ///
    /// # Returns
    /// 判定结果；存储读取失败时返回 `StoreError`，由调用方决定是否回补。
    pub async fn check(&self, symbol: &str, date: NaiveDate) -> Result<Completeness, StoreError> {
        let stored = self.store.load_day(symbol, date).await?.len();
        let result = self.assess(date, stored);
        debug!(
            symbol,
            %date,
            stored = result.stored,
            required = result.required,
            "Completeness checked"
        );
        Ok(result)
    }

    pub async fn is_complete(&self, symbol: &str, date: NaiveDate) -> Result<bool, StoreError> {
        Ok(self.check(symbol, date).await?.is_complete())
    }
}
