use crate::projection::{AppendOutcome, SessionProjection};
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ohlcv_core::calendar::MarketCalendar;
use ohlcv_core::market::entity::{Candle, DayBucket, SessionView};
use tracing::debug;

/// # Summary
/// 基于 DashMap 的会话投影缓存。
///
/// # Invariants
/// - 每个证券的读改写都在其 DashMap 条目守卫内完成，读者不会看到轮转到一半的状态。
/// - 守卫从不跨越 `.await` 持有。
/// - 不做容量限制，证券集合由启动配置决定。
pub struct SessionCache {
    calendar: MarketCalendar,
    // 证券代码 -> 投影
    projections: DashMap<String, SessionProjection>,
}

impl SessionCache {
    /// # Summary
    /// 创建一个新的空缓存。
    ///
    /// # Arguments
    /// * `calendar` - 用于计算上一交易日的交易日历。
    ///
    /// # Returns
    /// * `Self` - 初始化的缓存实例。
    pub fn new(calendar: MarketCalendar) -> Self {
        Self {
            calendar,
            projections: DashMap::new(),
        }
    }

    /// 整体替换某证券的投影 (启动或清理后的重建)。
    pub fn replace(&self, projection: SessionProjection) {
        debug!(
            symbol = projection.symbol(),
            current = projection.current_day().candles.len(),
            previous = projection.previous_day().candles.len(),
            "Session projection rebuilt"
        );
        self.projections
            .insert(projection.symbol().to_string(), projection);
    }

    /// # Summary
    /// 由存储读出的两天数据重建某证券的投影。
    ///
    /// # Logic
    /// 1. 在锁外由存储数据构造新投影。
    /// 2. 在条目守卫内把旧投影中存储快照没有的 K 线并入新投影后替换，
    ///    读取存储之后才追加进来的 K 线 (例如并发轮询) 因此不会丢失。
    /// 3. 重建成功即清除降级标记。
    ///
    /// # Returns
    /// 从旧投影保留下来的 K 线数量。
    pub fn rebuild(
        &self,
        symbol: &str,
        today: NaiveDate,
        current: Vec<Candle>,
        previous: Vec<Candle>,
    ) -> usize {
        let mut rebuilt =
            SessionProjection::from_days(symbol, &self.calendar, today, current, previous);
        let kept = match self.projections.entry(symbol.to_string()) {
            Entry::Occupied(mut entry) => {
                let kept = rebuilt.merge_missing(entry.get());
                entry.insert(rebuilt);
                kept
            }
            Entry::Vacant(entry) => {
                entry.insert(rebuilt);
                0
            }
        };
        debug!(symbol, today = %today, kept, "Session projection rebuilt from store");
        kept
    }

    /// # Summary
    /// 向某证券的投影追加一根 K 线。
    ///
    /// # Logic
    /// 1. 投影不存在时以 K 线所在日期创建空投影。
    /// 2. 在条目守卫内完成轮转与有序插入。
    pub fn append(&self, candle: Candle) -> AppendOutcome {
        let mut entry = self
            .projections
            .entry(candle.symbol.clone())
            .or_insert_with(|| {
                SessionProjection::empty(&candle.symbol, &self.calendar, candle.session_date())
            });
        entry.append(candle, &self.calendar)
    }

    /// # Summary
    /// 将全部投影推进到 `today`。
    ///
    /// # Returns
    /// 实际发生轮转的证券数量。
    pub fn rotate_all(&self, today: NaiveDate) -> usize {
        let mut rotated = 0;
        for mut entry in self.projections.iter_mut() {
            if entry.rotate_to(today, &self.calendar) {
                rotated += 1;
            }
        }
        rotated
    }

    pub fn set_degraded(&self, symbol: &str, degraded: bool) {
        if let Some(mut entry) = self.projections.get_mut(symbol) {
            entry.set_degraded(degraded);
        }
    }

    /// 某证券的投影中是否有任何 K 线。
    pub fn has_candles(&self, symbol: &str) -> bool {
        self.projections.get(symbol).is_some_and(|p| {
            !p.current_day().candles.is_empty() || !p.previous_day().candles.is_empty()
        })
    }

    /// 某证券的会话视图。
    pub fn get(&self, symbol: &str) -> Option<SessionView> {
        self.projections.get(symbol).map(|p| p.to_view())
    }

    /// 从投影中取某证券某日的桶 (仅限当前日与上一交易日)。
    pub fn day(&self, symbol: &str, date: NaiveDate) -> Option<DayBucket> {
        self.projections
            .get(symbol)
            .and_then(|p| p.day(date).cloned())
    }

    pub fn last_timestamp(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.projections.get(symbol).and_then(|p| p.last_timestamp())
    }

    /// 全部投影的视图，按证券代码排序。
    pub fn snapshot(&self) -> Vec<SessionView> {
        let mut views: Vec<SessionView> = self.projections.iter().map(|p| p.to_view()).collect();
        views.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        views
    }
}
