use crate::context::MarketContext;
use chrono::NaiveDate;
use ohlcv_core::store::error::StoreError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// 一次清理的结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    // 删除的行数
    pub deleted: u64,
    // 成功重建投影的证券数
    pub rebuilt: usize,
    // 重建失败 (保留内存投影并标记降级) 的证券数
    pub failed: usize,
}

/// # Summary
/// 由存储重建单个证券的会话投影。
///
/// # Logic
/// 1. 读取 `today` 与上一交易日两天的 K 线。
/// 2. 交给缓存在条目守卫内重建，读取期间并发追加的 K 线会被保留。
///
/// # Returns
/// 成功返回存储中两天的 K 线总数；读取失败时缓存保持不变。
pub async fn rebuild_projection(
    ctx: &MarketContext,
    symbol: &str,
    today: NaiveDate,
) -> Result<usize, StoreError> {
    let previous_date = ctx.calendar.previous_trading_day(today);
    let current = ctx.store.load_day(symbol, today).await?;
    let previous = ctx.store.load_day(symbol, previous_date).await?;
    let total = current.len() + previous.len();
    ctx.cache.rebuild(symbol, today, current, previous);
    Ok(total)
}

/// # Summary
/// 午夜清理任务：删除上一交易日之前的数据并由存储重建全部投影。
///
/// # Invariants
/// - 每个本地日期最多清理一次。
/// - 先在内存中轮转再重建，存储不可用时投影仍按日期正确前移。
pub struct RetentionSweeper {
    ctx: MarketContext,
    symbols: Vec<String>,
    // 单次休眠上限，用于发现时钟跳变
    max_sleep: Duration,
    last_swept: Mutex<Option<NaiveDate>>,
}

impl RetentionSweeper {
    pub fn new(ctx: MarketContext, symbols: Vec<String>, max_sleep: Duration) -> Self {
        Self {
            ctx,
            symbols,
            max_sleep,
            last_swept: Mutex::new(None),
        }
    }

    /// 记录某日已完成清理 (启动重建等价于当日清理)。
    pub fn mark_swept(&self, date: NaiveDate) {
        let mut last = self.last_swept.lock().unwrap_or_else(|e| e.into_inner());
        *last = Some(date);
    }

    pub fn last_swept(&self) -> Option<NaiveDate> {
        *self.last_swept.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// # Summary
    /// 以 `today` 为新日期执行一次清理。
    ///
    /// # Logic
    /// 1. 全部投影在内存中轮转到 `today`。
    /// 2. `cutoff = PreviousTradingDay(today)`，删除其本地午夜之前的所有行。
    /// 3. 逐证券由存储重建投影，失败的证券保留轮转后的投影并标记降级。
    pub async fn sweep_once(&self, today: NaiveDate) -> SweepReport {
        let mut report = SweepReport::default();
        let rotated = self.ctx.cache.rotate_all(today);

        let cutoff_date = self.ctx.calendar.previous_trading_day(today);
        let (cutoff, _) = self.ctx.calendar.day_bounds_utc(cutoff_date);
        match self.ctx.store.delete_before(cutoff).await {
            Ok(deleted) => report.deleted = deleted,
            Err(e) => {
                self.ctx.stats.record_store_failure();
                warn!(%cutoff_date, error = %e, "Retention delete failed");
            }
        }

        for symbol in &self.symbols {
            match rebuild_projection(&self.ctx, symbol, today).await {
                Ok(_) => report.rebuilt += 1,
                Err(e) => {
                    self.ctx.stats.record_store_failure();
                    self.ctx.cache.set_degraded(symbol, true);
                    report.failed += 1;
                    warn!(symbol = %symbol, error = %e, "Projection rebuild failed, serving rotated memory");
                }
            }
        }

        self.mark_swept(today);
        info!(
            %today,
            %cutoff_date,
            rotated,
            deleted = report.deleted,
            rebuilt = report.rebuilt,
            failed = report.failed,
            "Retention sweep finished"
        );
        report
    }

    /// # Summary
    /// 清理主循环。
    ///
    /// # Logic
    /// 1. 若当前本地日期尚未清理则立即清理。
    /// 2. 休眠到下一个本地午夜，单次不超过 `max_sleep`。
    pub async fn run(self: Arc<Self>) {
        info!("Retention sweeper started");
        loop {
            let now = self.ctx.clock.now();
            let today = self.ctx.calendar.local_date(now);
            if self.last_swept() != Some(today) {
                self.sweep_once(today).await;
            }

            let until_midnight = (self.ctx.calendar.next_midnight(now) - now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            let sleep = until_midnight
                .max(Duration::from_secs(1))
                .min(self.max_sleep);
            tokio::time::sleep(sleep).await;
        }
    }
}
