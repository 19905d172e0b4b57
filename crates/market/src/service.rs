use crate::backfill::BackfillFetcher;
use crate::completeness::CompletenessChecker;
use crate::context::MarketContext;
use crate::sweeper::rebuild_projection;
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future::join_all;
use ohlcv_core::common::normalize_symbol;
use ohlcv_core::config::CompletenessConfig;
use ohlcv_core::market::entity::{
    BackfillResult, DayView, HealthView, MarketStatusView, SessionView,
};
use ohlcv_core::market::error::QueryError;
use ohlcv_core::market::port::CandleQuery;
use ohlcv_core::store::error::StoreError;
use ohlcv_session::SessionProjection;
use tracing::{info, warn};

/// 启动对账的汇总。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    // 触发的回补次数
    pub backfills: usize,
    // 回补写入的总行数
    pub written: usize,
    // 投影重建失败的证券数
    pub degraded: usize,
}

/// # Summary
/// 查询服务：`CandleQuery` 的实现，同时负责启动对账与手动回补。
///
/// # Invariants
/// - 只服务配置中的证券，其他代码一律视为未知。
/// - 读路径只访问内存投影或存储，从不等待行情源 (手动回补除外)。
pub struct MarketService {
    ctx: MarketContext,
    symbols: Vec<String>,
    checker: CompletenessChecker,
    backfill: BackfillFetcher,
}

impl MarketService {
    /// # Summary
    /// 创建查询服务。
    ///
    /// # Arguments
    /// * `ctx`: 共享依赖。
    /// * `symbols`: 已规范化的跟踪证券。
    /// * `completeness`: 完整性阈值配置。
    pub fn new(ctx: MarketContext, symbols: Vec<String>, completeness: &CompletenessConfig) -> Self {
        let checker = CompletenessChecker::new(
            ctx.store.clone(),
            ctx.calendar,
            ctx.clock.clone(),
            completeness,
        );
        let backfill = BackfillFetcher::new(
            ctx.provider.clone(),
            ctx.store.clone(),
            ctx.calendar,
            ctx.stats.clone(),
        );
        Self {
            ctx,
            symbols,
            checker,
            backfill,
        }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    fn tracked(&self, symbol: &str) -> Result<String, QueryError> {
        let symbol = normalize_symbol(symbol);
        if self.symbols.contains(&symbol) {
            Ok(symbol)
        } else {
            Err(QueryError::UnknownSymbol(symbol))
        }
    }

    /// # Summary
    /// 证券是否有任何数据：先看内存投影，为空时再查询存储中有数据的证券列表。
    async fn has_data(&self, symbol: &str) -> Result<bool, StoreError> {
        if self.ctx.cache.has_candles(symbol) {
            return Ok(true);
        }
        let stored = self.ctx.store.symbols().await?;
        Ok(stored.iter().any(|s| s == symbol))
    }

    /// # Summary
    /// 单个证券的启动对账。
    ///
    /// # Logic
    /// 1. 依次检查上一交易日与当日的完整性，存储读取失败视为不完整。
    /// 2. 不完整的日期执行整日回补。
    /// 3. 由存储重建投影，失败时建立空投影并标记降级。
    async fn bootstrap_symbol(&self, symbol: &str, today: NaiveDate) -> BootstrapReport {
        let mut report = BootstrapReport::default();
        let previous = self.ctx.calendar.previous_trading_day(today);

        for date in [previous, today] {
            let complete = match self.checker.check(symbol, date).await {
                Ok(result) => result.is_complete(),
                Err(e) => {
                    self.ctx.stats.record_store_failure();
                    warn!(symbol, %date, error = %e, "Completeness check failed, backfilling");
                    false
                }
            };
            if !complete {
                report.backfills += 1;
                report.written += self.backfill.backfill_day(symbol, date).await.written;
            }
        }

        if let Err(e) = rebuild_projection(&self.ctx, symbol, today).await {
            self.ctx.stats.record_store_failure();
            warn!(symbol, error = %e, "Initial projection build failed");
            let mut empty = SessionProjection::empty(symbol, &self.ctx.calendar, today);
            empty.set_degraded(true);
            self.ctx.cache.replace(empty);
            report.degraded += 1;
        }
        report
    }

    /// # Summary
    /// 启动对账：全部证券并发检查、回补并建立投影，需在轮询器启动前完成。
    pub async fn bootstrap(&self) -> BootstrapReport {
        let today = self.ctx.calendar.local_date(self.ctx.clock.now());
        let reports = join_all(
            self.symbols
                .iter()
                .map(|symbol| self.bootstrap_symbol(symbol, today)),
        )
        .await;

        let total = reports
            .into_iter()
            .fold(BootstrapReport::default(), |acc, r| BootstrapReport {
                backfills: acc.backfills + r.backfills,
                written: acc.written + r.written,
                degraded: acc.degraded + r.degraded,
            });
        info!(
            %today,
            backfills = total.backfills,
            written = total.written,
            degraded = total.degraded,
            "Bootstrap finished"
        );
        total
    }
}

#[async_trait]
impl CandleQuery for MarketService {
    /// # Summary
    /// 读取某证券某日的全部 K 线。
    ///
    /// # Logic
    /// 1. 校验证券与日期 (不接受未来日期)。
    /// 2. 优先读存储，数量低于完整性阈值时标记 stale。
    /// 3. 当日无数据且该证券在存储与投影中都没有任何数据时返回 `UnknownSymbol`。
    /// 4. 存储失败时回落到内存投影 (stale)，投影也没有该日时返回存储错误。
    async fn get_day(&self, symbol: &str, date: NaiveDate) -> Result<DayView, QueryError> {
        let symbol = self.tracked(symbol)?;
        let today = self.ctx.calendar.local_date(self.ctx.clock.now());
        if date > today {
            return Err(QueryError::InvalidRequest(format!(
                "date {} is in the future",
                date
            )));
        }

        match self.ctx.store.load_day(&symbol, date).await {
            Ok(candles) => {
                if candles.is_empty() && matches!(self.has_data(&symbol).await, Ok(false)) {
                    return Err(QueryError::UnknownSymbol(symbol));
                }
                let stale = !self.checker.assess(date, candles.len()).is_complete();
                Ok(DayView {
                    symbol,
                    date,
                    candle_count: candles.len(),
                    candles,
                    stale,
                })
            }
            Err(e) => {
                self.ctx.stats.record_store_failure();
                warn!(symbol = %symbol, %date, error = %e, "Store read failed, falling back to memory");
                let bucket = self.ctx.cache.day(&symbol, date).ok_or(e)?;
                Ok(DayView {
                    symbol,
                    date,
                    candle_count: bucket.candles.len(),
                    candles: bucket.candles,
                    stale: true,
                })
            }
        }
    }

    /// # Summary
    /// 读取会话投影。
    ///
    /// # Logic
    /// 1. 校验证券，存储与投影中都没有数据时返回 `UnknownSymbol`。
    /// 2. 存储不可用而无法判断时按内存投影作答。
    async fn get_session(&self, symbol: &str) -> Result<SessionView, QueryError> {
        let symbol = self.tracked(symbol)?;
        match self.has_data(&symbol).await {
            Ok(true) => {}
            Ok(false) => return Err(QueryError::UnknownSymbol(symbol)),
            Err(e) => {
                self.ctx.stats.record_store_failure();
                warn!(symbol = %symbol, error = %e, "Store unavailable, serving session from memory");
            }
        }
        Ok(self.ctx.cache.get(&symbol).unwrap_or_else(|| {
            let today = self.ctx.calendar.local_date(self.ctx.clock.now());
            SessionProjection::empty(&symbol, &self.ctx.calendar, today).to_view()
        }))
    }

    async fn get_all_sessions(&self) -> Vec<SessionView> {
        let mut views = Vec::with_capacity(self.symbols.len());
        for symbol in &self.symbols {
            if let Ok(view) = self.get_session(symbol).await {
                views.push(view);
            }
        }
        views
    }

    fn market_status(&self) -> MarketStatusView {
        let now = self.ctx.clock.now();
        let phase = self.ctx.calendar.phase(now);
        MarketStatusView {
            status: phase.status(),
            phase,
            asof: now,
        }
    }

    /// # Summary
    /// 手动回补。
    ///
    /// # Logic
    /// 1. 校验证券与日期。
    /// 2. 同步执行整日回补。
    /// 3. 若该日仍在投影窗口内 (当日或上一交易日)，由存储重建该证券投影。
    async fn trigger_backfill(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<BackfillResult, QueryError> {
        let symbol = self.tracked(symbol)?;
        let today = self.ctx.calendar.local_date(self.ctx.clock.now());
        if date > today {
            return Err(QueryError::InvalidRequest(format!(
                "date {} is in the future",
                date
            )));
        }

        let report = self.backfill.backfill_day(&symbol, date).await;

        if date == today || date == self.ctx.calendar.previous_trading_day(today) {
            match rebuild_projection(&self.ctx, &symbol, today).await {
                Ok(_) => self.ctx.cache.set_degraded(&symbol, false),
                Err(e) => {
                    self.ctx.stats.record_store_failure();
                    self.ctx.cache.set_degraded(&symbol, true);
                    warn!(symbol = %symbol, error = %e, "Projection rebuild after backfill failed");
                }
            }
        }

        Ok(BackfillResult {
            symbol,
            date,
            candles_added: report.written,
        })
    }

    fn health(&self) -> HealthView {
        let now = self.ctx.clock.now();
        let degraded = self
            .ctx
            .cache
            .snapshot()
            .iter()
            .any(|view| view.degraded);
        HealthView {
            status: if degraded { "degraded" } else { "ok" }.to_string(),
            symbols: self.symbols.clone(),
            interval: self.ctx.calendar.timeframe(),
            market_status: self.ctx.calendar.status(now),
            asof: now,
            stats: self.ctx.stats.snapshot(),
        }
    }
}
