use crate::stats::IngestStats;
use chrono::NaiveDate;
use ohlcv_core::calendar::MarketCalendar;
use ohlcv_core::market::entity::{Candle, CandleSource};
use ohlcv_core::market::port::MarketDataProvider;
use ohlcv_core::store::port::CandleStore;
use std::sync::Arc;
use tracing::{info, warn};

/// 一次整日回补的结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    // 成功写入的行数
    pub written: usize,
    // 丢弃的占位行
    pub placeholders: usize,
    // 本地日期不是目标日的行
    pub out_of_day: usize,
    // 因存储失败未能写入的行
    pub write_failures: usize,
}

/// # Summary
/// 整日回补：从行情源拉取某日完整序列并写入存储。
///
/// # Invariants
/// - 只写入本地日期等于目标日且非占位的行，来源标记为 `Backfill`。
/// - 失败只记录日志与统计，从不向调用方返回错误，由后续周期重试。
pub struct BackfillFetcher {
    provider: Arc<dyn MarketDataProvider>,
    store: Arc<dyn CandleStore>,
    calendar: MarketCalendar,
    stats: Arc<IngestStats>,
}

impl BackfillFetcher {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        store: Arc<dyn CandleStore>,
        calendar: MarketCalendar,
        stats: Arc<IngestStats>,
    ) -> Self {
        Self {
            provider,
            store,
            calendar,
            stats,
        }
    }

    /// # Summary
    /// 回补某证券某个本地交易日。
    ///
    /// # Logic
    /// 1. 请求 `[date, date+1)` 的完整序列。
    /// 2. 丢弃本地日期不是 `date` 的边界行。
    /// 3. 丢弃占位行。
    /// 4. 其余行标记为 `Backfill` 后在单个事务中批量写入。
    ///
    /// # Arguments
    /// * `symbol`: 证券代码。
    /// * `date`: 市场本地日期。
    ///
    /// # Returns
    /// 回补统计，行情源或存储失败时 `written` 为 0。
    pub async fn backfill_day(&self, symbol: &str, date: NaiveDate) -> BackfillReport {
        let mut report = BackfillReport::default();
        let end = date.succ_opt().unwrap_or(date);

        let rows = match self
            .provider
            .fetch_range(symbol, self.calendar.timeframe(), date, end)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                self.stats.record_provider_failure();
                warn!(symbol, %date, error = %e, "Backfill fetch failed");
                return report;
            }
        };
        if rows.is_empty() {
            warn!(symbol, %date, "Backfill returned no rows");
            return report;
        }

        let mut keep: Vec<Candle> = Vec::with_capacity(rows.len());
        for mut candle in rows {
            if candle.session_date() != date {
                report.out_of_day += 1;
                continue;
            }
            if candle.is_placeholder() {
                report.placeholders += 1;
                continue;
            }
            candle.source = CandleSource::Backfill;
            candle.stale = false;
            keep.push(candle);
        }
        self.stats.record_out_of_day(report.out_of_day);
        self.stats.record_placeholders(report.placeholders);

        match self.store.upsert_many(&keep).await {
            Ok(written) => {
                report.written = written;
                self.stats.record_written(written);
            }
            Err(e) => {
                report.write_failures = keep.len();
                self.stats.record_store_failure();
                warn!(symbol, %date, error = %e, "Backfill write failed");
            }
        }

        info!(
            symbol,
            %date,
            written = report.written,
            placeholders = report.placeholders,
            out_of_day = report.out_of_day,
            "Backfill finished"
        );
        report
    }
}
