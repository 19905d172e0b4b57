use crate::calendar::{MarketPhase, MarketStatus};
use crate::common::TimeFrame;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;

/// # Summary
/// K 线来源标签，记录该行数据由哪条链路写入。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CandleSource {
    // 盘中轮询抓取的最新一根
    Live,
    // 整日回补
    Backfill,
}

impl CandleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandleSource::Live => "live",
            CandleSource::Backfill => "backfill",
        }
    }
}

impl FromStr for CandleSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(CandleSource::Live),
            "backfill" => Ok(CandleSource::Backfill),
            _ => Err(format!("Unknown CandleSource: {}", s)),
        }
    }
}

/// # Summary
/// 单根日内 K 线实体。
///
/// # Invariants
/// - `(symbol, timestamp_utc)` 全局唯一，同一时段的后续抓取覆盖而非追加。
/// - `timestamp_local` 与 `timestamp_utc` 表示同一时刻，前者携带市场时区偏移。
/// - 占位 K 线 (成交量为 0 且四价相等) 不得落库或对外输出。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Candle {
    // 证券代码 (大写)
    #[schema(example = "AAPL")]
    pub symbol: String,
    // K 线周期
    pub interval: TimeFrame,
    // K 线开始时间 (UTC)
    pub timestamp_utc: DateTime<Utc>,
    // K 线开始时间 (市场本地时区)
    pub timestamp_local: DateTime<FixedOffset>,
    // 开盘价
    #[schema(value_type = f64, example = 150.25)]
    pub open: Decimal,
    // 最高价
    #[schema(value_type = f64, example = 151.0)]
    pub high: Decimal,
    // 最低价
    #[schema(value_type = f64, example = 149.8)]
    pub low: Decimal,
    // 收盘价
    #[schema(value_type = f64, example = 150.9)]
    pub close: Decimal,
    // 成交量
    #[schema(example = 120000)]
    pub volume: u64,
    // 数据来源
    pub source: CandleSource,
    // 存储不可用时仅保存在内存中的数据会被标记为 stale
    pub stale: bool,
    // 抓取时间
    pub fetched_at: DateTime<Utc>,
}

impl Candle {
    /// 是否为占位 K 线：成交量为 0 且开高低收完全相等。
    pub fn is_placeholder(&self) -> bool {
        self.volume == 0
            && self.open == self.high
            && self.high == self.low
            && self.low == self.close
    }

    /// K 线所属的市场本地交易日。
    pub fn session_date(&self) -> NaiveDate {
        self.timestamp_local.date_naive()
    }
}

/// # Summary
/// 单个交易日的有序 K 线序列。
///
/// # Invariants
/// - `candles` 按 `timestamp_utc` 严格升序，且不含重复时段。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DayBucket {
    // 市场本地日期
    #[schema(value_type = String, example = "2026-03-02")]
    pub date: NaiveDate,
    // 当日 K 线
    pub candles: Vec<Candle>,
}

impl DayBucket {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            candles: Vec::new(),
        }
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.candles.last().map(|c| c.timestamp_utc)
    }
}

/// # Summary
/// `GetDay` 的返回视图。
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DayView {
    #[schema(example = "AAPL")]
    pub symbol: String,
    #[schema(value_type = String, example = "2026-03-02")]
    pub date: NaiveDate,
    pub candle_count: usize,
    pub candles: Vec<Candle>,
    // 数据不足完整性阈值，或存储故障时由内存投影兜底
    pub stale: bool,
}

/// # Summary
/// `GetSession` 的返回视图：当前交易日与上一交易日。
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionView {
    #[schema(example = "AAPL")]
    pub symbol: String,
    pub interval: TimeFrame,
    pub current_day: DayBucket,
    pub previous_day: DayBucket,
    // 投影最近一次重建失败，内容可能落后于存储
    pub degraded: bool,
}

/// 市场状态视图。
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MarketStatusView {
    pub status: MarketStatus,
    pub phase: MarketPhase,
    pub asof: DateTime<Utc>,
}

/// 手动回补结果。
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BackfillResult {
    #[schema(example = "AAPL")]
    pub symbol: String,
    #[schema(value_type = String, example = "2026-03-02")]
    pub date: NaiveDate,
    pub candles_added: usize,
}

/// # Summary
/// 入库链路的观测计数快照。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IngestStatsSnapshot {
    // 被丢弃的占位 K 线
    pub placeholders_dropped: u64,
    // 落在目标交易日之外被丢弃的行
    pub out_of_day_dropped: u64,
    // 与上次时间戳相同而忽略的轮询结果
    pub duplicates_ignored: u64,
    // 行情源调用失败次数
    pub provider_failures: u64,
    // 存储读写失败次数
    pub store_failures: u64,
    // 成功写入的 K 线
    pub candles_written: u64,
}

/// 服务健康视图。
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthView {
    pub status: String,
    pub symbols: Vec<String>,
    pub interval: TimeFrame,
    pub market_status: MarketStatus,
    pub asof: DateTime<Utc>,
    pub stats: IngestStatsSnapshot,
}
