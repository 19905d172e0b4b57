use crate::common::TimeFrame;
use crate::market::entity::{
    BackfillResult, Candle, DayView, HealthView, MarketStatusView, SessionView,
};
use crate::market::error::{MarketError, QueryError};
use async_trait::async_trait;
use chrono::NaiveDate;

/// # Summary
/// 外部行情数据提供者接口。
///
/// # Invariants
/// - 实现者必须为每次调用设置有界超时。
/// - 返回的 K 线已带有市场本地时间戳，但不保证已过滤占位行或越界行。
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// # Summary
    /// 获取特定证券最新的一根 K 线。
    ///
    /// # Logic
    /// 1. 请求当日的日内序列。
    /// 2. 取最后一行字段完整的数据。
    ///
    /// # Arguments
    /// * `symbol`: 证券代码。
    /// * `timeframe`: K 线周期。
    ///
    /// # Returns
    /// 有数据返回 `Some(Candle)`，空序列返回 `None`，网络或解析失败返回 `MarketError`。
    async fn fetch_latest(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
    ) -> Result<Option<Candle>, MarketError>;

    /// # Summary
    /// 获取 [start, end) 本地日期区间内的完整 K 线序列。
    ///
    /// # Arguments
    /// * `symbol`: 证券代码。
    /// * `timeframe`: K 线周期。
    /// * `start`: 起始日期 (含)。
    /// * `end`: 截止日期 (不含)。
    ///
    /// # Returns
    /// 成功返回 K 线列表 (可能为空)。
    async fn fetch_range(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Candle>, MarketError>;
}

/// # Summary
/// 面向 HTTP 读层的查询服务契约。
///
/// # Invariants
/// - 除 `trigger_backfill` 外，所有方法都不得等待网络 IO。
#[async_trait]
pub trait CandleQuery: Send + Sync {
    /// 获取某证券某交易日的全部 K 线。
    ///
    /// 未跟踪或没有任何数据的证券返回 `QueryError::UnknownSymbol`。
    async fn get_day(&self, symbol: &str, date: NaiveDate) -> Result<DayView, QueryError>;

    /// 获取某证券的会话投影 (当前交易日 + 上一交易日)，无数据时同 `get_day`。
    async fn get_session(&self, symbol: &str) -> Result<SessionView, QueryError>;

    /// 获取全部有数据的跟踪证券的会话投影。
    async fn get_all_sessions(&self) -> Vec<SessionView>;

    /// 当前市场状态 (open / closed) 及细分阶段。
    fn market_status(&self) -> MarketStatusView;

    /// 同步触发一次整日回补。
    async fn trigger_backfill(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<BackfillResult, QueryError>;

    /// 服务健康状况。
    fn health(&self) -> HealthView;
}
