use super::error::StoreError;
use crate::market::entity::Candle;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// # Summary
/// 按交易日分区的 K 线持久化接口，系统唯一的事实来源。
///
/// # Invariants
/// - `(symbol, timestamp_utc)` 唯一，写入采用覆盖语义 (后写者胜)。
/// - 对同一键的并发写入必须被串行化。
/// - 占位 K 线不得落库。
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// # Summary
    /// 幂等写入单根 K 线。
    ///
    /// # Returns
    /// 写入返回 `true`；占位 K 线被拒绝时返回 `false`。
    async fn upsert(&self, candle: &Candle) -> Result<bool, StoreError>;

    /// # Summary
    /// 批量幂等写入，语义与逐条 `upsert` 相同。
    ///
    /// # Returns
    /// 实际写入 (非占位) 的行数。
    async fn upsert_many(&self, candles: &[Candle]) -> Result<usize, StoreError>;

    /// # Summary
    /// 加载某证券在某个市场本地交易日内的全部 K 线。
    ///
    /// # Logic
    /// 按本地日期分区检索，结果按 `timestamp_utc` 升序。
    async fn load_day(&self, symbol: &str, date: NaiveDate) -> Result<Vec<Candle>, StoreError>;

    /// # Summary
    /// 删除所有 `timestamp_utc < cutoff` 的 K 线。
    ///
    /// # Returns
    /// 被删除的行数 (用于观测)。
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// 当前存储中存在数据的证券代码列表。
    async fn symbols(&self) -> Result<Vec<String>, StoreError>;
}
