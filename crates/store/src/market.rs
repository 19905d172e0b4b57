use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use ohlcv_core::common::TimeFrame;
use ohlcv_core::market::entity::{Candle, CandleSource};
use ohlcv_core::store::error::StoreError;
use ohlcv_core::store::port::CandleStore;
use rust_decimal::Decimal;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

// 写锁竞争时的最长等待
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// CandleStore 的 SQLite 实现，采用"一库一股"策略。
///
/// # Summary
/// 为每个证券维护一个独立的 SQLite 数据库文件，库内 `candles` 表以
/// `(symbol, timestamp_utc)` 为主键，以 `session_date` (市场本地日期) 建索引实现按日分区。
///
/// # Invariants
/// * 数据库文件存储在 `<root>/market/` 目录下。
/// * 连接池被缓存以避免频繁的文件打开操作。
/// * 价格以 TEXT 存储，读取时无损还原为 `Decimal`。
pub struct SqliteCandleStore {
    base_path: PathBuf,
    pools: DashMap<String, SqlitePool>,
    // 串行化连接池的首次初始化，避免同一文件被并发建表
    init_lock: Mutex<()>,
}

/// `candles` 表的一行。
#[derive(sqlx::FromRow)]
struct CandleRow {
    symbol: String,
    interval: String,
    timestamp_utc: i64,
    timestamp_local: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: i64,
    source: String,
    stale: bool,
    fetched_at: DateTime<Utc>,
}

impl CandleRow {
    fn into_candle(self) -> Result<Candle, StoreError> {
        let corrupt = |field: &str, detail: String| {
            StoreError::Corrupt(format!(
                "{}@{} field {}: {}",
                self.symbol, self.timestamp_utc, field, detail
            ))
        };
        let price = |field: &str, raw: &str| {
            Decimal::from_str(raw).map_err(|e| corrupt(field, e.to_string()))
        };

        Ok(Candle {
            interval: TimeFrame::from_str(&self.interval).map_err(|e| corrupt("interval", e))?,
            timestamp_utc: DateTime::from_timestamp(self.timestamp_utc, 0)
                .ok_or_else(|| corrupt("timestamp_utc", "out of range".into()))?,
            timestamp_local: DateTime::parse_from_rfc3339(&self.timestamp_local)
                .map_err(|e| corrupt("timestamp_local", e.to_string()))?,
            open: price("open", &self.open)?,
            high: price("high", &self.high)?,
            low: price("low", &self.low)?,
            close: price("close", &self.close)?,
            volume: u64::try_from(self.volume).map_err(|e| corrupt("volume", e.to_string()))?,
            source: CandleSource::from_str(&self.source).map_err(|e| corrupt("source", e))?,
            stale: self.stale,
            fetched_at: self.fetched_at,
            symbol: self.symbol,
        })
    }
}

impl SqliteCandleStore {
    /// 创建新的 SqliteCandleStore 实例。
    ///
    /// # Logic
    /// 1. 取 `root` 下的 `market` 子目录。
    /// 2. 确保该目录存在。
    ///
    /// # Arguments
    /// * `root` - 数据根目录。
    ///
    /// # Returns
    /// * `Result<Self, StoreError>` - 存储实例或错误。
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_path = root.as_ref().join("market");
        std::fs::create_dir_all(&base_path).map_err(|e| StoreError::InitError(e.to_string()))?;
        Ok(Self {
            base_path,
            pools: DashMap::new(),
            init_lock: Mutex::new(()),
        })
    }

    /// 证券代码到数据库文件名的映射，路径分隔符替换为下划线。
    fn file_key(symbol: &str) -> String {
        symbol.replace(['/', '\\'], "_")
    }

    /// 获取或初始化特定证券的连接池。
    ///
    /// # Logic
    /// 1. 根据证券代码生成文件名。
    /// 2. 配置 SQLite 连接选项：`create_if_missing`、WAL 与忙等待超时。
    /// 3. 如果缓存中没有，则在初始化锁内二次检查后创建连接池并运行建表 SQL。
    async fn get_or_init_pool(&self, key: &str) -> Result<SqlitePool, StoreError> {
        if let Some(pool) = self.pools.get(key) {
            return Ok(pool.clone());
        }

        let _guard = self.init_lock.lock().await;
        if let Some(pool) = self.pools.get(key) {
            return Ok(pool.clone());
        }

        let db_path = self.base_path.join(format!("{}.db", key));

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| StoreError::InitError(e.to_string()))?;

        // timestamp_utc 为 Unix 秒，保证排序与唯一性不受文本格式影响
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candles (
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                timestamp_utc INTEGER NOT NULL,
                timestamp_local TEXT NOT NULL,
                session_date TEXT NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume INTEGER NOT NULL,
                source TEXT NOT NULL,
                stale INTEGER NOT NULL,
                fetched_at DATETIME NOT NULL,
                PRIMARY KEY (symbol, timestamp_utc)
            );
            CREATE INDEX IF NOT EXISTS idx_candles_session_date
                ON candles (symbol, session_date);
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::InitError(e.to_string()))?;

        debug!(key, "Candle database opened");
        self.pools.insert(key.to_string(), pool.clone());
        Ok(pool)
    }

    /// 列出目录下已存在的全部证券库。
    async fn existing_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_path)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("db")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// 单行写入，供单条与批量写入共用。
async fn write_row<'e, E>(executor: E, candle: &Candle) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let volume = i64::try_from(candle.volume).map_err(|e| StoreError::Database(e.to_string()))?;
    sqlx::query(
        r#"
        INSERT INTO candles (
            symbol, interval, timestamp_utc, timestamp_local, session_date,
            open, high, low, close, volume, source, stale, fetched_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (symbol, timestamp_utc) DO UPDATE SET
            interval = excluded.interval,
            timestamp_local = excluded.timestamp_local,
            session_date = excluded.session_date,
            open = excluded.open,
            high = excluded.high,
            low = excluded.low,
            close = excluded.close,
            volume = excluded.volume,
            source = excluded.source,
            stale = excluded.stale,
            fetched_at = excluded.fetched_at
        "#,
    )
    .bind(&candle.symbol)
    .bind(candle.interval.to_string())
    .bind(candle.timestamp_utc.timestamp())
    .bind(candle.timestamp_local.to_rfc3339())
    .bind(candle.session_date().to_string())
    .bind(candle.open.to_string())
    .bind(candle.high.to_string())
    .bind(candle.low.to_string())
    .bind(candle.close.to_string())
    .bind(volume)
    .bind(candle.source.as_str())
    .bind(candle.stale)
    .bind(candle.fetched_at)
    .execute(executor)
    .await
    .map_err(|e| StoreError::Database(e.to_string()))?;
    Ok(())
}

#[async_trait]
impl CandleStore for SqliteCandleStore {
    /// # Summary
    /// 幂等写入单根 K 线。
    ///
    /// # Logic
    /// 1. 占位 K 线直接拒绝。
    /// 2. 获取个股连接池，执行 `INSERT ... ON CONFLICT DO UPDATE`。
    async fn upsert(&self, candle: &Candle) -> Result<bool, StoreError> {
        if candle.is_placeholder() {
            return Ok(false);
        }
        let pool = self.get_or_init_pool(&Self::file_key(&candle.symbol)).await?;
        write_row(&pool, candle).await?;
        Ok(true)
    }

    /// # Summary
    /// 批量写入。
    ///
    /// # Logic
    /// 1. 按证券分组。
    /// 2. 每个证券在一个事务内逐行 upsert，失败时整批回滚。
    async fn upsert_many(&self, candles: &[Candle]) -> Result<usize, StoreError> {
        let mut groups: Vec<(String, Vec<&Candle>)> = Vec::new();
        for candle in candles.iter().filter(|c| !c.is_placeholder()) {
            let key = Self::file_key(&candle.symbol);
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, group)) => group.push(candle),
                None => groups.push((key, vec![candle])),
            }
        }

        let mut written = 0;
        for (key, group) in groups {
            let pool = self.get_or_init_pool(&key).await?;
            let mut tx = pool
                .begin()
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
            for candle in &group {
                write_row(&mut *tx, candle).await?;
            }
            tx.commit()
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
            written += group.len();
        }
        Ok(written)
    }

    /// # Summary
    /// 加载某证券某交易日的 K 线。
    ///
    /// # Logic
    /// 按 `session_date` 分区查询，`timestamp_utc` 升序。
    async fn load_day(&self, symbol: &str, date: NaiveDate) -> Result<Vec<Candle>, StoreError> {
        let pool = self.get_or_init_pool(&Self::file_key(symbol)).await?;

        let rows = sqlx::query_as::<_, CandleRow>(
            r#"
            SELECT symbol, interval, timestamp_utc, timestamp_local, open, high, low, close,
                   volume, source, stale, fetched_at
            FROM candles
            WHERE symbol = ? AND session_date = ?
            ORDER BY timestamp_utc ASC
            "#,
        )
        .bind(symbol)
        .bind(date.to_string())
        .fetch_all(&pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.into_iter().map(CandleRow::into_candle).collect()
    }

    /// # Summary
    /// 删除所有早于 `cutoff` 的 K 线。
    ///
    /// # Logic
    /// 遍历目录下的每个证券库执行 `DELETE`，累计受影响行数。
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut removed = 0;
        for key in self.existing_keys().await? {
            let pool = self.get_or_init_pool(&key).await?;
            let result = sqlx::query("DELETE FROM candles WHERE timestamp_utc < ?")
                .bind(cutoff.timestamp())
                .execute(&pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
            if result.rows_affected() > 0 {
                debug!(key, removed = result.rows_affected(), "Pruned candles");
            }
            removed += result.rows_affected();
        }
        Ok(removed)
    }

    async fn symbols(&self) -> Result<Vec<String>, StoreError> {
        let mut symbols = Vec::new();
        for key in self.existing_keys().await? {
            let pool = self.get_or_init_pool(&key).await?;
            match sqlx::query_scalar::<_, String>("SELECT DISTINCT symbol FROM candles")
                .fetch_all(&pool)
                .await
            {
                Ok(found) => symbols.extend(found),
                Err(e) => warn!(key, error = %e, "Failed to list symbols"),
            }
        }
        symbols.sort();
        symbols.dedup();
        Ok(symbols)
    }
}
