//! # 测试替身
//!
//! 通过 `test-utils` feature 暴露给下游 crate 的内存存储与脚本化行情源，
//! 用于在不触达 SQLite 与网络的情况下验证调度、回补和投影逻辑。

use crate::calendar::MarketCalendar;
use crate::common::TimeFrame;
use crate::market::entity::{Candle, CandleSource};
use crate::market::error::MarketError;
use crate::market::port::MarketDataProvider;
use crate::store::error::StoreError;
use crate::store::port::CandleStore;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// # Summary
/// 按日历构造一根 K 线，价格围绕 `close` 浮动。
pub fn candle_at(
    calendar: &MarketCalendar,
    symbol: &str,
    at: DateTime<Utc>,
    close: Decimal,
    volume: u64,
) -> Candle {
    let local = at.with_timezone(&calendar.timezone()).fixed_offset();
    Candle {
        symbol: symbol.to_string(),
        interval: calendar.timeframe(),
        timestamp_utc: at,
        timestamp_local: local,
        open: close - Decimal::ONE,
        high: close + Decimal::ONE,
        low: close - Decimal::TWO,
        close,
        volume,
        source: CandleSource::Live,
        stale: false,
        fetched_at: at,
    }
}

/// # Summary
/// 生成某交易日从开盘起连续 `count` 根 K 线。
pub fn session_candles(
    calendar: &MarketCalendar,
    symbol: &str,
    date: NaiveDate,
    count: usize,
) -> Vec<Candle> {
    let open = calendar.open_at(date);
    let step = chrono::Duration::minutes(calendar.timeframe().minutes());
    let mut at = open;
    let mut candles = Vec::with_capacity(count);
    for i in 0..count {
        let close = Decimal::from(100) + Decimal::from(i);
        candles.push(candle_at(calendar, symbol, at, close, 1_000));
        at += step;
    }
    candles
}

/// # Summary
/// 基于 `DashMap` 的内存 `CandleStore`，可注入读写故障。
#[derive(Default)]
pub struct MemCandleStore {
    // symbol -> (timestamp_utc -> candle)
    rows: DashMap<String, BTreeMap<DateTime<Utc>, Candle>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    // 调用计数
    pub upsert_calls: AtomicUsize,
    pub load_calls: AtomicUsize,
}

impl MemCandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// 某证券的总行数
    pub fn row_count(&self, symbol: &str) -> usize {
        self.rows.get(symbol).map(|r| r.len()).unwrap_or(0)
    }

    fn write(&self, candle: &Candle) -> Result<bool, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database("injected write failure".into()));
        }
        if candle.is_placeholder() {
            return Ok(false);
        }
        self.rows
            .entry(candle.symbol.clone())
            .or_default()
            .insert(candle.timestamp_utc, candle.clone());
        Ok(true)
    }
}

#[async_trait]
impl CandleStore for MemCandleStore {
    async fn upsert(&self, candle: &Candle) -> Result<bool, StoreError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        self.write(candle)
    }

    async fn upsert_many(&self, candles: &[Candle]) -> Result<usize, StoreError> {
        let mut written = 0;
        for candle in candles {
            if self.write(candle)? {
                written += 1;
            }
        }
        Ok(written)
    }

    async fn load_day(&self, symbol: &str, date: NaiveDate) -> Result<Vec<Candle>, StoreError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Database("injected read failure".into()));
        }
        Ok(self
            .rows
            .get(symbol)
            .map(|rows| {
                rows.values()
                    .filter(|c| c.session_date() == date)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database("injected write failure".into()));
        }
        let mut removed = 0u64;
        for mut rows in self.rows.iter_mut() {
            let keep = rows.split_off(&cutoff);
            removed += u64::try_from(rows.len()).unwrap_or(u64::MAX);
            *rows = keep;
        }
        Ok(removed)
    }

    async fn symbols(&self) -> Result<Vec<String>, StoreError> {
        let mut symbols: Vec<String> = self
            .rows
            .iter()
            .filter(|r| !r.value().is_empty())
            .map(|r| r.key().clone())
            .collect();
        symbols.sort();
        Ok(symbols)
    }
}

/// # Summary
/// 脚本化行情源：测试预先写入"最新 K 线"与"整日序列"，并统计调用次数。
#[derive(Default)]
pub struct ScriptedProvider {
    latest: DashMap<String, Candle>,
    ranges: Mutex<Vec<Candle>>,
    fail: AtomicBool,
    pub latest_calls: AtomicUsize,
    pub range_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置某证券下一次 `fetch_latest` 的返回值
    pub fn set_latest(&self, candle: Candle) {
        self.latest.insert(candle.symbol.clone(), candle);
    }

    /// 追加 `fetch_range` 可返回的 K 线 (不做日期过滤以模拟边界噪声)
    pub fn push_range(&self, candles: impl IntoIterator<Item = Candle>) {
        let mut ranges = self.ranges.lock().unwrap_or_else(|e| e.into_inner());
        ranges.extend(candles);
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MarketDataProvider for ScriptedProvider {
    async fn fetch_latest(
        &self,
        symbol: &str,
        _timeframe: TimeFrame,
    ) -> Result<Option<Candle>, MarketError> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(MarketError::Timeout);
        }
        Ok(self.latest.get(symbol).map(|c| c.value().clone()))
    }

    async fn fetch_range(
        &self,
        symbol: &str,
        _timeframe: TimeFrame,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<Candle>, MarketError> {
        self.range_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(MarketError::Network("HTTP 503".into()));
        }
        let ranges = self.ranges.lock().unwrap_or_else(|e| e.into_inner());
        Ok(ranges.iter().filter(|c| c.symbol == symbol).cloned().collect())
    }
}
