use chrono::{DateTime, NaiveDate, Utc};
use ohlcv_core::calendar::MarketCalendar;
use ohlcv_core::common::TimeFrame;
use ohlcv_core::market::entity::{Candle, DayBucket, SessionView};

/// 向投影追加一根 K 线的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    // 新时段，追加在末尾
    Appended,
    // 乱序到达，插入到有序位置
    Inserted,
    // 同一时段已存在，原地覆盖
    Replaced,
    // 早于上一交易日，忽略
    Ignored,
}

/// # Summary
/// 单个证券的会话投影：当前交易日与上一交易日的有序 K 线。
///
/// # Invariants
/// - 两个桶内的 K 线都按 `timestamp_utc` 严格升序，且同一时段只出现一次。
/// - `previous_day.date == calendar.previous_trading_day(current_day.date)`。
/// - 轮转只向前推进，日期回退的 K 线不会触发轮转。
#[derive(Debug, Clone, PartialEq)]
pub struct SessionProjection {
    symbol: String,
    interval: TimeFrame,
    current_day: DayBucket,
    previous_day: DayBucket,
    // 最近一次由存储重建失败
    degraded: bool,
}

impl SessionProjection {
    /// # Summary
    /// 以 `today` 为当前交易日创建空投影。
    pub fn empty(symbol: &str, calendar: &MarketCalendar, today: NaiveDate) -> Self {
        Self {
            symbol: symbol.to_string(),
            interval: calendar.timeframe(),
            current_day: DayBucket::empty(today),
            previous_day: DayBucket::empty(calendar.previous_trading_day(today)),
            degraded: false,
        }
    }

    /// # Summary
    /// 由存储读出的两天数据构造投影。
    ///
    /// # Logic
    /// 1. 创建空投影。
    /// 2. 依次追加两天的 K 线，顺带完成排序与去重。
    ///
    /// # Arguments
    /// * `symbol`: 证券代码。
    /// * `calendar`: 交易日历。
    /// * `today`: 当前本地日期。
    /// * `current`: `today` 的 K 线。
    /// * `previous`: 上一交易日的 K 线。
    pub fn from_days(
        symbol: &str,
        calendar: &MarketCalendar,
        today: NaiveDate,
        current: Vec<Candle>,
        previous: Vec<Candle>,
    ) -> Self {
        let mut projection = Self::empty(symbol, calendar, today);
        for candle in previous.into_iter().chain(current) {
            projection.append(candle, calendar);
        }
        projection
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn current_day(&self) -> &DayBucket {
        &self.current_day
    }

    pub fn previous_day(&self) -> &DayBucket {
        &self.previous_day
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn set_degraded(&mut self, degraded: bool) {
        self.degraded = degraded;
    }

    /// 投影中最新一根 K 线的时间戳，用于初始化轮询去重状态。
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.current_day
            .last_timestamp()
            .or_else(|| self.previous_day.last_timestamp())
    }

    /// 查找某日的桶。
    pub fn day(&self, date: NaiveDate) -> Option<&DayBucket> {
        if self.current_day.date == date {
            Some(&self.current_day)
        } else if self.previous_day.date == date {
            Some(&self.previous_day)
        } else {
            None
        }
    }

    /// # Summary
    /// 将当前交易日推进到 `date`。
    ///
    /// # Logic
    /// 1. `date` 不晚于当前日期时不做任何事。
    /// 2. 原当前日恰好是 `date` 的上一交易日时降级为 `previous_day`。
    /// 3. 原当前日是周末时保留已有的 `previous_day` (若仍是正确的上一交易日)。
    /// 4. 其余情况 (跨越多个交易日) 上一交易日置空。
    ///
    /// # Returns
    /// 发生轮转返回 `true`。
    pub fn rotate_to(&mut self, date: NaiveDate, calendar: &MarketCalendar) -> bool {
        if date <= self.current_day.date {
            return false;
        }
        let expected_previous = calendar.previous_trading_day(date);
        let old_current = std::mem::replace(&mut self.current_day, DayBucket::empty(date));
        if old_current.date == expected_previous {
            self.previous_day = old_current;
        } else if self.previous_day.date != expected_previous {
            self.previous_day = DayBucket::empty(expected_previous);
        }
        true
    }

    /// # Summary
    /// 追加一根 K 线，必要时先轮转。
    ///
    /// # Logic
    /// 1. K 线日期晚于当前日：先轮转到该日期。
    /// 2. 落入当前日或上一交易日：按时间戳有序插入或覆盖。
    /// 3. 更早的 K 线忽略。
    pub fn append(&mut self, candle: Candle, calendar: &MarketCalendar) -> AppendOutcome {
        let date = candle.session_date();
        self.rotate_to(date, calendar);
        if date == self.current_day.date {
            upsert_sorted(&mut self.current_day, candle)
        } else if date == self.previous_day.date {
            upsert_sorted(&mut self.previous_day, candle)
        } else {
            AppendOutcome::Ignored
        }
    }

    /// # Summary
    /// 把 `other` 中本投影缺少的 K 线补进来。
    ///
    /// # Logic
    /// 1. 只接收日期落在本投影两个桶内的 K 线，不触发轮转。
    /// 2. 已存在的时段保持本投影的版本。
    ///
    /// # Returns
    /// 补入的 K 线数量。
    pub fn merge_missing(&mut self, other: &SessionProjection) -> usize {
        let mut merged = 0;
        for candle in other
            .previous_day
            .candles
            .iter()
            .chain(&other.current_day.candles)
        {
            let date = candle.session_date();
            let bucket = if date == self.current_day.date {
                &mut self.current_day
            } else if date == self.previous_day.date {
                &mut self.previous_day
            } else {
                continue;
            };
            if let Err(i) = bucket
                .candles
                .binary_search_by_key(&candle.timestamp_utc, |c| c.timestamp_utc)
            {
                bucket.candles.insert(i, candle.clone());
                merged += 1;
            }
        }
        merged
    }

    pub fn to_view(&self) -> SessionView {
        SessionView {
            symbol: self.symbol.clone(),
            interval: self.interval,
            current_day: self.current_day.clone(),
            previous_day: self.previous_day.clone(),
            degraded: self.degraded,
        }
    }
}

fn upsert_sorted(bucket: &mut DayBucket, candle: Candle) -> AppendOutcome {
    let len = bucket.candles.len();
    match bucket
        .candles
        .binary_search_by_key(&candle.timestamp_utc, |c| c.timestamp_utc)
    {
        Ok(i) => {
            if let Some(slot) = bucket.candles.get_mut(i) {
                *slot = candle;
            }
            AppendOutcome::Replaced
        }
        Err(i) if i == len => {
            bucket.candles.push(candle);
            AppendOutcome::Appended
        }
        Err(i) => {
            bucket.candles.insert(i, candle);
            AppendOutcome::Inserted
        }
    }
}
