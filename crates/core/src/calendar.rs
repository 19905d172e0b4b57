use crate::common::TimeFrame;
use chrono::offset::LocalResult;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// # Summary
/// 对外暴露的二值市场状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Open,
    Closed,
}

impl std::fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketStatus::Open => write!(f, "open"),
            MarketStatus::Closed => write!(f, "closed"),
        }
    }
}

/// # Summary
/// 交易时段阶段，轮询调度器依据它决定休眠策略。
///
/// # Invariants
/// - 只有 `Open` 阶段对应 `MarketStatus::Open`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MarketPhase {
    // 周六或周日
    Weekend,
    // 交易日开盘前
    PreMarket,
    // 交易时段内 [open, close)
    Open,
    // 交易日收盘后
    AfterClose,
}

impl MarketPhase {
    /// 折叠为对外的二值状态。
    pub fn status(self) -> MarketStatus {
        match self {
            MarketPhase::Open => MarketStatus::Open,
            _ => MarketStatus::Closed,
        }
    }
}

/// 交易日历构造错误。
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CalendarError {
    #[error("market open {open} must be earlier than close {close}")]
    InvalidWindow { open: NaiveTime, close: NaiveTime },
    #[error("interval {0} is not an intraday interval")]
    NotIntraday(TimeFrame),
}

/// # Summary
/// 单一时区、固定时段的交易日历。纯函数，无内部状态。
///
/// # Invariants
/// - `open < close`，且交易时段不跨越本地午夜。
/// - 仅以周末判断休市，不处理节假日。
/// - `timeframe` 必须是日内周期。
#[derive(Debug, Clone, Copy)]
pub struct MarketCalendar {
    // 市场所在时区
    tz: Tz,
    // 每日开盘时间 (本地)
    open: NaiveTime,
    // 每日收盘时间 (本地，不含)
    close: NaiveTime,
    // K 线周期
    timeframe: TimeFrame,
}

impl MarketCalendar {
    /// # Summary
    /// 创建交易日历。
    ///
    /// # Arguments
    /// * `tz`: 市场时区。
    /// * `open`: 本地开盘时间。
    /// * `close`: 本地收盘时间。
    /// * `timeframe`: K 线周期，用于推算理论 K 线数量。
    ///
    /// # Returns
    /// 时段非法或周期不是日内周期时返回 `CalendarError`。
    pub fn new(
        tz: Tz,
        open: NaiveTime,
        close: NaiveTime,
        timeframe: TimeFrame,
    ) -> Result<Self, CalendarError> {
        if open >= close {
            return Err(CalendarError::InvalidWindow { open, close });
        }
        if !timeframe.is_intraday() {
            return Err(CalendarError::NotIntraday(timeframe));
        }
        Ok(Self {
            tz,
            open,
            close,
            timeframe,
        })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn timeframe(&self) -> TimeFrame {
        self.timeframe
    }

    pub fn market_open(&self) -> NaiveTime {
        self.open
    }

    pub fn market_close(&self) -> NaiveTime {
        self.close
    }

    /// `now` 所在的本地日期。
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    /// 是否为交易日 (周一至周五)。
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// # Summary
    /// 计算 `now` 所处的交易阶段。
    ///
    /// # Logic
    /// 1. 转换为本地时间，周末直接返回 `Weekend`。
    /// 2. 按本地墙上时间与 [open, close) 比较。
    pub fn phase(&self, now: DateTime<Utc>) -> MarketPhase {
        let local = now.with_timezone(&self.tz);
        if !self.is_trading_day(local.date_naive()) {
            return MarketPhase::Weekend;
        }
        let time = local.time();
        if time < self.open {
            MarketPhase::PreMarket
        } else if time < self.close {
            MarketPhase::Open
        } else {
            MarketPhase::AfterClose
        }
    }

    pub fn status(&self, now: DateTime<Utc>) -> MarketStatus {
        self.phase(now).status()
    }

    /// # Summary
    /// 上一个交易日。
    ///
    /// # Logic
    /// 向前回退一天，若落在周末则继续回退。
    pub fn previous_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut day = date;
        while let Some(prev) = day.pred_opt() {
            day = prev;
            if self.is_trading_day(day) {
                break;
            }
        }
        day
    }

    /// 下一个交易日，与 `previous_trading_day` 对称。
    pub fn next_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let mut day = date;
        while let Some(next) = day.succ_opt() {
            day = next;
            if self.is_trading_day(day) {
                break;
            }
        }
        day
    }

    /// # Summary
    /// 将本地日期与时间转换为 UTC 时刻。
    ///
    /// # Logic
    /// 1. 唯一映射直接返回。
    /// 2. 夏令时回拨造成的歧义时刻取较早者。
    /// 3. 夏令时跳变造成的不存在时刻顺延一小时。
    pub fn localize(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let naive = date.and_time(time);
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(t) => t.with_timezone(&Utc),
            LocalResult::Ambiguous(early, _) => early.with_timezone(&Utc),
            LocalResult::None => {
                let shifted = naive + Duration::hours(1);
                self.tz
                    .from_local_datetime(&shifted)
                    .earliest()
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
            }
        }
    }

    /// 本地日期 `date` 对应的 UTC 半开区间 [当日 00:00, 次日 00:00)。
    pub fn day_bounds_utc(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.localize(date, NaiveTime::MIN);
        let end = match date.succ_opt() {
            Some(next) => self.localize(next, NaiveTime::MIN),
            None => start + Duration::days(1),
        };
        (start, end)
    }

    pub fn open_at(&self, date: NaiveDate) -> DateTime<Utc> {
        self.localize(date, self.open)
    }

    pub fn close_at(&self, date: NaiveDate) -> DateTime<Utc> {
        self.localize(date, self.close)
    }

    /// # Summary
    /// 严格晚于 `now` 的下一次开盘时刻 (跳过周末)。
    pub fn next_open(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = self.local_date(now);
        if self.is_trading_day(today) {
            let open = self.open_at(today);
            if now < open {
                return open;
            }
        }
        self.open_at(self.next_trading_day(today))
    }

    /// 严格晚于 `now` 的下一个本地午夜。
    pub fn next_midnight(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.day_bounds_utc(self.local_date(now)).1
    }

    /// 完整交易日的理论 K 线数量，例如 08:00–15:30 的 5 分钟线为 90 根。
    pub fn full_day_candle_count(&self) -> usize {
        let minutes = (self.close - self.open).num_minutes();
        usize::try_from(minutes / self.timeframe.minutes()).unwrap_or(0)
    }

    /// # Summary
    /// 当前交易日截至 `now` 应当已经收盘的 K 线数量。
    ///
    /// # Logic
    /// 1. 非交易日或开盘前为 0。
    /// 2. 盘中为 `floor(开盘后经过的分钟数 / 周期分钟数)`。
    /// 3. 收盘后封顶为完整交易日数量。
    pub fn expected_candle_count(&self, now: DateTime<Utc>) -> usize {
        let today = self.local_date(now);
        if !self.is_trading_day(today) {
            return 0;
        }
        let elapsed = (now - self.open_at(today)).num_minutes();
        if elapsed <= 0 {
            return 0;
        }
        let count = usize::try_from(elapsed / self.timeframe.minutes()).unwrap_or(0);
        count.min(self.full_day_candle_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2026-03-02 为周一；3 月 8 日之前芝加哥为 CST (UTC-6)
    fn calendar() -> MarketCalendar {
        MarketCalendar::new(
            chrono_tz::America::Chicago,
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
            TimeFrame::Minute5,
        )
        .unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_phase_and_status() {
        let cal = calendar();
        let at = |h, mi| Utc.with_ymd_and_hms(2026, 3, 2, h, mi, 0).unwrap();

        assert_eq!(cal.phase(at(13, 59)), MarketPhase::PreMarket);
        assert_eq!(cal.phase(at(14, 0)), MarketPhase::Open);
        assert_eq!(cal.phase(at(21, 29)), MarketPhase::Open);
        assert_eq!(cal.phase(at(21, 30)), MarketPhase::AfterClose);
        assert_eq!(cal.status(at(21, 30)), MarketStatus::Closed);
        assert_eq!(cal.status(at(15, 0)), MarketStatus::Open);

        // 周六本地 10:00
        let saturday = Utc.with_ymd_and_hms(2026, 3, 7, 16, 0, 0).unwrap();
        assert_eq!(cal.phase(saturday), MarketPhase::Weekend);
        assert_eq!(cal.status(saturday), MarketStatus::Closed);
    }

    #[test]
    fn test_previous_trading_day_skips_weekend() {
        let cal = calendar();
        assert_eq!(cal.previous_trading_day(date(2026, 3, 3)), date(2026, 3, 2));
        assert_eq!(cal.previous_trading_day(date(2026, 3, 2)), date(2026, 2, 27));
        assert_eq!(cal.previous_trading_day(date(2026, 3, 8)), date(2026, 3, 6));
        assert_eq!(cal.next_trading_day(date(2026, 3, 6)), date(2026, 3, 9));
    }

    #[test]
    fn test_expected_candle_count() {
        let cal = calendar();
        let open = cal.open_at(date(2026, 3, 2));

        assert_eq!(cal.expected_candle_count(open - Duration::minutes(30)), 0);
        assert_eq!(cal.expected_candle_count(open), 0);
        assert_eq!(cal.expected_candle_count(open + Duration::minutes(125)), 25);
        assert_eq!(cal.expected_candle_count(open + Duration::minutes(129)), 25);
        assert_eq!(cal.expected_candle_count(open + Duration::hours(10)), 90);
        assert_eq!(cal.full_day_candle_count(), 90);
    }

    #[test]
    fn test_day_bounds_and_next_events() {
        let cal = calendar();
        let (start, end) = cal.day_bounds_utc(date(2026, 3, 2));
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 3, 3, 6, 0, 0).unwrap());

        // 周五收盘后，下一次开盘为周一
        let friday_evening = Utc.with_ymd_and_hms(2026, 2, 27, 23, 0, 0).unwrap();
        assert_eq!(cal.next_open(friday_evening), cal.open_at(date(2026, 3, 2)));

        // 周一开盘前，下一次开盘为当日
        let monday_early = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        assert_eq!(cal.next_open(monday_early), cal.open_at(date(2026, 3, 2)));

        assert_eq!(cal.next_midnight(monday_early), end);
    }

    #[test]
    fn test_dst_spring_forward_day_is_shorter() {
        let cal = calendar();
        // 2026-03-08 芝加哥切换夏令时，当天只有 23 小时
        let (start, end) = cal.day_bounds_utc(date(2026, 3, 8));
        assert_eq!(end - start, Duration::hours(23));
        // 夏令时后开盘为 13:00 UTC
        assert_eq!(
            cal.open_at(date(2026, 3, 9)),
            Utc.with_ymd_and_hms(2026, 3, 9, 13, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_invalid_calendar_rejected() {
        let eight = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        let err = MarketCalendar::new(chrono_tz::UTC, eight, eight, TimeFrame::Minute5);
        assert!(matches!(err, Err(CalendarError::InvalidWindow { .. })));

        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let err = MarketCalendar::new(chrono_tz::UTC, eight, nine, TimeFrame::Day1);
        assert_eq!(err.unwrap_err(), CalendarError::NotIntraday(TimeFrame::Day1));
    }
}
