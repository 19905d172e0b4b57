use crate::context::MarketContext;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use ohlcv_core::calendar::{MarketCalendar, MarketPhase};
use ohlcv_core::config::PollerConfig;
use ohlcv_core::market::entity::CandleSource;
use ohlcv_session::AppendOutcome;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 休眠原因，仅用于日志。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepReason {
    Weekend,
    PreMarket,
    AfterClose,
    // 两次轮询之间的常规间隔
    Interval,
}

impl fmt::Display for SleepReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SleepReason::Weekend => write!(f, "weekend"),
            SleepReason::PreMarket => write!(f, "pre-market"),
            SleepReason::AfterClose => write!(f, "after-close"),
            SleepReason::Interval => write!(f, "interval"),
        }
    }
}

/// 调度器给出的下一步动作。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Poll,
    Sleep {
        duration: Duration,
        reason: SleepReason,
    },
}

/// # Summary
/// 轮询调度：根据交易日历与当前时刻计算下一次唤醒。
///
/// # Invariants
/// - 纯函数，不读取系统时钟，不休眠。
/// - 任何休眠都不超过对应上限，保证能及时响应停机与时钟跳变。
#[derive(Debug, Clone, Copy)]
pub struct PollerSchedule {
    calendar: MarketCalendar,
    check_interval: Duration,
    weekend_sleep: Duration,
    max_wait: Duration,
    overnight_chunk: Duration,
}

// 任何休眠的下限
const MIN_SLEEP: Duration = Duration::from_secs(1);

impl PollerSchedule {
    pub fn new(calendar: MarketCalendar, config: &PollerConfig) -> Self {
        Self {
            calendar,
            check_interval: config.check_interval().max(MIN_SLEEP),
            weekend_sleep: config.weekend_sleep().max(MIN_SLEEP),
            max_wait: config.max_wait().max(MIN_SLEEP),
            overnight_chunk: config.overnight_chunk().max(MIN_SLEEP),
        }
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// # Summary
    /// 计算 `now` 之后的动作。
    ///
    /// # Logic
    /// 1. 周末：固定长休眠后重新判断。
    /// 2. 开盘前：休眠到开盘，不超过 `max_wait`。
    /// 3. 盘中：立即轮询。
    /// 4. 收盘后：朝下一个交易日开盘分段休眠，每段不超过 `overnight_chunk`。
    pub fn next(&self, now: DateTime<Utc>) -> Wake {
        match self.calendar.phase(now) {
            MarketPhase::Open => Wake::Poll,
            MarketPhase::Weekend => Wake::Sleep {
                duration: self.weekend_sleep,
                reason: SleepReason::Weekend,
            },
            MarketPhase::PreMarket => {
                let until_open = self.calendar.open_at(self.calendar.local_date(now)) - now;
                Wake::Sleep {
                    duration: clamp(until_open, self.max_wait),
                    reason: SleepReason::PreMarket,
                }
            }
            MarketPhase::AfterClose => {
                let until_open = self.calendar.next_open(now) - now;
                Wake::Sleep {
                    duration: clamp(until_open, self.overnight_chunk),
                    reason: SleepReason::AfterClose,
                }
            }
        }
    }
}

// 至少休眠 1 秒，避免边界时刻空转
fn clamp(delta: chrono::Duration, cap: Duration) -> Duration {
    delta
        .to_std()
        .unwrap_or(Duration::ZERO)
        .max(MIN_SLEEP)
        .min(cap)
}

/// 单个证券一次轮询的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    // 新 K 线已写入存储与投影
    New,
    // 与上次相同、空结果或占位行
    Unchanged,
    // 行情源或存储失败
    Failed,
}

/// 一轮轮询的汇总。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub new: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// # Summary
/// 盘中轮询器：逐证券抓取最新一根 K 线，新时段写入存储并追加到会话投影。
///
/// # Invariants
/// - 每个证券的"上次已见时间戳"相互独立，处理顺序不影响结果。
/// - 存储写入失败时 K 线以 `stale` 标记进入投影，且不推进已见时间戳，下一轮重试。
pub struct LivePoller {
    ctx: MarketContext,
    symbols: Vec<String>,
    schedule: PollerSchedule,
    // symbol -> 最近成功入库的 K 线时间戳
    last_seen: DashMap<String, DateTime<Utc>>,
}

impl LivePoller {
    pub fn new(ctx: MarketContext, symbols: Vec<String>, schedule: PollerSchedule) -> Self {
        Self {
            ctx,
            symbols,
            schedule,
            last_seen: DashMap::new(),
        }
    }

    /// 以会话投影中的最新时间戳初始化去重状态，需在启动回补之后调用。
    pub fn seed_last_seen(&self) {
        for symbol in &self.symbols {
            if let Some(ts) = self.ctx.cache.last_timestamp(symbol) {
                self.last_seen.insert(symbol.clone(), ts);
            }
        }
    }

    pub fn last_seen(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.last_seen.get(symbol).map(|ts| *ts)
    }

    /// # Summary
    /// 轮询单个证券。
    ///
    /// # Logic
    /// 1. 抓取最新一根，失败或为空即返回。
    /// 2. 占位行丢弃并计数。
    /// 3. 时间戳与已见相同则忽略。
    /// 4. 写入存储：成功则追加投影并推进已见；失败则以 stale 追加投影。
    async fn poll_symbol(&self, symbol: &str) -> PollOutcome {
        let latest = match self
            .ctx
            .provider
            .fetch_latest(symbol, self.ctx.calendar.timeframe())
            .await
        {
            Ok(Some(candle)) => candle,
            Ok(None) => {
                debug!(symbol, "Provider returned no candle");
                return PollOutcome::Unchanged;
            }
            Err(e) => {
                self.ctx.stats.record_provider_failure();
                warn!(symbol, error = %e, "Latest candle fetch failed");
                return PollOutcome::Failed;
            }
        };

        if latest.is_placeholder() {
            self.ctx.stats.record_placeholders(1);
            debug!(symbol, ts = %latest.timestamp_utc, "Placeholder candle dropped");
            return PollOutcome::Unchanged;
        }
        if self.last_seen(symbol) == Some(latest.timestamp_utc) {
            self.ctx.stats.record_duplicate();
            return PollOutcome::Unchanged;
        }

        let mut candle = latest;
        candle.source = CandleSource::Live;
        candle.stale = false;
        let ts = candle.timestamp_utc;

        match self.ctx.store.upsert(&candle).await {
            Ok(_) => {
                self.ctx.stats.record_written(1);
                let outcome = self.ctx.cache.append(candle);
                self.last_seen.insert(symbol.to_string(), ts);
                debug!(symbol, %ts, ?outcome, "Live candle stored");
                PollOutcome::New
            }
            Err(e) => {
                self.ctx.stats.record_store_failure();
                warn!(symbol, %ts, error = %e, "Live candle write failed, kept in memory as stale");
                candle.stale = true;
                if self.ctx.cache.append(candle) == AppendOutcome::Ignored {
                    debug!(symbol, %ts, "Stale candle outside session window");
                }
                PollOutcome::Failed
            }
        }
    }

    /// 对全部证券执行一轮轮询，各证券并发且相互独立。
    pub async fn poll_once(&self) -> PollReport {
        let outcomes = join_all(self.symbols.iter().map(|s| self.poll_symbol(s))).await;
        let mut report = PollReport::default();
        for outcome in outcomes {
            match outcome {
                PollOutcome::New => report.new += 1,
                PollOutcome::Unchanged => report.unchanged += 1,
                PollOutcome::Failed => report.failed += 1,
            }
        }
        report
    }

    /// # Summary
    /// 轮询主循环，随进程存活，仅由任务中止结束。
    ///
    /// # Logic
    /// 每次循环都以新的时刻询问调度器，按结果轮询或休眠。
    pub async fn run(self: Arc<Self>) {
        info!(symbols = ?self.symbols, "Live poller started");
        loop {
            let wake = self.schedule.next(self.ctx.clock.now());
            let (duration, reason) = match wake {
                Wake::Poll => {
                    let report = self.poll_once().await;
                    info!(
                        new = report.new,
                        unchanged = report.unchanged,
                        failed = report.failed,
                        "Poll cycle finished"
                    );
                    (self.schedule.check_interval(), SleepReason::Interval)
                }
                Wake::Sleep { duration, reason } => (duration, reason),
            };
            debug!(%reason, secs = duration.as_secs(), "Poller sleeping");
            tokio::time::sleep(duration).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, NaiveDate, NaiveTime, TimeZone};
    use ohlcv_core::common::TimeFrame;

    fn schedule() -> PollerSchedule {
        let calendar = MarketCalendar::new(
            chrono_tz::America::Chicago,
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
            TimeFrame::Minute5,
        )
        .unwrap();
        PollerSchedule::new(calendar, &PollerConfig::default())
    }

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        chrono_tz::America::Chicago
            .from_local_datetime(&NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap())
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_schedule_polls_during_session() {
        assert_eq!(schedule().next(local(2026, 3, 2, 9, 5)), Wake::Poll);
        assert_eq!(schedule().next(local(2026, 3, 2, 8, 0)), Wake::Poll);
    }

    #[test]
    fn test_schedule_weekend_sleeps_fixed() {
        assert_eq!(
            schedule().next(local(2026, 3, 7, 12, 0)),
            Wake::Sleep {
                duration: Duration::from_secs(3600),
                reason: SleepReason::Weekend
            }
        );
    }

    #[test]
    fn test_schedule_pre_market_capped() {
        // 距开盘 3 小时，封顶 10 分钟
        assert_eq!(
            schedule().next(local(2026, 3, 2, 5, 0)),
            Wake::Sleep {
                duration: Duration::from_secs(600),
                reason: SleepReason::PreMarket
            }
        );
        // 距开盘 4 分钟
        assert_eq!(
            schedule().next(local(2026, 3, 2, 7, 56)),
            Wake::Sleep {
                duration: Duration::from_secs(240),
                reason: SleepReason::PreMarket
            }
        );
    }

    #[test]
    fn test_schedule_after_close_chunks_toward_next_open() {
        let s = schedule();
        assert_eq!(
            s.next(local(2026, 3, 2, 15, 30)),
            Wake::Sleep {
                duration: Duration::from_secs(600),
                reason: SleepReason::AfterClose
            }
        );
        // 周五收盘后，下一次开盘在周一，仍然分段
        let friday_evening = local(2026, 2, 27, 16, 0);
        match s.next(friday_evening) {
            Wake::Sleep { duration, reason } => {
                assert_eq!(reason, SleepReason::AfterClose);
                assert!(duration <= Duration::from_secs(600));
            }
            Wake::Poll => panic!("market is closed"),
        }
    }

    #[test]
    fn test_schedule_never_sleeps_zero() {
        let s = schedule();
        let just_before_open = local(2026, 3, 2, 8, 0) - ChronoDuration::milliseconds(10);
        match s.next(just_before_open) {
            Wake::Sleep { duration, .. } => assert_eq!(duration, Duration::from_secs(1)),
            Wake::Poll => panic!("still pre-market"),
        }
    }

    #[test]
    fn test_schedule_floors_zero_intervals() {
        let calendar = schedule().calendar;
        let zeros = PollerConfig {
            check_interval_secs: 0,
            weekend_sleep_secs: 0,
            max_wait_secs: 0,
            overnight_chunk_secs: 0,
        };
        let s = PollerSchedule::new(calendar, &zeros);
        assert_eq!(s.check_interval(), Duration::from_secs(1));
        assert_eq!(
            s.next(local(2026, 3, 7, 12, 0)),
            Wake::Sleep {
                duration: Duration::from_secs(1),
                reason: SleepReason::Weekend
            }
        );
        assert_eq!(
            s.next(local(2026, 3, 2, 5, 0)),
            Wake::Sleep {
                duration: Duration::from_secs(1),
                reason: SleepReason::PreMarket
            }
        );
    }
}
