use crate::calendar::{CalendarError, MarketCalendar};
use crate::common::{TimeFrame, normalize_symbol};
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub market: MarketConfig,
    pub poller: PollerConfig,
    pub completeness: CompletenessConfig,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub data_dir: String,
}

/// 跟踪标的与交易时段
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    // 跟踪的证券代码
    pub symbols: Vec<String>,
    // K 线周期，例如 "5m"
    pub interval: String,
    // IANA 时区名
    pub timezone: String,
    // 本地开盘时间 HH:MM
    pub open: String,
    // 本地收盘时间 HH:MM
    pub close: String,
}

/// 盘中轮询节奏 (秒)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub check_interval_secs: u64,
    pub weekend_sleep_secs: u64,
    pub max_wait_secs: u64,
    pub overnight_chunk_secs: u64,
}

/// 完整性判定阈值，属于经验参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletenessConfig {
    // 已收盘交易日至少需要达到理论数量的百分比
    pub full_day_percent: usize,
    // 盘中允许落后的 K 线根数
    pub in_progress_tolerance: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            symbols: ["AAPL", "AMZN", "META", "NVDA", "TSLA"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            interval: "5m".to_string(),
            timezone: "America/Chicago".to_string(),
            open: "08:00".to_string(),
            close: "15:30".to_string(),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            weekend_sleep_secs: 3600,
            max_wait_secs: 600,
            overnight_chunk_secs: 600,
        }
    }
}

impl Default for CompletenessConfig {
    fn default() -> Self {
        Self {
            full_day_percent: 95,
            in_progress_tolerance: 2,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://query1.finance.yahoo.com".to_string(),
            timeout_secs: 10,
        }
    }
}

/// 配置校验错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),
    #[error("Invalid time of day (expected HH:MM): {0}")]
    InvalidTime(String),
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),
    #[error("Invalid calendar: {0}")]
    Calendar(#[from] CalendarError),
    #[error("No symbols configured")]
    NoSymbols,
    #[error("Invalid completeness percent {0}, expected 1..=100")]
    InvalidPercent(usize),
    #[error("Invalid poller setting {0}: must be at least 1 second")]
    InvalidPollerInterval(&'static str),
}

impl MarketConfig {
    /// # Summary
    /// 规范化后的证券列表：去空白、转大写、去重并保持原有顺序。
    pub fn normalized_symbols(&self) -> Result<Vec<String>, ConfigError> {
        let mut symbols: Vec<String> = Vec::new();
        for raw in &self.symbols {
            let symbol = normalize_symbol(raw);
            if !symbol.is_empty() && !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }
        if symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }
        Ok(symbols)
    }

    pub fn timeframe(&self) -> Result<TimeFrame, ConfigError> {
        self.interval
            .parse()
            .map_err(|_| ConfigError::InvalidInterval(self.interval.clone()))
    }

    /// # Summary
    /// 将字符串配置解析为交易日历。
    ///
    /// # Logic
    /// 1. 解析 IANA 时区。
    /// 2. 以 `%H:%M` 解析开收盘时间。
    /// 3. 交由 `MarketCalendar::new` 校验时段与周期。
    pub fn calendar(&self) -> Result<MarketCalendar, ConfigError> {
        let tz: Tz = self
            .timezone
            .parse()
            .map_err(|_| ConfigError::InvalidTimezone(self.timezone.clone()))?;
        let open = parse_time(&self.open)?;
        let close = parse_time(&self.close)?;
        Ok(MarketCalendar::new(tz, open, close, self.timeframe()?)?)
    }
}

impl PollerConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn weekend_sleep(&self) -> Duration {
        Duration::from_secs(self.weekend_sleep_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn overnight_chunk(&self) -> Duration {
        Duration::from_secs(self.overnight_chunk_secs)
    }

    /// # Summary
    /// 校验轮询节奏，任一间隔为 0 都会让轮询器空转并持续请求行情源。
    pub fn validate(&self) -> Result<(), ConfigError> {
        let settings = [
            ("check_interval_secs", self.check_interval_secs),
            ("weekend_sleep_secs", self.weekend_sleep_secs),
            ("max_wait_secs", self.max_wait_secs),
            ("overnight_chunk_secs", self.overnight_chunk_secs),
        ];
        match settings.iter().find(|(_, secs)| *secs == 0) {
            Some((name, _)) => Err(ConfigError::InvalidPollerInterval(name)),
            None => Ok(()),
        }
    }
}

impl CompletenessConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.full_day_percent == 0 || self.full_day_percent > 100 {
            return Err(ConfigError::InvalidPercent(self.full_day_percent));
        }
        Ok(())
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn parse_time(raw: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| ConfigError::InvalidTime(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.data_dir, "data");
        assert_eq!(config.poller.check_interval(), Duration::from_secs(60));
        assert_eq!(config.completeness.full_day_percent, 95);
        assert_eq!(config.completeness.in_progress_tolerance, 2);

        let calendar = config.market.calendar().unwrap();
        assert_eq!(calendar.timezone(), chrono_tz::America::Chicago);
        assert_eq!(calendar.timeframe(), TimeFrame::Minute5);
        assert_eq!(calendar.full_day_candle_count(), 90);
    }

    #[test]
    fn test_symbols_normalized_and_deduplicated() {
        let market = MarketConfig {
            symbols: vec!["aapl".into(), " MSFT".into(), "AAPL".into(), " ".into()],
            ..MarketConfig::default()
        };
        assert_eq!(market.normalized_symbols().unwrap(), vec!["AAPL", "MSFT"]);

        let empty = MarketConfig {
            symbols: vec![],
            ..MarketConfig::default()
        };
        assert!(matches!(empty.normalized_symbols(), Err(ConfigError::NoSymbols)));
    }

    #[test]
    fn test_invalid_market_config_rejected() {
        let bad_tz = MarketConfig {
            timezone: "Mars/Olympus".into(),
            ..MarketConfig::default()
        };
        assert!(matches!(bad_tz.calendar(), Err(ConfigError::InvalidTimezone(_))));

        let bad_time = MarketConfig {
            open: "8am".into(),
            ..MarketConfig::default()
        };
        assert!(matches!(bad_time.calendar(), Err(ConfigError::InvalidTime(_))));

        let inverted = MarketConfig {
            open: "16:00".into(),
            ..MarketConfig::default()
        };
        assert!(matches!(inverted.calendar(), Err(ConfigError::Calendar(_))));

        assert!(
            CompletenessConfig {
                full_day_percent: 120,
                in_progress_tolerance: 2
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_zero_poller_interval_rejected() {
        assert!(PollerConfig::default().validate().is_ok());

        let busy = PollerConfig {
            check_interval_secs: 0,
            ..PollerConfig::default()
        };
        assert!(matches!(
            busy.validate(),
            Err(ConfigError::InvalidPollerInterval("check_interval_secs"))
        ));

        let no_chunk = PollerConfig {
            overnight_chunk_secs: 0,
            ..PollerConfig::default()
        };
        assert!(matches!(
            no_chunk.validate(),
            Err(ConfigError::InvalidPollerInterval("overnight_chunk_secs"))
        ));
    }
}
