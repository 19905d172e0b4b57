use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use utoipa::ToSchema;

pub mod time;

/// # Summary
/// K 线时间周期枚举，定义单根 K 线覆盖的时间跨度。
///
/// # Invariants
/// - 序列化形式与行情源的 interval 参数一致 (例如 `5m`)。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
pub enum TimeFrame {
    // 1分钟
    #[serde(rename = "1m")]
    Minute1,
    // 5分钟
    #[serde(rename = "5m")]
    Minute5,
    // 15分钟
    #[serde(rename = "15m")]
    Minute15,
    // 30分钟
    #[serde(rename = "30m")]
    Minute30,
    // 1小时
    #[serde(rename = "1h")]
    Hour1,
    // 1日
    #[serde(rename = "1d")]
    Day1,
}

impl TimeFrame {
    /// 周期对应的分钟数。
    pub fn minutes(self) -> i64 {
        match self {
            TimeFrame::Minute1 => 1,
            TimeFrame::Minute5 => 5,
            TimeFrame::Minute15 => 15,
            TimeFrame::Minute30 => 30,
            TimeFrame::Hour1 => 60,
            TimeFrame::Day1 => 1440,
        }
    }

    /// 周期对应的标准库时长。
    pub fn duration(self) -> Duration {
        Duration::from_secs(self.minutes().unsigned_abs() * 60)
    }

    /// 是否为日内周期 (日线不参与盘中轮询)。
    pub fn is_intraday(self) -> bool {
        !matches!(self, TimeFrame::Day1)
    }
}

impl FromStr for TimeFrame {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1m" | "minute1" => Ok(TimeFrame::Minute1),
            "5m" | "minute5" => Ok(TimeFrame::Minute5),
            "15m" | "minute15" => Ok(TimeFrame::Minute15),
            "30m" | "minute30" => Ok(TimeFrame::Minute30),
            "1h" | "60m" | "hour1" => Ok(TimeFrame::Hour1),
            "1d" | "day1" => Ok(TimeFrame::Day1),
            _ => Err(format!("Unknown TimeFrame: {}", s)),
        }
    }
}

impl std::fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeFrame::Minute1 => write!(f, "1m"),
            TimeFrame::Minute5 => write!(f, "5m"),
            TimeFrame::Minute15 => write!(f, "15m"),
            TimeFrame::Minute30 => write!(f, "30m"),
            TimeFrame::Hour1 => write!(f, "1h"),
            TimeFrame::Day1 => write!(f, "1d"),
        }
    }
}

/// 规范化证券代码：去除空白并转为大写。
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}
