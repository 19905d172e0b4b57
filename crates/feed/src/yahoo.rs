use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use ohlcv_core::calendar::MarketCalendar;
use ohlcv_core::common::TimeFrame;
use ohlcv_core::common::time::TimeProvider;
use ohlcv_core::config::ProviderConfig;
use ohlcv_core::market::entity::{Candle, CandleSource};
use ohlcv_core::market::error::MarketError;
use ohlcv_core::market::port::MarketDataProvider;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

// 价格统一保留两位小数
const PRICE_SCALE: u32 = 2;

/// # Summary
/// Yahoo Finance 行情提供者实现。
///
/// # Invariants
/// - 使用 `reqwest` 异步客户端进行通讯，每次请求都受 `ProviderConfig::timeout` 约束。
/// - 返回的 K 线时间戳按 `MarketCalendar` 的时区换算为本地时间。
#[derive(Clone)]
pub struct YahooProvider {
    /// 内部使用的 HTTP 客户端
    client: Client,
    base_url: String,
    calendar: MarketCalendar,
    time_provider: Arc<dyn TimeProvider>,
}

impl YahooProvider {
    /// # Summary
    /// 创建一个新的 YahooProvider 实例。
    ///
    /// # Logic
    /// 1. 按配置设置请求超时。
    /// 2. 设置浏览器 User-Agent 以减少被拦截风险。
    /// 3. 初始化 reqwest 客户端。
    ///
    /// # Arguments
    /// * `config`: 行情源配置 (基础地址与超时)。
    /// * `calendar`: 交易日历，用于日期区间换算与本地时间戳。
    /// * `time_provider`: 时钟，用于填充 `fetched_at`。
    ///
    /// # Returns
    /// 成功返回 YahooProvider，客户端构建失败返回 `MarketError::Unknown`。
    pub fn new(
        config: &ProviderConfig,
        calendar: MarketCalendar,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self, MarketError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));

        let client = Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| MarketError::Unknown(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            calendar,
            time_provider,
        })
    }

    /// 发起一次 chart 请求并解析为 K 线。
    async fn fetch_chart(
        &self,
        symbol: &str,
        query: &[(&str, String)],
        source: CandleSource,
    ) -> Result<Vec<Candle>, MarketError> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);

        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(map_request_error)?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(MarketError::NotFound);
        }
        if !resp.status().is_success() {
            return Err(MarketError::Network(format!("HTTP {}", resp.status())));
        }

        let body: YahooResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                MarketError::Timeout
            } else {
                MarketError::Parse(e.to_string())
            }
        })?;

        let candles = parse_chart(
            body,
            symbol,
            &self.calendar,
            source,
            self.time_provider.now(),
        )?;
        debug!(symbol, rows = candles.len(), "Yahoo chart fetched");
        Ok(candles)
    }
}

fn map_request_error(e: reqwest::Error) -> MarketError {
    if e.is_timeout() {
        MarketError::Timeout
    } else {
        MarketError::Network(e.to_string())
    }
}

fn yahoo_interval(timeframe: TimeFrame) -> &'static str {
    match timeframe {
        TimeFrame::Minute1 => "1m",
        TimeFrame::Minute5 => "5m",
        TimeFrame::Minute15 => "15m",
        TimeFrame::Minute30 => "30m",
        TimeFrame::Hour1 => "60m",
        TimeFrame::Day1 => "1d",
    }
}

/// # Summary
/// Yahoo API 响应顶层结构。
///
/// # Invariants
/// - 映射自 Yahoo v8 chart 接口。
#[derive(Deserialize, Debug)]
struct YahooResponse {
    chart: YahooChart,
}

#[derive(Deserialize, Debug)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
    error: Option<YahooError>,
}

#[derive(Deserialize, Debug)]
struct YahooError {
    code: Option<String>,
    description: String,
}

/// Yahoo API 单个时间序列结果，空交易日可能不带 `timestamp` 字段。
#[derive(Deserialize, Debug)]
struct YahooResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: YahooIndicators,
}

#[derive(Deserialize, Debug)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct YahooQuote {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<f64>>,
}

fn to_price(raw: f64) -> Option<Decimal> {
    Decimal::from_f64(raw).map(|d| d.round_dp(PRICE_SCALE))
}

fn to_volume(raw: f64) -> Option<u64> {
    Decimal::from_f64(raw).and_then(|d| d.round().to_u64())
}

/// # Summary
/// 将 chart 响应展开为按时间升序的 K 线列表。
///
/// # Logic
/// 1. 接口层错误按错误码映射 (`Not Found` → `NotFound`)。
/// 2. 按下标对齐时间戳与五个指标数组。
/// 3. 任一字段缺失的行直接跳过 (Yahoo 对无成交时段返回 null)。
/// 4. 价格四舍五入到两位小数，成交量取整。
///
/// # Arguments
/// * `body`: 已反序列化的响应。
/// * `symbol`: 证券代码。
/// * `calendar`: 用于换算本地时间戳。
/// * `source`: 写入的来源标签。
/// * `fetched_at`: 抓取时间。
///
/// # Returns
/// 成功返回 K 线列表，结构异常返回 `MarketError::Parse`。
fn parse_chart(
    body: YahooResponse,
    symbol: &str,
    calendar: &MarketCalendar,
    source: CandleSource,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<Candle>, MarketError> {
    if let Some(err) = body.chart.error {
        return match err.code.as_deref() {
            Some("Not Found") => Err(MarketError::NotFound),
            _ => Err(MarketError::Unknown(err.description)),
        };
    }

    let Some(result) = body.chart.result.and_then(|mut r| r.pop()) else {
        return Err(MarketError::NotFound);
    };
    if result.timestamp.is_empty() {
        return Ok(Vec::new());
    }

    let quote = result
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| MarketError::Parse("No quote data".into()))?;

    let tz = calendar.timezone();
    let mut candles = Vec::with_capacity(result.timestamp.len());
    for (i, &ts) in result.timestamp.iter().enumerate() {
        let field = |v: &Vec<Option<f64>>| v.get(i).copied().flatten();
        let (Some(o), Some(h), Some(l), Some(c), Some(v)) = (
            field(&quote.open).and_then(to_price),
            field(&quote.high).and_then(to_price),
            field(&quote.low).and_then(to_price),
            field(&quote.close).and_then(to_price),
            field(&quote.volume).and_then(to_volume),
        ) else {
            continue;
        };
        let Some(timestamp_utc) = DateTime::from_timestamp(ts, 0) else {
            return Err(MarketError::Parse(format!("Timestamp out of range: {}", ts)));
        };

        candles.push(Candle {
            symbol: symbol.to_string(),
            interval: calendar.timeframe(),
            timestamp_utc,
            timestamp_local: timestamp_utc.with_timezone(&tz).fixed_offset(),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: v,
            source,
            stale: false,
            fetched_at,
        });
    }
    candles.sort_by_key(|c| c.timestamp_utc);
    Ok(candles)
}

#[async_trait]
impl MarketDataProvider for YahooProvider {
    /// # Summary
    /// 获取当日日内序列的最后一根完整 K 线。
    ///
    /// # Logic
    /// 1. 以 `range=1d` 请求当日序列。
    /// 2. 取解析后的最后一行。
    async fn fetch_latest(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
    ) -> Result<Option<Candle>, MarketError> {
        let query = [
            ("range", "1d".to_string()),
            ("interval", yahoo_interval(timeframe).to_string()),
        ];
        let mut candles = self.fetch_chart(symbol, &query, CandleSource::Live).await?;
        Ok(candles.pop())
    }

    /// # Summary
    /// 获取 [start, end) 本地日期区间的全部 K 线。
    ///
    /// # Logic
    /// 1. 将本地日期边界换算为 UTC 秒作为 `period1` / `period2`。
    /// 2. 请求并解析，来源标记为 `Backfill`。
    async fn fetch_range(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Candle>, MarketError> {
        let (period1, _) = self.calendar.day_bounds_utc(start);
        let (period2, _) = self.calendar.day_bounds_utc(end);
        let query = [
            ("period1", period1.timestamp().to_string()),
            ("period2", period2.timestamp().to_string()),
            ("interval", yahoo_interval(timeframe).to_string()),
        ];
        self.fetch_chart(symbol, &query, CandleSource::Backfill).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use ohlcv_core::common::time::RealTimeProvider;
    use rust_decimal_macros::dec;

    fn calendar() -> MarketCalendar {
        MarketCalendar::new(
            chrono_tz::America::Chicago,
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
            TimeFrame::Minute5,
        )
        .unwrap()
    }

    fn fetched_at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T15:10:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_parse_chart_skips_null_rows_and_rounds() {
        // 2026-03-02T14:00:00Z = 08:00 CST，第二行为 null
        let body: YahooResponse = serde_json::from_str(
            r#"{"chart":{"result":[{
                "timestamp":[1772460000,1772460300,1772460600],
                "indicators":{"quote":[{
                    "open":[150.123,null,151.0],
                    "high":[151.456,null,152.0],
                    "low":[149.994,null,150.5],
                    "close":[150.5,null,151.75],
                    "volume":[120000.0,null,98000.0]
                }]}
            }],"error":null}}"#,
        )
        .unwrap();

        let candles =
            parse_chart(body, "AAPL", &calendar(), CandleSource::Backfill, fetched_at()).unwrap();

        assert_eq!(candles.len(), 2);
        let first = &candles[0];
        assert_eq!(first.open, dec!(150.12));
        assert_eq!(first.high, dec!(151.46));
        assert_eq!(first.low, dec!(149.99));
        assert_eq!(first.volume, 120_000);
        assert_eq!(first.source, CandleSource::Backfill);
        assert_eq!(first.timestamp_local.to_rfc3339(), "2026-03-02T08:00:00-06:00");
        assert_eq!(
            candles[1].timestamp_utc - first.timestamp_utc,
            chrono::Duration::minutes(10)
        );
    }

    #[test]
    fn test_parse_chart_empty_day_and_errors() {
        let empty: YahooResponse = serde_json::from_str(
            r#"{"chart":{"result":[{"indicators":{"quote":[{}]}}],"error":null}}"#,
        )
        .unwrap();
        let candles =
            parse_chart(empty, "AAPL", &calendar(), CandleSource::Live, fetched_at()).unwrap();
        assert!(candles.is_empty());

        let not_found: YahooResponse = serde_json::from_str(
            r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#,
        )
        .unwrap();
        assert!(matches!(
            parse_chart(not_found, "ZZZZ", &calendar(), CandleSource::Live, fetched_at()),
            Err(MarketError::NotFound)
        ));
    }

    #[test]
    fn test_interval_mapping() {
        assert_eq!(yahoo_interval(TimeFrame::Minute5), "5m");
        assert_eq!(yahoo_interval(TimeFrame::Hour1), "60m");
    }

    /// 真实网络请求，默认忽略。
    #[tokio::test]
    #[ignore]
    async fn test_yahoo_real_fetch_latest() {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            // 其他测试已安装
        }
        let provider = YahooProvider::new(
            &ProviderConfig::default(),
            calendar(),
            Arc::new(RealTimeProvider),
        )
        .unwrap();

        let latest = provider.fetch_latest("AAPL", TimeFrame::Minute5).await;
        assert!(latest.is_ok(), "Failed to fetch from Yahoo: {:?}", latest.err());
    }
}
