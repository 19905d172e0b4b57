use crate::store::error::StoreError;
use thiserror::Error;

/// # Summary
/// 行情源错误枚举，处理网络、超时、解析及数据缺失等问题。
///
/// # Invariants
/// - 所有变体对调用方而言都是暂时性的，下一个调度周期重试即可。
#[derive(Error, Debug)]
pub enum MarketError {
    // 网络层错误，包含非 2xx 响应
    #[error("Network error: {0}")]
    Network(String),
    // 请求超时
    #[error("Request timed out")]
    Timeout,
    // 数据解析错误，如 JSON 格式不匹配
    #[error("Parse error: {0}")]
    Parse(String),
    // 请求的数据未找到 (404 或内容为空)
    #[error("Data not found")]
    NotFound,
    // 未知或未分类的错误
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// # Summary
/// 读服务 (`CandleQuery`) 的错误枚举。
#[derive(Error, Debug)]
pub enum QueryError {
    // 未跟踪的证券，或存储与投影中都没有任何数据
    #[error("No data for symbol {0}")]
    UnknownSymbol(String),
    // 请求参数非法，例如日期格式错误
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Market error: {0}")]
    Market(#[from] MarketError),
}
