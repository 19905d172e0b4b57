//! # `ohlcv-market` - 采集与对账
//!
//! 组合存储、行情源与会话缓存，实现完整性检查、整日回补、盘中轮询、
//! 午夜清理，以及对外的 `CandleQuery` 服务。

pub mod backfill;
pub mod completeness;
pub mod context;
pub mod poller;
pub mod service;
pub mod stats;
pub mod sweeper;

pub use context::MarketContext;
