//! # `ohlcv-store` - K 线持久化
//!
//! `CandleStore` 端口的 SQLite 实现。

pub mod market;
