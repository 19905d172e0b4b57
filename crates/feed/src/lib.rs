//! # `ohlcv-feed` - 外部行情源适配
//!
//! 实现 `MarketDataProvider` 端口，目前仅对接 Yahoo Finance chart 接口。

pub mod yahoo;
