//! # `ohlcv-core` - 领域核心
//!
//! 只包含实体、错误、端口 (Trait) 与纯函数 (交易日历)，不依赖任何 IO 实现。
//! 存储、行情源、会话缓存等具体实现由下游 crate 通过端口注入。

pub mod calendar;
pub mod common;
pub mod config;
pub mod market;
pub mod store;

#[cfg(feature = "test-utils")]
pub mod testing;
