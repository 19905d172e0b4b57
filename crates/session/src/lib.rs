//! # `ohlcv-session` - 内存会话投影
//!
//! 每个证券保留"当前交易日 + 上一交易日"两个有序桶，作为存储之上的低延迟读缓存。
//! 投影可随时由存储整体重建，不是数据的权威来源。

pub mod mem;
pub mod projection;

pub use mem::SessionCache;
pub use projection::{AppendOutcome, SessionProjection};
