//! # `ohlcv-api` - HTTP API 网关
//!
//! 日内 K 线缓存的只读 HTTP/REST 服务入口。
//! 使用 `axum` 构建路由与控制器，通过 `utoipa` 自动生成 OpenAPI 3.0 Swagger 文档。
//!
//! ## 架构职责
//! - 接收 HTTP 请求并规范化证券代码与日期参数
//! - 调用下层 `CandleQuery` 端口完成查询或手动回补
//! - 将领域错误映射为 HTTP 状态码与统一响应信封

pub mod error;
pub mod routes;
pub mod server;
pub mod types;
