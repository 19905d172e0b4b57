//! # 市场状态路由控制器
//!
//! 服务健康检查与市场开闭状态，均为纯内存读取。

use axum::Json;
use axum::extract::State;
use ohlcv_core::market::entity::{HealthView, MarketStatusView};

use crate::server::AppState;
use crate::types::ApiResponse;

/// 服务健康检查
///
/// 返回跟踪的证券、K 线周期、当前市场状态与入库统计。
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "市场 (Market)",
    responses(
        (status = 200, description = "服务健康状况", body = ApiResponse<HealthView>)
    )
)]
pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthView>> {
    Json(ApiResponse::ok(state.query.health()))
}

/// 获取市场状态
#[utoipa::path(
    get,
    path = "/api/v1/market/status",
    tag = "市场 (Market)",
    responses(
        (status = 200, description = "open / closed 及细分阶段", body = ApiResponse<MarketStatusView>)
    )
)]
pub async fn market_status(State(state): State<AppState>) -> Json<ApiResponse<MarketStatusView>> {
    Json(ApiResponse::ok(state.query.market_status()))
}
