//! # K 线路由控制器
//!
//! 实现 `/api/v1/prices` 路径下的会话投影、单日查询与手动回补接口。

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::NaiveDate;
use ohlcv_core::market::entity::{BackfillResult, DayView, SessionView};

use crate::error::ApiError;
use crate::server::AppState;
use crate::types::{ApiResponse, BackfillQuery};

fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("Invalid date (expected YYYY-MM-DD): {}", raw)))
}

/// 获取全部跟踪证券的会话投影
#[utoipa::path(
    get,
    path = "/api/v1/prices",
    tag = "K 线 (Prices)",
    responses(
        (status = 200, description = "全部证券的当前交易日与上一交易日", body = ApiResponse<Vec<SessionView>>)
    )
)]
pub async fn list_sessions(State(state): State<AppState>) -> Json<ApiResponse<Vec<SessionView>>> {
    Json(ApiResponse::ok(state.query.get_all_sessions().await))
}

/// 获取单个证券的会话投影
#[utoipa::path(
    get,
    path = "/api/v1/prices/{symbol}",
    tag = "K 线 (Prices)",
    params(
        ("symbol" = String, Path, description = "证券代码 (不区分大小写)")
    ),
    responses(
        (status = 200, description = "当前交易日与上一交易日", body = ApiResponse<SessionView>),
        (status = 404, description = "证券未被跟踪或没有任何数据")
    )
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<SessionView>>, ApiError> {
    let view = state.query.get_session(&symbol).await?;
    Ok(Json(ApiResponse::ok(view)))
}

/// 获取某证券某交易日的全部 K 线
///
/// 数据不足完整性阈值或由内存兜底时 `stale` 为 true，不视为错误。
#[utoipa::path(
    get,
    path = "/api/v1/prices/{symbol}/days/{date}",
    tag = "K 线 (Prices)",
    params(
        ("symbol" = String, Path, description = "证券代码"),
        ("date" = String, Path, description = "市场本地日期 (YYYY-MM-DD)")
    ),
    responses(
        (status = 200, description = "当日 K 线", body = ApiResponse<DayView>),
        (status = 400, description = "日期格式错误或为未来日期"),
        (status = 404, description = "证券未被跟踪或没有任何数据")
    )
)]
pub async fn get_day(
    State(state): State<AppState>,
    Path((symbol, date)): Path<(String, String)>,
) -> Result<Json<ApiResponse<DayView>>, ApiError> {
    let date = parse_date(&date)?;
    let view = state.query.get_day(&symbol, date).await?;
    Ok(Json(ApiResponse::ok(view)))
}

/// 手动触发整日回补
///
/// 同步执行，返回写入的 K 线数量。
#[utoipa::path(
    post,
    path = "/api/v1/prices/{symbol}/backfill",
    tag = "K 线 (Prices)",
    params(
        ("symbol" = String, Path, description = "证券代码"),
        BackfillQuery
    ),
    responses(
        (status = 200, description = "回补完成", body = ApiResponse<BackfillResult>),
        (status = 400, description = "日期格式错误或为未来日期"),
        (status = 404, description = "证券未被跟踪")
    )
)]
pub async fn trigger_backfill(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<BackfillQuery>,
) -> Result<Json<ApiResponse<BackfillResult>>, ApiError> {
    let date = parse_date(&query.date)?;
    tracing::info!(symbol = %symbol, %date, "Manual backfill requested");
    let result = state.query.trigger_backfill(&symbol, date).await?;
    Ok(Json(ApiResponse::ok(result)))
}
