use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use ohlcv_api::server::{AppState, build_router};
use ohlcv_core::calendar::MarketCalendar;
use ohlcv_core::common::TimeFrame;
use ohlcv_core::common::time::FakeClockProvider;
use ohlcv_core::config::CompletenessConfig;
use ohlcv_core::testing::{MemCandleStore, ScriptedProvider, session_candles};
use ohlcv_core::store::port::CandleStore;
use ohlcv_market::MarketContext;
use ohlcv_market::service::MarketService;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

fn calendar() -> MarketCalendar {
    MarketCalendar::new(
        chrono_tz::America::Chicago,
        NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        TimeFrame::Minute5,
    )
    .unwrap()
}

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

// 周一 10:00 本地
fn now() -> DateTime<Utc> {
    chrono_tz::America::Chicago
        .from_local_datetime(&monday().and_hms_opt(10, 0, 0).unwrap())
        .unwrap()
        .with_timezone(&Utc)
}

struct TestApp {
    router: axum::Router,
    provider: Arc<ScriptedProvider>,
}

/// 以内存存储与脚本化行情源组装完整的查询服务与路由
async fn test_app() -> TestApp {
    let cal = calendar();
    let store = Arc::new(MemCandleStore::new());
    store
        .upsert_many(&session_candles(&cal, "AAPL", monday(), 24))
        .await
        .unwrap();
    let provider = Arc::new(ScriptedProvider::new());
    let ctx = MarketContext::new(
        cal,
        Arc::new(FakeClockProvider::new(now())),
        store,
        provider.clone(),
    );
    let service = MarketService::new(
        ctx,
        vec!["AAPL".to_string(), "NVDA".to_string()],
        &CompletenessConfig::default(),
    );
    service.bootstrap().await;

    TestApp {
        router: build_router(AppState {
            query: Arc::new(service),
        }),
        provider,
    }
}

async fn send(router: &axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health_and_market_status() {
    let app = test_app().await;

    let (status, body) = send(&app.router, "GET", "/api/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["interval"], "5m");
    assert_eq!(body["data"]["symbols"][0], "AAPL");

    let (status, body) = send(&app.router, "GET", "/api/v1/market/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "open");
}

#[tokio::test]
async fn test_sessions_endpoints() {
    let app = test_app().await;

    // NVDA 尚无任何数据，不出现在列表中
    let (status, body) = send(&app.router, "GET", "/api/v1/prices").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["symbol"], "AAPL");

    let (status, body) = send(&app.router, "GET", "/api/v1/prices/aapl").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["symbol"], "AAPL");
    assert_eq!(body["data"]["current_day"]["date"], "2026-03-02");
    assert_eq!(
        body["data"]["current_day"]["candles"].as_array().unwrap().len(),
        24
    );
    assert_eq!(body["data"]["previous_day"]["date"], "2026-02-27");

    let (status, body) = send(&app.router, "GET", "/api/v1/prices/MSFT").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_get_day_endpoint() {
    let app = test_app().await;

    let (status, body) = send(&app.router, "GET", "/api/v1/prices/AAPL/days/2026-03-02").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["candle_count"], 24);
    assert_eq!(body["data"]["stale"], false);
    assert_eq!(body["data"]["candles"][0]["source"], "live");

    let (status, _) = send(&app.router, "GET", "/api/v1/prices/AAPL/days/03-02-2026").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app.router, "GET", "/api/v1/prices/AAPL/days/2026-03-09").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_trigger_backfill_endpoint() {
    let app = test_app().await;
    let cal = calendar();
    app.provider
        .push_range(session_candles(&cal, "NVDA", monday(), 24));

    let (status, body) = send(&app.router, "GET", "/api/v1/prices/NVDA").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    let (status, _) = send(&app.router, "GET", "/api/v1/prices/NVDA/days/2026-03-02").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app.router,
        "POST",
        "/api/v1/prices/nvda/backfill?date=2026-03-02",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["symbol"], "NVDA");
    assert_eq!(body["data"]["candles_added"], 24);

    let (status, body) = send(&app.router, "GET", "/api/v1/prices/NVDA").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"]["current_day"]["candles"].as_array().unwrap().len(),
        24
    );

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/v1/prices/ZZZZ/backfill?date=2026-03-02",
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
