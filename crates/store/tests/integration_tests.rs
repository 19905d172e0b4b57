use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use ohlcv_core::calendar::MarketCalendar;
use ohlcv_core::common::TimeFrame;
use ohlcv_core::market::entity::CandleSource;
use ohlcv_core::store::port::CandleStore;
use ohlcv_core::testing::{candle_at, session_candles};
use ohlcv_store::market::SqliteCandleStore;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tempfile::tempdir;

fn calendar() -> MarketCalendar {
    MarketCalendar::new(
        chrono_tz::America::Chicago,
        NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        TimeFrame::Minute5,
    )
    .unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn test_upsert_is_idempotent_and_last_write_wins() {
    let tmp_dir = tempdir().expect("Failed to create temp dir");
    let store = SqliteCandleStore::new(tmp_dir.path()).expect("Failed to create store");
    let cal = calendar();
    let monday = date(2026, 3, 2);
    let at = cal.open_at(monday) + Duration::hours(1);

    let first = candle_at(&cal, "AAPL", at, dec!(150.25), 1_000);
    assert!(store.upsert(&first).await.unwrap());
    assert!(store.upsert(&first).await.unwrap());

    let loaded = store.load_day("AAPL", monday).await.unwrap();
    assert_eq!(loaded, vec![first.clone()]);

    // 同一时段的新值覆盖旧值
    let mut revised = candle_at(&cal, "AAPL", at, dec!(151.10), 2_500);
    revised.source = CandleSource::Backfill;
    store.upsert(&revised).await.unwrap();

    let loaded = store.load_day("AAPL", monday).await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].close, dec!(151.10));
    assert_eq!(loaded[0].volume, 2_500);
    assert_eq!(loaded[0].source, CandleSource::Backfill);

    // 数据库文件按证券隔离
    assert!(tmp_dir.path().join("market").join("AAPL.db").exists());
}

#[tokio::test]
async fn test_placeholder_rows_never_persisted() {
    let tmp_dir = tempdir().unwrap();
    let store = SqliteCandleStore::new(tmp_dir.path()).unwrap();
    let cal = calendar();
    let monday = date(2026, 3, 2);
    let open = cal.open_at(monday);

    let mut placeholder = candle_at(&cal, "AAPL", open, dec!(10.0), 0);
    placeholder.open = dec!(10.0);
    placeholder.high = dec!(10.0);
    placeholder.low = dec!(10.0);
    assert!(!store.upsert(&placeholder).await.unwrap());

    let real = candle_at(&cal, "AAPL", open + Duration::minutes(5), dec!(11.0), 300);
    let written = store
        .upsert_many(&[placeholder.clone(), real.clone()])
        .await
        .unwrap();
    assert_eq!(written, 1);

    let loaded = store.load_day("AAPL", monday).await.unwrap();
    assert_eq!(loaded, vec![real]);
}

#[tokio::test]
async fn test_load_day_uses_market_local_partition_and_orders_ascending() {
    let tmp_dir = tempdir().unwrap();
    let store = SqliteCandleStore::new(tmp_dir.path()).unwrap();
    let cal = calendar();
    let monday = date(2026, 3, 2);

    // 周一本地 23:30 = 周二 05:30 UTC，仍属于周一分区
    let late = Utc.with_ymd_and_hms(2026, 3, 3, 5, 30, 0).unwrap();
    let morning = cal.open_at(monday);
    let noon = morning + Duration::hours(4);
    let tuesday = cal.open_at(date(2026, 3, 3));

    let batch = vec![
        candle_at(&cal, "MSFT", late, dec!(3), 1),
        candle_at(&cal, "MSFT", noon, dec!(2), 1),
        candle_at(&cal, "MSFT", tuesday, dec!(4), 1),
        candle_at(&cal, "MSFT", morning, dec!(1), 1),
    ];
    assert_eq!(store.upsert_many(&batch).await.unwrap(), 4);

    let loaded = store.load_day("MSFT", monday).await.unwrap();
    let times: Vec<_> = loaded.iter().map(|c| c.timestamp_utc).collect();
    assert_eq!(times, vec![morning, noon, late]);
    assert!(loaded.iter().all(|c| c.session_date() == monday));

    assert_eq!(store.load_day("MSFT", date(2026, 3, 3)).await.unwrap().len(), 1);
    assert!(store.load_day("MSFT", date(2026, 3, 4)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_before_prunes_every_symbol() {
    let tmp_dir = tempdir().unwrap();
    let store = SqliteCandleStore::new(tmp_dir.path()).unwrap();
    let cal = calendar();
    let thursday = date(2026, 2, 26);
    let friday = date(2026, 2, 27);
    let monday = date(2026, 3, 2);

    for symbol in ["AAPL", "TSLA"] {
        for day in [thursday, friday, monday] {
            store
                .upsert_many(&session_candles(&cal, symbol, day, 3))
                .await
                .unwrap();
        }
    }

    // 周一的上一交易日是周五，截止点为周五本地零点
    let cutoff = cal.day_bounds_utc(cal.previous_trading_day(monday)).0;
    let removed = store.delete_before(cutoff).await.unwrap();
    assert_eq!(removed, 6);

    for symbol in ["AAPL", "TSLA"] {
        assert!(store.load_day(symbol, thursday).await.unwrap().is_empty());
        assert_eq!(store.load_day(symbol, friday).await.unwrap().len(), 3);
        assert_eq!(store.load_day(symbol, monday).await.unwrap().len(), 3);
    }

    // 再次清理没有可删的行
    assert_eq!(store.delete_before(cutoff).await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_upserts_to_same_key_leave_one_row() {
    let tmp_dir = tempdir().unwrap();
    let store = Arc::new(SqliteCandleStore::new(tmp_dir.path()).unwrap());
    let cal = calendar();
    let monday = date(2026, 3, 2);
    let at = cal.open_at(monday);

    let mut handles = vec![];
    for i in 0..20u32 {
        let store = store.clone();
        let candle = candle_at(&cal, "NVDA", at, dec!(100) + rust_decimal::Decimal::from(i), 10);
        handles.push(tokio::spawn(async move { store.upsert(&candle).await }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let loaded = store.load_day("NVDA", monday).await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert!(loaded[0].close >= dec!(100) && loaded[0].close < dec!(120));
}

#[tokio::test]
async fn test_data_survives_reopen_and_symbols_listed() {
    let tmp_dir = tempdir().unwrap();
    let cal = calendar();
    let monday = date(2026, 3, 2);
    {
        let store = SqliteCandleStore::new(tmp_dir.path()).unwrap();
        store
            .upsert_many(&session_candles(&cal, "AMZN", monday, 5))
            .await
            .unwrap();
        store
            .upsert_many(&session_candles(&cal, "META", monday, 2))
            .await
            .unwrap();
    }

    let reopened = SqliteCandleStore::new(tmp_dir.path()).unwrap();
    let loaded = reopened.load_day("AMZN", monday).await.unwrap();
    assert_eq!(loaded.len(), 5);
    assert_eq!(loaded[0].open, dec!(99));
    assert_eq!(reopened.symbols().await.unwrap(), vec!["AMZN", "META"]);
}
