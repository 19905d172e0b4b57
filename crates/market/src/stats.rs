use ohlcv_core::market::entity::IngestStatsSnapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// # Summary
/// 入库链路的原子计数器。
///
/// # Invariants
/// - 只增不减，进程重启后归零。
/// - 数据质量问题 (占位行、越界行、重复) 只计数，不向调用方报错。
#[derive(Debug, Default)]
pub struct IngestStats {
    placeholders_dropped: AtomicU64,
    out_of_day_dropped: AtomicU64,
    duplicates_ignored: AtomicU64,
    provider_failures: AtomicU64,
    store_failures: AtomicU64,
    candles_written: AtomicU64,
}

fn add(counter: &AtomicU64, n: usize) {
    counter.fetch_add(u64::try_from(n).unwrap_or(u64::MAX), Ordering::Relaxed);
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_placeholders(&self, n: usize) {
        add(&self.placeholders_dropped, n);
    }

    pub fn record_out_of_day(&self, n: usize) {
        add(&self.out_of_day_dropped, n);
    }

    pub fn record_duplicate(&self) {
        add(&self.duplicates_ignored, 1);
    }

    pub fn record_provider_failure(&self) {
        add(&self.provider_failures, 1);
    }

    pub fn record_store_failure(&self) {
        add(&self.store_failures, 1);
    }

    pub fn record_written(&self, n: usize) {
        add(&self.candles_written, n);
    }

    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            placeholders_dropped: self.placeholders_dropped.load(Ordering::Relaxed),
            out_of_day_dropped: self.out_of_day_dropped.load(Ordering::Relaxed),
            duplicates_ignored: self.duplicates_ignored.load(Ordering::Relaxed),
            provider_failures: self.provider_failures.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            candles_written: self.candles_written.load(Ordering::Relaxed),
        }
    }

    /// 输出一行累计统计。
    pub fn log_summary(&self, operation: &str) {
        let s = self.snapshot();
        info!(
            operation,
            written = s.candles_written,
            placeholders = s.placeholders_dropped,
            out_of_day = s.out_of_day_dropped,
            duplicates = s.duplicates_ignored,
            provider_failures = s.provider_failures,
            store_failures = s.store_failures,
            "Ingest stats"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = IngestStats::new();
        stats.record_placeholders(2);
        stats.record_out_of_day(3);
        stats.record_duplicate();
        stats.record_written(10);
        stats.record_written(5);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.placeholders_dropped, 2);
        assert_eq!(snapshot.out_of_day_dropped, 3);
        assert_eq!(snapshot.duplicates_ignored, 1);
        assert_eq!(snapshot.candles_written, 15);
        assert_eq!(snapshot.provider_failures, 0);
    }
}
