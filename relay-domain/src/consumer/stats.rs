use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// 处理计数（单调递增）
#[derive(Debug, Default)]
pub struct EventProcessingStats {
    processed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    dead_lettered: AtomicU64,
}

impl EventProcessingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub dead_lettered: u64,
}

impl StatsSnapshot {
    /// 失败数 / (成功数 + 失败数)，无样本时为 0
    pub fn failure_rate(&self) -> f64 {
        let total = self.processed + self.failed;
        if total == 0 {
            0.0
        } else {
            self.failed as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_rate_excludes_skipped() {
        let stats = EventProcessingStats::new();
        assert_eq!(stats.snapshot().failure_rate(), 0.0);
        stats.record_processed();
        stats.record_processed();
        stats.record_processed();
        stats.record_failed();
        stats.record_skipped();
        let snap = stats.snapshot();
        assert_eq!(snap.failure_rate(), 0.25);
        assert_eq!(snap.skipped, 1);
    }
}
