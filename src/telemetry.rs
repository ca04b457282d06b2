use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const SLOW_STORAGE_OP_THRESHOLD_MS: u128 = 500;

#[derive(Debug, Default)]
pub struct Telemetry {
    files_persisted: AtomicU64,
    files_failed: AtomicU64,
    transform_fallbacks: AtomicU64,
    slow_storage_ops: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TelemetrySnapshot {
    pub files_persisted: u64,
    pub files_failed: u64,
    pub transform_fallbacks: u64,
    pub slow_storage_ops: u64,
}

impl Telemetry {
    pub fn inc_file_persisted(&self) {
        self.files_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_transform_fallback(&self) {
        self.transform_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_storage_op(&self, op_name: &str, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis();
        if elapsed_ms < SLOW_STORAGE_OP_THRESHOLD_MS {
            return;
        }

        let total_slow = self.slow_storage_ops.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(
            op = op_name,
            elapsed_ms,
            threshold_ms = SLOW_STORAGE_OP_THRESHOLD_MS,
            total_slow,
            "Observed slow storage operation"
        );
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            files_persisted: self.files_persisted.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            transform_fallbacks: self.transform_fallbacks.load(Ordering::Relaxed),
            slow_storage_ops: self.slow_storage_ops.load(Ordering::Relaxed),
        }
    }
}
