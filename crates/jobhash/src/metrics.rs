use std::sync::atomic::{AtomicI64, Ordering};

/// Lock-free accumulator of request count and running mean latency.
///
/// The mean uses the numerically stable online recurrence
/// `M_k = M_{k-1} + (x_k - M_{k-1}) / k` (Knuth, The Art of Computer
/// Programming Vol. 2, p. 232) over nanosecond samples, in signed integer
/// arithmetic with truncating division. Signed fields avoid extra casting
/// when the delta underflows zero.
///
/// Each update is three independent atomic operations rather than one
/// linearizable transaction; a mutex here quickly becomes a bottleneck, and
/// the transient error of interleaved updates is acceptable for a
/// monitoring counter. Callers must not rely on exact mean equality across
/// concurrent updates.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    requests: AtomicI64,
    mean_ns: AtomicI64,
}

/// Point-in-time view of [`RequestMetrics`], truncated to milliseconds.
/// This is the body of `GET /stats`.
#[derive(Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Snapshot {
    pub total: u64,
    pub average: u64,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one request latency, in nanoseconds, into the running mean.
    pub fn record(&self, sample_ns: i64) {
        let d = sample_ns - self.mean_ns.load(Ordering::Relaxed);
        let count = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        self.mean_ns.fetch_add(d / count, Ordering::Relaxed);
    }

    /// Load a millisecond snapshot. The two loads are independent, so a
    /// snapshot taken during concurrent updates may pair a count with a
    /// slightly stale mean.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            total: self.requests.load(Ordering::Relaxed) as u64,
            average: (self.mean_ns.load(Ordering::Relaxed) / 1_000_000) as u64,
        }
    }
}
