// =============================================================================
// Rate-Limit Tracker — monitors venue API usage to avoid 429s
// =============================================================================
//
// The venue gateway enforces a request-weight budget per minute and an
// operation budget per 10 seconds. The tracker reads the usage headers the
// gateway returns with every response and keeps atomic counters that any
// thread may query lock-free.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

/// Hard ceiling at which we refuse to send additional requests.
const WEIGHT_HARD_LIMIT: u32 = 1_000;
/// Soft warning threshold.
const WEIGHT_WARN_THRESHOLD: u32 = 800;

/// Thread-safe rate-limit tracker backed by atomic counters.
pub struct RateLimitTracker {
    used_weight_1m: AtomicU32,
    op_count_10s: AtomicU32,
}

/// Immutable snapshot of the current rate-limit state (suitable for
/// serialisation into a status payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub used_weight_1m: u32,
    pub op_count_10s: u32,
}

impl RateLimitTracker {
    /// Create a new tracker with all counters at zero.
    pub fn new() -> Self {
        Self {
            used_weight_1m: AtomicU32::new(0),
            op_count_10s: AtomicU32::new(0),
        }
    }

    /// Update internal counters from the HTTP response headers returned by
    /// the venue gateway.
    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        if let Some(val) = headers.get("X-MRD-USED-WEIGHT-1M") {
            if let Ok(s) = val.to_str() {
                if let Ok(w) = s.parse::<u32>() {
                    let prev = self.used_weight_1m.swap(w, Ordering::Relaxed);
                    if w >= WEIGHT_WARN_THRESHOLD && prev < WEIGHT_WARN_THRESHOLD {
                        warn!(
                            used_weight = w,
                            hard_limit = WEIGHT_HARD_LIMIT,
                            "rate-limit weight crossed warning threshold"
                        );
                    }
                    debug!(used_weight_1m = w, "rate-limit weight updated from header");
                }
            }
        }

        if let Some(val) = headers.get("X-MRD-OP-COUNT-10S") {
            if let Ok(s) = val.to_str() {
                if let Ok(c) = s.parse::<u32>() {
                    self.op_count_10s.store(c, Ordering::Relaxed);
                }
            }
        }
    }

    /// Whether we should hold off on non-essential requests.
    pub fn should_throttle(&self) -> bool {
        self.used_weight_1m.load(Ordering::Relaxed) >= WEIGHT_HARD_LIMIT
    }

    /// Snapshot for the status API.
    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            used_weight_1m: self.used_weight_1m.load(Ordering::Relaxed),
            op_count_10s: self.op_count_10s.load(Ordering::Relaxed),
        }
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn test_updates_from_headers() {
        let tracker = RateLimitTracker::new();
        let mut headers = HeaderMap::new();
        headers.insert("X-MRD-USED-WEIGHT-1M", HeaderValue::from_static("120"));
        headers.insert("X-MRD-OP-COUNT-10S", HeaderValue::from_static("4"));

        tracker.update_from_headers(&headers);
        let snap = tracker.snapshot();
        assert_eq!(snap.used_weight_1m, 120);
        assert_eq!(snap.op_count_10s, 4);
        assert!(!tracker.should_throttle());
    }

    #[test]
    fn test_throttles_at_hard_limit() {
        let tracker = RateLimitTracker::new();
        let mut headers = HeaderMap::new();
        headers.insert("X-MRD-USED-WEIGHT-1M", HeaderValue::from_static("1000"));
        tracker.update_from_headers(&headers);
        assert!(tracker.should_throttle());
    }

    #[test]
    fn test_ignores_garbage_headers() {
        let tracker = RateLimitTracker::new();
        let mut headers = HeaderMap::new();
        headers.insert("X-MRD-USED-WEIGHT-1M", HeaderValue::from_static("wat"));
        tracker.update_from_headers(&headers);
        assert_eq!(tracker.snapshot().used_weight_1m, 0);
    }
}
