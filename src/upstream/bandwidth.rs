//! Bandwidth estimation, consumed by the adaptive format evaluator.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

/// Indicates no bandwidth estimate is available.
pub const NO_ESTIMATE: i64 = -1;

/// Provides estimates of the currently available bandwidth.
pub trait BandwidthMeter: Send + Sync {
    /// The estimated bandwidth in bits/sec, or [`NO_ESTIMATE`] if none is available yet.
    fn bitrate_estimate(&self) -> i64;
}

/// A [`BandwidthMeter`] fed by transfer samples, estimating over a sliding window of recently
/// transferred bytes so that a stale measurement from minutes ago cannot dominate the estimate.
#[derive(Debug)]
pub struct DefaultBandwidthMeter {
    inner: Mutex<Inner>,
    max_window_bytes: i64,
}

#[derive(Debug, Default)]
struct Inner {
    samples: VecDeque<(i64, Duration)>,
    window_bytes: i64,
    window_elapsed: Duration,
}

impl DefaultBandwidthMeter {
    const DEFAULT_WINDOW_BYTES: i64 = 8 * 1024 * 1024;

    pub fn new() -> DefaultBandwidthMeter {
        DefaultBandwidthMeter {
            inner: Mutex::new(Inner::default()),
            max_window_bytes: Self::DEFAULT_WINDOW_BYTES,
        }
    }

    /// Records that `bytes` were transferred over `elapsed` of wall-clock time.
    pub fn on_transfer(&self, bytes: i64, elapsed: Duration) {
        if bytes <= 0 || elapsed.is_zero() {
            return;
        }
        let mut inner = self.inner.lock();
        inner.samples.push_back((bytes, elapsed));
        inner.window_bytes += bytes;
        inner.window_elapsed += elapsed;
        while inner.window_bytes > self.max_window_bytes && inner.samples.len() > 1 {
            let (old_bytes, old_elapsed) = inner.samples.pop_front().unwrap();
            inner.window_bytes -= old_bytes;
            inner.window_elapsed -= old_elapsed;
        }
    }
}

impl Default for DefaultBandwidthMeter {
    fn default() -> DefaultBandwidthMeter {
        DefaultBandwidthMeter::new()
    }
}

impl BandwidthMeter for DefaultBandwidthMeter {
    fn bitrate_estimate(&self) -> i64 {
        let inner = self.inner.lock();
        if inner.samples.is_empty() || inner.window_elapsed.is_zero() {
            return NO_ESTIMATE;
        }
        let bits = inner.window_bytes as f64 * 8.0;
        (bits / inner.window_elapsed.as_secs_f64()).round() as i64
    }
}
