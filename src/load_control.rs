//! Arbitration between the sample sources sharing one memory budget.
//!
//! Loads are scheduled so as to fill the available buffer space as rapidly as possible. Once
//! the duration of buffered media and the buffer utilization both exceed their thresholds, the
//! control switches to a draining state during which no loads are permitted to start; it
//! reverts to filling when either falls below its threshold again. While filling, no source is
//! allowed to load more than one segment ahead of the furthest-behind source.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::upstream::Allocator;

/// Receives notifications when the control transitions between loading and draining.
pub trait LoadControlEventListener: Send {
    /// Invoked when the control transitions from a loading to a draining state, or vice versa.
    fn on_loading_changed(&self, loading: bool);
}

/// Identifies one registered source within a [`LoadControl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceHandle(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum WatermarkLevel {
    AboveHigh,
    Between,
    BelowLow,
}

#[derive(Debug)]
struct SourceState {
    buffer_size_contribution: usize,
    buffer_state: WatermarkLevel,
    loading: bool,
    next_load_position_us: i64,
}

impl SourceState {
    fn new(buffer_size_contribution: usize) -> SourceState {
        SourceState {
            buffer_size_contribution,
            buffer_state: WatermarkLevel::AboveHigh,
            loading: false,
            next_load_position_us: -1,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    // Dense, handle-indexed; unregistered slots are tombstoned so handles stay stable and
    // iteration order is deterministic.
    sources: Vec<Option<SourceState>>,
    target_buffer_size: usize,
    max_load_start_position_us: i64,
    buffer_state: WatermarkLevel,
    filling_buffers: bool,
    last_loading_notify: bool,
}

impl Default for WatermarkLevel {
    fn default() -> WatermarkLevel {
        WatermarkLevel::AboveHigh
    }
}

/// Default duration watermarks (30 s) and buffer-load watermarks (90%).
#[derive(Debug, Clone)]
pub struct LoadControlConfig {
    pub low_watermark_ms: i64,
    pub high_watermark_ms: i64,
    pub low_buffer_load: f64,
    pub high_buffer_load: f64,
}

impl Default for LoadControlConfig {
    fn default() -> LoadControlConfig {
        LoadControlConfig {
            low_watermark_ms: 30_000,
            high_watermark_ms: 30_000,
            low_buffer_load: 0.9,
            high_buffer_load: 0.9,
        }
    }
}

/// Gates which sample source may start its next load, against a shared allocator budget.
pub struct LoadControl {
    allocator: Arc<Allocator>,
    event_listener: Option<Box<dyn LoadControlEventListener>>,
    low_watermark_us: i64,
    high_watermark_us: i64,
    low_buffer_load: f64,
    high_buffer_load: f64,
    inner: Mutex<Inner>,
}

impl LoadControl {
    pub fn new(allocator: Arc<Allocator>) -> LoadControl {
        LoadControl::with_config(allocator, None, LoadControlConfig::default())
    }

    pub fn with_config(
        allocator: Arc<Allocator>,
        event_listener: Option<Box<dyn LoadControlEventListener>>,
        config: LoadControlConfig,
    ) -> LoadControl {
        LoadControl {
            allocator,
            event_listener,
            low_watermark_us: config.low_watermark_ms * 1000,
            high_watermark_us: config.high_watermark_ms * 1000,
            low_buffer_load: config.low_buffer_load,
            high_buffer_load: config.high_buffer_load,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    /// Registers a source contributing `buffer_size_contribution` bytes to the target buffer.
    pub fn register(&self, buffer_size_contribution: usize) -> SourceHandle {
        let mut inner = self.inner.lock();
        inner.target_buffer_size += buffer_size_contribution;
        inner.sources.push(Some(SourceState::new(buffer_size_contribution)));
        SourceHandle(inner.sources.len() as u32 - 1)
    }

    pub fn unregister(&self, handle: SourceHandle) {
        let notify;
        {
            let mut inner = self.inner.lock();
            let state = inner.sources[handle.0 as usize]
                .take()
                .expect("unregister of an unregistered source");
            inner.target_buffer_size -= state.buffer_size_contribution;
            notify = self.update_control_state(&mut inner);
        }
        self.dispatch_loading_changed(notify);
    }

    /// Releases pooled allocator memory down to the current target buffer size.
    pub fn trim_allocator(&self) {
        let target = self.inner.lock().target_buffer_size;
        self.allocator.trim(target);
    }

    /// Updates one source's state and decides whether that source may start its next load.
    ///
    /// Returns true iff the shared buffer is below target, the source has somewhere to load
    /// from, and that position does not run ahead of the other filling sources.
    pub fn update(
        &self,
        handle: SourceHandle,
        playback_position_us: i64,
        next_load_position_us: i64,
        loading: bool,
    ) -> bool {
        let current_buffer_size = self.allocator.total_bytes_allocated();
        let permitted;
        let notify;
        {
            let mut inner = self.inner.lock();
            let source_buffer_state =
                self.source_watermark_level(playback_position_us, next_load_position_us);
            let state = inner.sources[handle.0 as usize]
                .as_mut()
                .expect("update of an unregistered source");
            let source_changed = state.buffer_state != source_buffer_state
                || state.next_load_position_us != next_load_position_us
                || state.loading != loading;
            if source_changed {
                state.buffer_state = source_buffer_state;
                state.next_load_position_us = next_load_position_us;
                state.loading = loading;
            }

            let buffer_state = self.buffer_watermark_level(current_buffer_size, &inner);
            let buffer_changed = inner.buffer_state != buffer_state;
            if buffer_changed {
                inner.buffer_state = buffer_state;
            }

            notify = if source_changed || buffer_changed {
                self.update_control_state(&mut inner)
            } else {
                None
            };

            trace!(
                "load control: buffer {current_buffer_size}/{} next_load {next_load_position_us} max_start {}",
                inner.target_buffer_size,
                inner.max_load_start_position_us
            );
            permitted = current_buffer_size < inner.target_buffer_size
                && next_load_position_us != -1
                && next_load_position_us <= inner.max_load_start_position_us;
        }
        self.dispatch_loading_changed(notify);
        permitted
    }

    fn source_watermark_level(
        &self,
        playback_position_us: i64,
        next_load_position_us: i64,
    ) -> WatermarkLevel {
        if next_load_position_us == -1 {
            return WatermarkLevel::AboveHigh;
        }
        let time_until_next_load = next_load_position_us - playback_position_us;
        if time_until_next_load > self.high_watermark_us {
            WatermarkLevel::AboveHigh
        } else if time_until_next_load < self.low_watermark_us {
            WatermarkLevel::BelowLow
        } else {
            WatermarkLevel::Between
        }
    }

    fn buffer_watermark_level(&self, current_buffer_size: usize, inner: &Inner) -> WatermarkLevel {
        if inner.target_buffer_size == 0 {
            return WatermarkLevel::AboveHigh;
        }
        let buffer_load = current_buffer_size as f64 / inner.target_buffer_size as f64;
        if buffer_load > self.high_buffer_load {
            WatermarkLevel::AboveHigh
        } else if buffer_load < self.low_buffer_load {
            WatermarkLevel::BelowLow
        } else {
            WatermarkLevel::Between
        }
    }

    /// Recomputes the filling state and the furthest position a load may start from. Returns a
    /// loading-changed notification to deliver outside the lock, if one is due.
    fn update_control_state(&self, inner: &mut Inner) -> Option<bool> {
        let mut loading = false;
        let mut have_next_load_position = false;
        let mut registered = false;
        let mut highest_state = inner.buffer_state;
        for state in inner.sources.iter().flatten() {
            registered = true;
            loading |= state.loading;
            have_next_load_position |= state.next_load_position_us != -1;
            highest_state = highest_state.max(state.buffer_state);
        }

        inner.filling_buffers = registered
            && (loading || have_next_load_position)
            && (highest_state == WatermarkLevel::BelowLow
                || (highest_state == WatermarkLevel::Between && inner.filling_buffers));

        let notify = if inner.filling_buffers && !inner.last_loading_notify {
            inner.last_loading_notify = true;
            Some(true)
        } else if !inner.filling_buffers && inner.last_loading_notify && !loading {
            inner.last_loading_notify = false;
            Some(false)
        } else {
            None
        };

        inner.max_load_start_position_us = -1;
        if inner.filling_buffers {
            for state in inner.sources.iter().flatten() {
                let position = state.next_load_position_us;
                if position != -1
                    && (inner.max_load_start_position_us == -1
                        || position < inner.max_load_start_position_us)
                {
                    inner.max_load_start_position_us = position;
                }
            }
        }
        notify
    }

    fn dispatch_loading_changed(&self, notify: Option<bool>) {
        if let (Some(loading), Some(listener)) = (notify, &self.event_listener) {
            trace!("load control: loading changed to {loading}");
            listener.on_loading_changed(loading);
        }
    }
}
