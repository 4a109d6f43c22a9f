//! Buffers extracted samples in a queue, and allows for consumption from that queue.

use std::sync::Arc;

use parking_lot::Mutex;

use super::rolling_buffer::RollingSampleBuffer;
use super::sample_holder::SampleHolder;
use super::SampleCrypto;
use crate::format::MediaFormat;
use crate::upstream::{Allocator, DataSource};
use crate::DashPlayerError;

const INVALID_TIMESTAMP: i64 = i64::MIN;

#[derive(Debug)]
struct ConsumerState {
    need_key_frame: bool,
    last_read_time_us: i64,
    splice_out_time_us: i64,
}

impl Default for ConsumerState {
    fn default() -> ConsumerState {
        ConsumerState {
            need_key_frame: true,
            last_read_time_us: INVALID_TIMESTAMP,
            splice_out_time_us: INVALID_TIMESTAMP,
        }
    }
}

/// The producer/consumer sample queue of one track.
///
/// Loader threads write sample data and metadata through the producer methods; the control
/// thread consumes through the read methods. The first sample handed out after a clear or a
/// discard is always a keyframe: non-keyframe samples that precede one are silently skipped.
#[derive(Debug)]
pub struct DefaultTrackOutput {
    buffer: RollingSampleBuffer,
    consumer: Mutex<ConsumerState>,
    /// Largest timestamp committed by the producer, or [`INVALID_TIMESTAMP`]. Guarded by the
    /// same mutex as the consumer state for simplicity; contention is negligible.
    largest_parsed_timestamp_us: Mutex<i64>,
    format: Mutex<Option<MediaFormat>>,
}

impl DefaultTrackOutput {
    pub fn new(allocator: Arc<Allocator>) -> DefaultTrackOutput {
        DefaultTrackOutput {
            buffer: RollingSampleBuffer::new(allocator),
            consumer: Mutex::new(ConsumerState::default()),
            largest_parsed_timestamp_us: Mutex::new(INVALID_TIMESTAMP),
            format: Mutex::new(None),
        }
    }

    // Called by the consuming thread, but only when there is no loading thread.

    /// Clears the queue, returning all allocations to the allocator.
    pub fn clear(&self) {
        self.buffer.clear();
        *self.consumer.lock() = ConsumerState::default();
        *self.largest_parsed_timestamp_us.lock() = INVALID_TIMESTAMP;
    }

    pub fn write_index(&self) -> i32 {
        self.buffer.write_index()
    }

    /// Discards samples from the write side of the queue, and recomputes the largest parsed
    /// timestamp from the samples that survive so a discarded maximum cannot linger.
    pub fn discard_upstream_samples(&self, discard_from_index: i32) {
        self.buffer.discard_upstream_samples(discard_from_index);
        *self.largest_parsed_timestamp_us.lock() =
            self.buffer.largest_queued_timestamp_us().unwrap_or(INVALID_TIMESTAMP);
    }

    // Called by the consuming thread.

    pub fn read_index(&self) -> i32 {
        self.buffer.read_index()
    }

    pub fn has_format(&self) -> bool {
        self.format.lock().is_some()
    }

    /// The format most recently received by the output, or `None` if a format has yet to be
    /// received.
    pub fn format(&self) -> Option<MediaFormat> {
        self.format.lock().clone()
    }

    /// The largest timestamp of any sample received by the output, or `None` if a sample has
    /// yet to be received.
    pub fn largest_parsed_timestamp_us(&self) -> Option<i64> {
        match *self.largest_parsed_timestamp_us.lock() {
            INVALID_TIMESTAMP => None,
            t => Some(t),
        }
    }

    /// True when no eligible sample can currently be read.
    pub fn is_empty(&self) -> bool {
        let mut consumer = self.consumer.lock();
        !self.advance_to_eligible_sample(&mut consumer)
    }

    /// Removes the next eligible sample from the head of the queue, writing it into the
    /// provided holder. The first sample returned after a reset is guaranteed to be a keyframe.
    pub fn sample(&self, holder: &mut SampleHolder) -> bool {
        let mut consumer = self.consumer.lock();
        if !self.advance_to_eligible_sample(&mut consumer) {
            return false;
        }
        if self.buffer.read_sample(holder) {
            consumer.need_key_frame = false;
            consumer.last_read_time_us = holder.time_us;
            true
        } else {
            false
        }
    }

    /// Discards samples from the queue up to the specified time.
    pub fn discard_until(&self, time_us: i64) {
        let mut consumer = self.consumer.lock();
        let mut info = SampleHolder::default();
        while self.buffer.peek_sample(&mut info) && info.time_us < time_us {
            self.buffer.skip_sample();
            // One or more samples were discarded; a subsequent read must restart at a keyframe.
            consumer.need_key_frame = true;
        }
        consumer.last_read_time_us = INVALID_TIMESTAMP;
    }

    /// Attempts to skip to the keyframe before the specified time, if it's present in the
    /// buffer.
    pub fn skip_to_keyframe_before(&self, time_us: i64) -> bool {
        self.buffer.skip_to_keyframe_before(time_us)
    }

    /// Attempts to configure a splice from this queue into `next_queue`, discarding samples of
    /// the next queue up to the first keyframe after this queue's current position. Returns
    /// whether the splice point was found.
    pub fn configure_splice_to(&self, next_queue: &DefaultTrackOutput) -> bool {
        let mut consumer = self.consumer.lock();
        if consumer.splice_out_time_us != INVALID_TIMESTAMP {
            // Already configured.
            return true;
        }
        let mut info = SampleHolder::default();
        let first_possible_splice_time = if self.buffer.peek_sample(&mut info) {
            info.time_us
        } else {
            consumer.last_read_time_us + 1
        };
        let next_buffer = &next_queue.buffer;
        while next_buffer.peek_sample(&mut info)
            && (info.time_us < first_possible_splice_time || !info.is_sync_frame())
        {
            next_buffer.skip_sample();
        }
        if next_buffer.peek_sample(&mut info) {
            consumer.splice_out_time_us = info.time_us;
            true
        } else {
            false
        }
    }

    // TrackOutput implementation; called by the loading thread.

    /// Appends sample payload bytes.
    pub fn write_sample_data(&self, data: &[u8]) {
        self.buffer.append_data(data);
    }

    /// Appends up to `length` payload bytes straight from a data source. `Ok(0)` signals the
    /// end of the source's input.
    pub fn write_sample_data_from_source(
        &self,
        source: &mut dyn DataSource,
        length: usize,
    ) -> Result<usize, DashPlayerError> {
        self.buffer.append_from_source(source, length)
    }

    /// Sets the downstream media format carried by the chunks feeding this output.
    pub fn give_format(&self, format: MediaFormat) {
        *self.format.lock() = Some(format);
    }

    /// Commits the metadata of a sample whose payload was appended by the preceding
    /// `write_sample_data` calls. `offset` is the number of bytes appended after the end of the
    /// sample (normally 0); `size` the sample's payload length including any in-band encryption
    /// prefix.
    pub fn write_sample_metadata(
        &self,
        time_us: i64,
        duration_us: i64,
        flags: u32,
        size: usize,
        offset: usize,
        crypto: Option<SampleCrypto>,
    ) {
        {
            let mut largest = self.largest_parsed_timestamp_us.lock();
            *largest = (*largest).max(time_us);
        }
        let position = self.buffer.write_position() - size as i64 - offset as i64;
        self.buffer.commit_sample(time_us, duration_us, flags, position, size, crypto);
    }

    fn advance_to_eligible_sample(&self, consumer: &mut ConsumerState) -> bool {
        let mut info = SampleHolder::default();
        let mut have_next = self.buffer.peek_sample(&mut info);
        if consumer.need_key_frame {
            while have_next && !info.is_sync_frame() {
                self.buffer.skip_sample();
                have_next = self.buffer.peek_sample(&mut info);
            }
        }
        if !have_next {
            return false;
        }
        if consumer.splice_out_time_us != INVALID_TIMESTAMP
            && info.time_us >= consumer.splice_out_time_us
        {
            return false;
        }
        true
    }
}
