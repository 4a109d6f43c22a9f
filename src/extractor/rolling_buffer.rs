//! A rolling buffer of sample data and corresponding sample information, backed by fixed-size
//! slabs borrowed from the shared [`Allocator`].
//!
//! The producer (a loader thread) appends bytes and commits sample records; the consumer (the
//! control/reader thread) peeks, reads and skips samples. Both sides funnel through one mutex,
//! so producer and consumer may run concurrently; distinct consumer operations must still be
//! serialized with respect to each other by the caller.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use parking_lot::Mutex;

use super::info_queue::{InfoQueue, SampleInfo};
use super::sample_holder::SampleHolder;
use super::SampleCrypto;
use crate::upstream::{Allocator, DataSource};
use crate::DashPlayerError;

#[derive(Debug)]
struct Inner {
    info_queue: InfoQueue,
    data_queue: std::collections::VecDeque<Box<[u8]>>,
    /// Bytes released back to the allocator from the front of the buffer. Always a multiple of
    /// the slab length.
    total_bytes_dropped: i64,
    total_bytes_written: i64,
    /// Fill level of the tail slab; equal to the slab length when no slab has room.
    last_allocation_offset: usize,
}

pub struct RollingSampleBuffer {
    allocator: Arc<Allocator>,
    allocation_length: usize,
    inner: Mutex<Inner>,
}

impl RollingSampleBuffer {
    pub fn new(allocator: Arc<Allocator>) -> RollingSampleBuffer {
        let allocation_length = allocator.individual_allocation_length();
        RollingSampleBuffer {
            allocator,
            allocation_length,
            inner: Mutex::new(Inner {
                info_queue: InfoQueue::default(),
                data_queue: std::collections::VecDeque::new(),
                total_bytes_dropped: 0,
                total_bytes_written: 0,
                last_allocation_offset: allocation_length,
            }),
        }
    }

    // Consumer side.

    /// Clears the buffer, returning all slabs to the allocator. Only valid while no load is in
    /// progress.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.info_queue.clear();
        while let Some(slab) = inner.data_queue.pop_back() {
            self.allocator.release(slab);
        }
        inner.total_bytes_dropped = 0;
        inner.total_bytes_written = 0;
        inner.last_allocation_offset = self.allocation_length;
    }

    pub fn write_index(&self) -> i32 {
        self.inner.lock().info_queue.write_index()
    }

    pub fn read_index(&self) -> i32 {
        self.inner.lock().info_queue.read_index()
    }

    /// Discards samples from the write side of the buffer, starting at the given absolute
    /// record index, and releases any slabs that only held discarded bytes.
    pub fn discard_upstream_samples(&self, discard_from_index: i32) {
        let mut inner = self.inner.lock();
        inner.total_bytes_written = inner.info_queue.discard_upstream_samples(discard_from_index);
        let resume_from = inner.total_bytes_written;
        self.drop_upstream_from(&mut inner, resume_from);
    }

    /// Fills the holder with the next sample's metadata without consuming anything. Returns
    /// false if the buffer holds no complete sample.
    pub fn peek_sample(&self, holder: &mut SampleHolder) -> bool {
        self.inner.lock().info_queue.peek_sample(holder).is_some()
    }

    /// Skips the current sample.
    pub fn skip_sample(&self) {
        let mut inner = self.inner.lock();
        let next_offset = inner.info_queue.move_to_next_sample();
        self.drop_downstream_to(&mut inner, next_offset);
    }

    /// Attempts to move the read position to the last keyframe at or before `time_us`. Returns
    /// false when no such keyframe is buffered.
    pub fn skip_to_keyframe_before(&self, time_us: i64) -> bool {
        let mut inner = self.inner.lock();
        match inner.info_queue.skip_to_keyframe_before(time_us) {
            Some(next_offset) => {
                self.drop_downstream_to(&mut inner, next_offset);
                true
            }
            None => false,
        }
    }

    /// Reads the current sample into the holder (metadata, payload bytes and any encryption
    /// information), advancing the read position. Returns false if there is no sample.
    pub fn read_sample(&self, holder: &mut SampleHolder) -> bool {
        let mut inner = self.inner.lock();
        let info = match inner.info_queue.peek() {
            Some(info) => info.clone(),
            None => return false,
        };
        holder.clear();
        holder.time_us = info.time_us;
        holder.duration_us = info.duration_us;
        holder.flags = info.flags;
        holder.peek_size = info.size;

        let mut payload_offset = info.offset;
        let mut payload_size = info.size;
        if holder.is_encrypted() {
            match &info.crypto {
                Some(crypto) if !crypto.iv.is_empty() => {
                    // IV and subsample counts were committed out-of-band; transfer them.
                    holder.crypto.key_id = crypto.key_id.clone();
                    holder.crypto.iv = crypto.iv.clone();
                    holder.crypto.iv.resize(16, 0);
                    holder.crypto.num_bytes_clear = crypto.num_bytes_clear.clone();
                    holder.crypto.num_bytes_encrypted = crypto.num_bytes_encrypted.clone();
                }
                _ => {
                    // Encryption data is part of the data stream; parse the prefix.
                    let consumed = self.read_encryption_data(&inner, &info, holder);
                    payload_offset += consumed as i64;
                    payload_size -= consumed;
                }
            }
        }
        holder.peek_size = payload_size;
        holder.data.resize(payload_size, 0);
        self.read_data(&inner, payload_offset, &mut holder.data);

        let next_offset = inner.info_queue.move_to_next_sample();
        self.drop_downstream_to(&mut inner, next_offset);
        true
    }

    pub fn total_bytes_dropped(&self) -> i64 {
        self.inner.lock().total_bytes_dropped
    }

    /// The largest timestamp among samples still awaiting consumption, or `None` when the
    /// buffer is empty.
    pub fn largest_queued_timestamp_us(&self) -> Option<i64> {
        self.inner.lock().info_queue.largest_queued_timestamp_us()
    }

    // Producer side.

    /// The current absolute write position.
    pub fn write_position(&self) -> i64 {
        self.inner.lock().total_bytes_written
    }

    /// Appends bytes to the buffer, allocating slabs as the tail fills.
    pub fn append_data(&self, mut src: &[u8]) {
        let mut inner = self.inner.lock();
        while !src.is_empty() {
            let writable = self.prepare_for_append(&mut inner, src.len());
            let offset = inner.last_allocation_offset;
            let slab = inner.data_queue.back_mut().expect("prepare_for_append added a slab");
            slab[offset..offset + writable].copy_from_slice(&src[..writable]);
            inner.last_allocation_offset += writable;
            inner.total_bytes_written += writable as i64;
            src = &src[writable..];
        }
    }

    /// Appends up to `length` bytes read from the data source directly into the tail slab.
    /// Returns the number of bytes appended; `Ok(0)` indicates the source's end of input.
    pub fn append_from_source(
        &self,
        source: &mut dyn DataSource,
        length: usize,
    ) -> Result<usize, DashPlayerError> {
        let mut inner = self.inner.lock();
        let writable = self.prepare_for_append(&mut inner, length);
        let offset = inner.last_allocation_offset;
        let slab = inner.data_queue.back_mut().expect("prepare_for_append added a slab");
        let bytes_read = source.read(&mut slab[offset..offset + writable])?;
        inner.last_allocation_offset += bytes_read;
        inner.total_bytes_written += bytes_read as i64;
        Ok(bytes_read)
    }

    /// Indicates the end point for the current sample, making it available for consumption.
    /// `position` is the absolute offset of the first byte of the sample in the buffer.
    pub fn commit_sample(
        &self,
        time_us: i64,
        duration_us: i64,
        flags: u32,
        position: i64,
        size: usize,
        crypto: Option<SampleCrypto>,
    ) {
        let mut inner = self.inner.lock();
        debug_assert!(position >= inner.total_bytes_dropped);
        debug_assert!(position + size as i64 <= inner.total_bytes_written);
        inner.info_queue.commit_sample(SampleInfo {
            time_us,
            duration_us,
            flags,
            offset: position,
            size,
            crypto,
        });
    }

    // Internals. All take the lock guard to make the single-lock discipline explicit.

    fn prepare_for_append(&self, inner: &mut Inner, length: usize) -> usize {
        if inner.last_allocation_offset == self.allocation_length {
            inner.last_allocation_offset = 0;
            inner.data_queue.push_back(self.allocator.allocate());
        }
        length.min(self.allocation_length - inner.last_allocation_offset)
    }

    /// Releases slabs that only hold data before `absolute_position`.
    fn drop_downstream_to(&self, inner: &mut Inner, absolute_position: i64) {
        while absolute_position - inner.total_bytes_dropped >= self.allocation_length as i64 {
            match inner.data_queue.pop_front() {
                Some(slab) => {
                    self.allocator.release(slab);
                    inner.total_bytes_dropped += self.allocation_length as i64;
                }
                None => break,
            }
        }
    }

    /// Discards data at and after `absolute_position` from the write side, releasing fully
    /// emptied slabs.
    fn drop_upstream_from(&self, inner: &mut Inner, absolute_position: i64) {
        let relative = (absolute_position - inner.total_bytes_dropped) as usize;
        let allocation_index = relative / self.allocation_length;
        let allocation_offset = relative % self.allocation_length;
        let keep = if allocation_offset == 0 { allocation_index } else { allocation_index + 1 };
        while inner.data_queue.len() > keep {
            let slab = inner.data_queue.pop_back().expect("slab count checked above");
            self.allocator.release(slab);
        }
        inner.last_allocation_offset =
            if allocation_offset == 0 { self.allocation_length } else { allocation_offset };
    }

    /// Copies `dest.len()` bytes starting at the given absolute position out of the slabs.
    fn read_data(&self, inner: &Inner, absolute_position: i64, dest: &mut [u8]) {
        let mut copied = 0;
        while copied < dest.len() {
            let relative = (absolute_position + copied as i64 - inner.total_bytes_dropped) as usize;
            let slab_index = relative / self.allocation_length;
            let slab_offset = relative % self.allocation_length;
            let to_copy = (dest.len() - copied).min(self.allocation_length - slab_offset);
            let slab = &inner.data_queue[slab_index];
            dest[copied..copied + to_copy]
                .copy_from_slice(&slab[slab_offset..slab_offset + to_copy]);
            copied += to_copy;
        }
    }

    /// Parses the in-band encryption prefix of the sample described by `info` into the
    /// holder's crypto info, returning the number of prefix bytes consumed.
    ///
    /// The prefix layout is: one signal byte (bit 7 set when subsample encryption follows, low
    /// bits holding the IV size), the IV, and for subsample encryption a big-endian u16
    /// subsample count followed by that many (u16 clear, u32 encrypted) pairs.
    fn read_encryption_data(
        &self,
        inner: &Inner,
        info: &SampleInfo,
        holder: &mut SampleHolder,
    ) -> usize {
        let mut offset = info.offset;

        let mut signal = [0u8; 1];
        self.read_data(inner, offset, &mut signal);
        offset += 1;
        let subsample_encryption = signal[0] & 0x80 != 0;
        let iv_size = (signal[0] & 0x7F) as usize;

        holder.crypto.iv.clear();
        holder.crypto.iv.resize(16, 0);
        self.read_data(inner, offset, &mut holder.crypto.iv[..iv_size]);
        offset += iv_size as i64;

        let subsample_count = if subsample_encryption {
            let mut count = [0u8; 2];
            self.read_data(inner, offset, &mut count);
            offset += 2;
            BigEndian::read_u16(&count) as usize
        } else {
            1
        };

        holder.crypto.num_bytes_clear = vec![0; subsample_count];
        holder.crypto.num_bytes_encrypted = vec![0; subsample_count];
        if subsample_encryption {
            let mut table = vec![0u8; 6 * subsample_count];
            self.read_data(inner, offset, &mut table);
            offset += table.len() as i64;
            for i in 0..subsample_count {
                holder.crypto.num_bytes_clear[i] =
                    BigEndian::read_u16(&table[6 * i..]) as i32;
                holder.crypto.num_bytes_encrypted[i] =
                    BigEndian::read_u32(&table[6 * i + 2..]) as i32;
            }
        } else {
            let consumed = (offset - info.offset) as usize;
            holder.crypto.num_bytes_clear[0] = 0;
            holder.crypto.num_bytes_encrypted[0] = (info.size - consumed) as i32;
        }

        holder.crypto.key_id =
            info.crypto.as_ref().map(|c| c.key_id.clone()).unwrap_or_default();
        (offset - info.offset) as usize
    }
}

impl std::fmt::Debug for RollingSampleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RollingSampleBuffer")
            .field("allocation_length", &self.allocation_length)
            .field("total_bytes_dropped", &inner.total_bytes_dropped)
            .field("total_bytes_written", &inner.total_bytes_written)
            .field("slabs", &inner.data_queue.len())
            .finish()
    }
}
