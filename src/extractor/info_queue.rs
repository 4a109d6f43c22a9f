//! The queue of per-sample records committed to a rolling buffer, in commit order.

use std::collections::VecDeque;

use super::sample_holder::{sample_flags, SampleHolder};

/// Encryption metadata committed alongside a sample when the producer has already parsed it out
/// of the stream. When absent for an encrypted sample, the buffer parses the in-band prefix at
/// read time instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleCrypto {
    pub key_id: String,
    pub iv: Vec<u8>,
    pub num_bytes_clear: Vec<i32>,
    pub num_bytes_encrypted: Vec<i32>,
}

/// One committed sample record. `offset` is the absolute byte position of the sample's data in
/// the rolling buffer's coordinate space.
#[derive(Debug, Clone)]
pub(crate) struct SampleInfo {
    pub time_us: i64,
    pub duration_us: i64,
    pub flags: u32,
    pub offset: i64,
    pub size: usize,
    pub crypto: Option<SampleCrypto>,
}

/// Sample records between the consumer's read index and the producer's write index. Indices are
/// absolute: they keep growing as samples are read, so a record index can identify a sample for
/// upstream discard regardless of how much the consumer has advanced.
#[derive(Debug, Default)]
pub(crate) struct InfoQueue {
    infos: VecDeque<SampleInfo>,
    read_index: i32,
    /// Absolute byte position just past the last consumed sample; where the write position
    /// falls back to when every committed record is discarded.
    consumed_to_offset: i64,
}

impl InfoQueue {
    pub fn clear(&mut self) {
        self.infos.clear();
        self.read_index = 0;
        self.consumed_to_offset = 0;
    }

    pub fn read_index(&self) -> i32 {
        self.read_index
    }

    pub fn write_index(&self) -> i32 {
        self.read_index + self.infos.len() as i32
    }

    pub fn commit_sample(&mut self, info: SampleInfo) {
        self.infos.push_back(info);
    }

    /// Fills `holder` with the metadata of the next unread sample. Returns false when empty.
    pub fn peek_sample(&self, holder: &mut SampleHolder) -> Option<&SampleInfo> {
        let info = self.infos.front()?;
        holder.time_us = info.time_us;
        holder.duration_us = info.duration_us;
        holder.flags = info.flags;
        holder.peek_size = info.size;
        Some(info)
    }

    pub fn peek(&self) -> Option<&SampleInfo> {
        self.infos.front()
    }

    /// Advances past the current sample, returning the absolute byte offset up to which the
    /// buffer may now release data.
    pub fn move_to_next_sample(&mut self) -> i64 {
        if let Some(info) = self.infos.pop_front() {
            self.read_index += 1;
            self.consumed_to_offset = info.offset + info.size as i64;
        }
        self.consumed_to_offset
    }

    /// Advances the read index to the last sync sample with `time_us` at or before the given
    /// time. Fails (returning `None` and leaving the queue untouched) when the time falls
    /// outside the buffered range or no sync sample precedes it.
    pub fn skip_to_keyframe_before(&mut self, time_us: i64) -> Option<i64> {
        let first = self.infos.front()?;
        if time_us < first.time_us {
            return None;
        }
        let last_time = self.infos.back().map(|i| i.time_us).unwrap_or(i64::MIN);
        if time_us > last_time {
            return None;
        }
        let mut samples_to_keyframe: Option<usize> = None;
        for (count, info) in self.infos.iter().enumerate() {
            if info.time_us > time_us {
                break;
            }
            if info.flags & sample_flags::SYNC != 0 {
                samples_to_keyframe = Some(count);
            }
        }
        let skip = samples_to_keyframe?;
        for _ in 0..skip {
            let info = self.infos.pop_front().unwrap();
            self.read_index += 1;
            self.consumed_to_offset = info.offset + info.size as i64;
        }
        Some(self.infos.front().unwrap().offset)
    }

    /// Drops records with absolute index at or after `discard_from_index` from the write end,
    /// returning the byte position writing should resume from.
    pub fn discard_upstream_samples(&mut self, discard_from_index: i32) -> i64 {
        let retain = (discard_from_index - self.read_index).max(0) as usize;
        self.infos.truncate(retain);
        match self.infos.back() {
            Some(last) => last.offset + last.size as i64,
            None => self.consumed_to_offset,
        }
    }

    /// The largest timestamp among the records still in the queue.
    pub fn largest_queued_timestamp_us(&self) -> Option<i64> {
        self.infos.iter().map(|i| i.time_us).max()
    }
}
