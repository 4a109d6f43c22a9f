//! Holders into which sample metadata and data are read.

/// Flags accompanying each sample.
pub mod sample_flags {
    /// The sample is independently decodable (a keyframe).
    pub const SYNC: u32 = 1;
    /// The sample's payload is encrypted and [`super::SampleHolder::crypto`] describes it.
    pub const ENCRYPTED: u32 = 2;
    /// The sample should be decoded but not presented; set by the consumer based on the seek
    /// position.
    pub const DECODE_ONLY: u32 = 0x8000_0000;
}

/// Encryption metadata for one sample. The clear/encrypted byte counts are parallel vectors of
/// equal length describing back-to-back regions of the payload starting at position 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CryptoInfo {
    pub key_id: String,
    /// The initialization vector, padded into a 16 byte slot.
    pub iv: Vec<u8>,
    pub num_bytes_clear: Vec<i32>,
    pub num_bytes_encrypted: Vec<i32>,
}

impl CryptoInfo {
    pub fn num_subsamples(&self) -> usize {
        debug_assert_eq!(self.num_bytes_clear.len(), self.num_bytes_encrypted.len());
        self.num_bytes_clear.len()
    }

    pub fn clear(&mut self) {
        self.key_id.clear();
        self.iv.clear();
        self.num_bytes_clear.clear();
        self.num_bytes_encrypted.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.num_bytes_clear.is_empty() && self.iv.is_empty()
    }
}

/// Holds one sample as handed to the downstream consumer: metadata always, payload bytes after
/// a successful read.
#[derive(Debug, Clone, Default)]
pub struct SampleHolder {
    pub time_us: i64,
    pub duration_us: i64,
    pub flags: u32,
    /// Size of the payload a read will produce. Valid after a peek; adjusted downwards when an
    /// encryption prefix is consumed out of the stored bytes.
    pub peek_size: usize,
    /// The payload, filled by a read.
    pub data: Vec<u8>,
    pub crypto: CryptoInfo,
}

impl SampleHolder {
    pub fn is_sync_frame(&self) -> bool {
        self.flags & sample_flags::SYNC != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & sample_flags::ENCRYPTED != 0
    }

    pub fn is_decode_only(&self) -> bool {
        self.flags & sample_flags::DECODE_ONLY != 0
    }

    /// Resets the holder before it receives a new sample.
    pub fn clear(&mut self) {
        self.time_us = 0;
        self.duration_us = 0;
        self.flags = 0;
        self.peek_size = 0;
        self.data.clear();
        self.crypto.clear();
    }
}
