//! The contract between a chunk sample source and the component that manufactures its chunks.

use std::collections::VecDeque;

use super::{Chunk, ChunkOperationHolder};
use crate::mpd::AdaptationType;
use crate::DashPlayerError;

/// Selects which track of a presentation a source should deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackCriteria {
    pub adaptation_type: AdaptationType,
    /// Preferred language (ISO 639-1), when several adaptation sets of the type exist.
    pub language: Option<String>,
}

impl TrackCriteria {
    pub fn of_type(adaptation_type: AdaptationType) -> TrackCriteria {
        TrackCriteria { adaptation_type, language: None }
    }
}

/// A provider of [`Chunk`]s for a [`super::ChunkSampleSource`].
///
/// All methods are called on the sample source's control thread; the lifecycle mirrors the
/// sample source's own (prepare, enable, operate, disable).
pub trait ChunkSource: Send {
    /// If the source is currently having difficulty providing chunks, returns false; otherwise
    /// returns true and does nothing.
    fn can_continue_buffering(&self) -> bool {
        true
    }

    /// Prepares the source. May be called repeatedly until it returns true.
    fn prepare(&mut self) -> bool;

    /// The duration of the source in microseconds, or [`crate::UNKNOWN_TIME_US`]. Only valid
    /// once prepared.
    fn duration_us(&self) -> i64;

    /// The content type of the source ("video", "audio", "text"), used to name its loader.
    fn content_type(&self) -> &'static str;

    /// Enables the source with the specified track selection criteria. Only valid when
    /// prepared and currently disabled.
    fn enable(&mut self, criteria: &TrackCriteria);

    /// Indicates that the source should keep checking for updates to the stream (e.g. a
    /// refreshed live manifest). Called periodically while enabled.
    fn continue_buffering(&mut self, playback_position_us: i64);

    /// Updates `out` with the next operation the calling sample source should perform.
    ///
    /// `queue` is the currently buffered media chunks; `playback_position_us` is the current
    /// position, to be interpreted as a seek position when the queue is empty. On entry `out`
    /// holds the queue length, an unset end-of-stream flag, and either no chunk or a chunk
    /// previously supplied that the caller has not yet finished loading; leaving that chunk in
    /// place is both preferred and cheaper than replacing it with an identical one.
    fn get_chunk_operation(
        &mut self,
        queue: &VecDeque<Box<Chunk>>,
        playback_position_us: i64,
        out: &mut ChunkOperationHolder,
    );

    /// Invoked when the sample source has finished loading a chunk obtained from this source.
    fn on_chunk_load_completed(&mut self, chunk: &Chunk);

    /// Invoked when the sample source encounters an error loading a chunk obtained from this
    /// source.
    fn on_chunk_load_error(&mut self, chunk: Option<&Chunk>, error: &DashPlayerError);

    /// Disables the source, handing back the chunks still queued.
    fn disable(&mut self, queue: &VecDeque<Box<Chunk>>);
}
