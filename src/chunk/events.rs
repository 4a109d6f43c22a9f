//! Events a chunk sample source reports upward.

use std::time::Duration;

use crate::format::Format;
use crate::DashPlayerError;

/// Receives playback pipeline events from a [`super::ChunkSampleSource`]. Media times are in
/// milliseconds, and are -1 for chunks not carrying media (initialization, manifest, DRM).
///
/// All callbacks are delivered on the source's control thread.
#[allow(unused_variables)]
pub trait ChunkSampleSourceEventListener: Send {
    /// A load started. `length` is the data spec length (or -1 when unbounded).
    fn on_load_started(
        &self,
        source_id: i32,
        length: i64,
        chunk_type: i32,
        trigger: i32,
        format: Option<&Format>,
        media_start_ms: i64,
        media_end_ms: i64,
    ) {
    }

    #[allow(clippy::too_many_arguments)]
    fn on_load_completed(
        &self,
        source_id: i32,
        bytes_loaded: i64,
        chunk_type: i32,
        trigger: i32,
        format: Option<&Format>,
        media_start_ms: i64,
        media_end_ms: i64,
        load_duration: Duration,
    ) {
    }

    fn on_load_canceled(&self, source_id: i32, bytes_loaded: i64) {}

    fn on_load_error(&self, source_id: i32, error: &DashPlayerError) {}

    /// Buffered media from `media_start_ms` to `media_end_ms` was discarded to make way for
    /// higher quality chunks.
    fn on_upstream_discarded(&self, source_id: i32, media_start_ms: i64, media_end_ms: i64) {}

    /// The format being handed downstream changed.
    fn on_downstream_format_changed(
        &self,
        source_id: i32,
        format: &Format,
        trigger: i32,
        position_ms: i64,
    ) {
    }
}
