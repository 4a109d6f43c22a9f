//! A sample source that loads media in chunks obtained from a [`ChunkSource`], buffering their
//! samples for a downstream consumer.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::{
    Chunk, ChunkLoadTask, ChunkOperationHolder, ChunkSampleSourceEventListener, ChunkSource,
    TrackCriteria,
};
use crate::extractor::{sample_flags, DefaultTrackOutput, SampleHolder};
use crate::format::{Format, MediaFormat};
use crate::load_control::{LoadControl, SourceHandle};
use crate::playback_rate::PlaybackRate;
use crate::upstream::{Clock, LoadOutcome, Loader, SystemClock};
use crate::{us_to_ms, DashPlayerError, END_OF_TRACK_US};

/// The default minimum number of times to retry loading data prior to reporting that buffering
/// cannot proceed.
pub const DEFAULT_MIN_LOADABLE_RETRY_COUNT: u32 = 3;

const NO_RESET_PENDING: i64 = i64::MIN;

/// How often a chunk operation is re-evaluated while nothing else forces one.
const EVALUATION_INTERVAL: Duration = Duration::from_secs(2);

/// Lifecycle state of a [`ChunkSampleSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Idle,
    Initialized,
    Prepared,
    Enabled,
    Disabling,
}

/// The outcome of one [`ChunkSampleSource::read_data`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadResult {
    NothingRead,
    /// A new downstream media format was placed in the format holder.
    FormatRead,
    /// A sample was placed in the sample holder.
    SampleRead,
    EndOfStream,
}

/// A sample source that loads media in [`Chunk`]s, which are themselves obtained from a
/// [`ChunkSource`].
///
/// All methods must be called from the source's control thread. Loading happens on a background
/// loader thread; its outcomes are collected and dispatched here during
/// [`ChunkSampleSource::continue_buffering`] (or an explicit
/// [`ChunkSampleSource::handle_loader_events`]).
pub struct ChunkSampleSource {
    source_id: i32,
    chunk_source: Box<dyn ChunkSource>,
    load_control: Arc<LoadControl>,
    playback_rate: Arc<PlaybackRate>,
    buffer_size_contribution: usize,
    event_listener: Option<Box<dyn ChunkSampleSourceEventListener>>,
    min_loadable_retry_count: u32,

    state: SourceState,
    loader: Option<Loader<ChunkLoadTask>>,
    handle: Option<SourceHandle>,
    sample_queue: Arc<DefaultTrackOutput>,
    media_chunks: VecDeque<Box<Chunk>>,
    current_loadable_holder: ChunkOperationHolder,
    /// The failed load awaiting its backoff deadline, kept so an unchanged re-evaluation can
    /// resume it where it left off.
    backed_off_task: Option<ChunkLoadTask>,

    downstream_position_us: i64,
    last_seek_position_us: i64,
    pending_reset_position_us: i64,
    last_performed_buffer_operation: Option<Instant>,
    pending_discontinuity: bool,
    loading_finished: bool,

    current_loadable_error: Option<DashPlayerError>,
    current_loadable_error_count: u32,
    current_loadable_error_timestamp: Option<Instant>,
    current_load_start_time: Option<Instant>,

    downstream_format: Option<Format>,
    downstream_media_format: Option<MediaFormat>,
    disable_done_callback: Option<Box<dyn FnOnce() + Send>>,
    clock: Arc<dyn Clock>,
}

impl ChunkSampleSource {
    pub fn new(
        chunk_source: Box<dyn ChunkSource>,
        load_control: Arc<LoadControl>,
        playback_rate: Arc<PlaybackRate>,
        buffer_size_contribution: usize,
        event_listener: Option<Box<dyn ChunkSampleSourceEventListener>>,
        source_id: i32,
        min_loadable_retry_count: u32,
    ) -> ChunkSampleSource {
        let sample_queue = Arc::new(DefaultTrackOutput::new(load_control.allocator().clone()));
        ChunkSampleSource {
            source_id,
            chunk_source,
            load_control,
            playback_rate,
            buffer_size_contribution,
            event_listener,
            min_loadable_retry_count,
            state: SourceState::Idle,
            loader: None,
            handle: None,
            sample_queue,
            media_chunks: VecDeque::new(),
            current_loadable_holder: ChunkOperationHolder::default(),
            backed_off_task: None,
            downstream_position_us: 0,
            last_seek_position_us: 0,
            pending_reset_position_us: NO_RESET_PENDING,
            last_performed_buffer_operation: None,
            pending_discontinuity: false,
            loading_finished: false,
            current_loadable_error: None,
            current_loadable_error_count: 0,
            current_loadable_error_timestamp: None,
            current_load_start_time: None,
            downstream_format: None,
            downstream_media_format: None,
            disable_done_callback: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the monotonic time source pacing evaluation ticks and retry backoff. Intended
    /// for tests.
    pub fn set_clock(&mut self, clock: Arc<dyn Clock>) {
        self.clock = clock;
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    /// Registers the source for use. Wrong-state calls are caller bugs and panic.
    pub fn register(&mut self) {
        assert_eq!(self.state, SourceState::Idle, "register() in state {:?}", self.state);
        self.state = SourceState::Initialized;
    }

    /// Prepares the source. May be called repeatedly until it returns true.
    pub fn prepare(&mut self) -> bool {
        assert!(
            self.state == SourceState::Initialized || self.state == SourceState::Prepared,
            "prepare() in state {:?}",
            self.state
        );
        if self.state == SourceState::Prepared {
            return true;
        }
        if !self.chunk_source.prepare() {
            return false;
        }
        self.loader = Some(Loader::new(format!("Loader:{}", self.chunk_source.content_type())));
        self.state = SourceState::Prepared;
        true
    }

    pub fn duration_us(&self) -> i64 {
        assert!(self.state == SourceState::Prepared || self.state == SourceState::Enabled);
        self.chunk_source.duration_us()
    }

    /// Enables the source, starting buffering from `position_us`.
    pub fn enable(&mut self, criteria: &TrackCriteria, position_us: i64) {
        assert_eq!(self.state, SourceState::Prepared, "enable() in state {:?}", self.state);
        self.state = SourceState::Enabled;
        self.chunk_source.enable(criteria);
        self.handle = Some(self.load_control.register(self.buffer_size_contribution));
        self.downstream_position_us = position_us;
        self.last_seek_position_us = position_us;
        self.downstream_format = None;
        self.downstream_media_format = None;
        self.pending_discontinuity = false;
        self.restart_from(position_us);
    }

    /// Disables the source. If a load is in flight it is canceled and teardown completes when
    /// the cancellation is observed (see [`ChunkSampleSource::handle_loader_events`]);
    /// `disable_done_callback` runs at that point.
    pub fn disable(&mut self, disable_done_callback: Option<Box<dyn FnOnce() + Send>>) {
        assert_eq!(self.state, SourceState::Enabled, "disable() in state {:?}", self.state);
        self.state = SourceState::Disabling;
        self.disable_done_callback = disable_done_callback;
        let loading = self.loader.as_ref().is_some_and(|l| l.is_loading());
        if loading {
            self.loader.as_ref().unwrap().cancel_loading();
        } else {
            self.disable_and_clear();
        }
    }

    /// Releases the source back to idle. Must not be called while enabled.
    pub fn release(&mut self) {
        assert_ne!(self.state, SourceState::Enabled, "release() while enabled");
        if let Some(loader) = &self.loader {
            if loader.is_loading() {
                loader.cancel_loading();
            }
        }
        self.state = SourceState::Idle;
    }

    /// Indicates the current playback position and keeps the buffering machinery moving:
    /// dispatches finished loads, re-evaluates the chunk operation, and starts the next load
    /// when the load control permits. Returns true when samples are available (or the stream
    /// has ended).
    pub fn continue_buffering(&mut self, position_us: i64) -> bool {
        assert_eq!(self.state, SourceState::Enabled);
        self.downstream_position_us = position_us;
        self.chunk_source.continue_buffering(position_us);
        self.handle_loader_events();
        if self.state == SourceState::Enabled {
            self.update_load_control();
        }
        self.loading_finished || !self.sample_queue.is_empty()
    }

    /// False when the source cannot currently make progress: the most recent load failed and
    /// the retry budget is exhausted.
    pub fn can_continue_buffering(&self) -> bool {
        if self.current_loadable_error.is_some()
            && self.current_loadable_error_count > self.min_loadable_retry_count
        {
            return false;
        }
        if self.current_loadable_holder.chunk().is_none() {
            return self.chunk_source.can_continue_buffering();
        }
        true
    }

    /// Returns the pending discontinuity position exactly once after a seek, then `None` until
    /// the next seek.
    pub fn read_discontinuity(&mut self) -> Option<i64> {
        if self.pending_discontinuity {
            self.pending_discontinuity = false;
            Some(self.last_seek_position_us)
        } else {
            None
        }
    }

    /// Reads the next event from the source: a downstream format change, a sample, or the end
    /// of the stream.
    pub fn read_data(
        &mut self,
        position_us: i64,
        format_holder: &mut Option<MediaFormat>,
        sample_holder: &mut SampleHolder,
    ) -> ReadResult {
        assert_eq!(self.state, SourceState::Enabled);
        self.downstream_position_us = position_us;

        if self.pending_discontinuity || self.is_pending_reset() {
            return ReadResult::NothingRead;
        }
        if self.media_chunks.is_empty() {
            return if self.loading_finished {
                ReadResult::EndOfStream
            } else {
                ReadResult::NothingRead
            };
        }

        let have_samples = !self.sample_queue.is_empty();
        // Advance past chunks whose samples have all been consumed.
        while have_samples
            && self.media_chunks.len() > 1
            && self.media_chunks[1].first_sample_index() <= self.sample_queue.read_index()
        {
            self.media_chunks.pop_front();
        }

        let current_chunk = &self.media_chunks[0];
        let chunk_format = current_chunk.format.clone();
        let chunk_trigger = current_chunk.trigger;
        let chunk_start_time_us = current_chunk.start_time_us;
        let chunk_media_format = current_chunk.media_format.clone();
        let media_format_final = current_chunk.is_media_format_final;

        match &chunk_format {
            Some(format) => {
                if self.downstream_format.as_ref() != Some(format) {
                    self.notify_downstream_format_changed(
                        format,
                        chunk_trigger.code(),
                        chunk_start_time_us,
                    );
                    self.downstream_format = chunk_format.clone();
                }
            }
            None => self.downstream_format = None,
        }

        if have_samples || media_format_final {
            let media_format = chunk_media_format.or_else(|| self.sample_queue.format());
            match media_format {
                Some(media_format) => {
                    if self.downstream_media_format.as_ref() != Some(&media_format) {
                        *format_holder = Some(media_format.clone());
                        self.downstream_media_format = Some(media_format);
                        return ReadResult::FormatRead;
                    }
                }
                None => self.downstream_media_format = None,
            }
        }

        if !have_samples {
            return if self.loading_finished {
                ReadResult::EndOfStream
            } else {
                ReadResult::NothingRead
            };
        }

        if self.sample_queue.sample(sample_holder) {
            let decode_only = if self.playback_rate.is_forward() {
                sample_holder.time_us < self.last_seek_position_us
            } else {
                sample_holder.time_us > self.last_seek_position_us
            };
            if decode_only {
                sample_holder.flags |= sample_flags::DECODE_ONLY;
            }
            return ReadResult::SampleRead;
        }
        ReadResult::NothingRead
    }

    /// Seeks to the given position. A no-op when already there; otherwise seeks within the
    /// sample queue when the target keyframe is buffered, and restarts loading from the
    /// position when it is not.
    pub fn seek_to_us(&mut self, position_us: i64) {
        assert_eq!(self.state, SourceState::Enabled);
        let current_position_us = if self.is_pending_reset() {
            self.pending_reset_position_us
        } else {
            self.downstream_position_us
        };
        self.downstream_position_us = position_us;
        self.last_seek_position_us = position_us;
        if current_position_us == position_us {
            return;
        }

        let seek_inside_buffer =
            !self.is_pending_reset() && self.sample_queue.skip_to_keyframe_before(position_us);
        if seek_inside_buffer {
            // All that remains is discarding chunks we have moved past.
            let have_samples = !self.sample_queue.is_empty();
            while have_samples
                && self.media_chunks.len() > 1
                && self.media_chunks[1].first_sample_index() <= self.sample_queue.read_index()
            {
                self.media_chunks.pop_front();
            }
        } else {
            self.restart_from(position_us);
        }
        // Either way, downstream components must observe a discontinuity.
        self.pending_discontinuity = true;
    }

    /// The position up to which media is buffered.
    pub fn buffered_position_us(&self) -> i64 {
        assert_eq!(self.state, SourceState::Enabled);
        if self.is_pending_reset() {
            return self.pending_reset_position_us;
        }
        if self.loading_finished {
            return END_OF_TRACK_US;
        }
        self.sample_queue
            .largest_parsed_timestamp_us()
            .unwrap_or(self.downstream_position_us)
    }

    /// Collects finished loads from the loader thread and dispatches their outcomes. Called
    /// from [`ChunkSampleSource::continue_buffering`]; callers driving a disable without a
    /// buffering loop should invoke it directly.
    pub fn handle_loader_events(&mut self) {
        loop {
            let polled = self.loader.as_mut().and_then(|l| l.poll());
            match polled {
                None => return,
                Some((task, LoadOutcome::Complete)) => self.on_load_completed(task),
                Some((task, LoadOutcome::Canceled)) => self.on_load_canceled(task),
                Some((task, LoadOutcome::Error(e))) => self.on_load_error(task, e),
            }
        }
    }

    // Loader outcome handling, on the control thread.

    fn on_load_completed(&mut self, task: ChunkLoadTask) {
        let now = self.clock.now();
        let load_duration = self
            .current_load_start_time
            .map(|t| now.duration_since(t))
            .unwrap_or_default();
        let notification = if task.kind().is_media() {
            match self.media_chunks.iter().position(|c| c.id() == task.chunk_id()) {
                Some(index) => {
                    self.chunk_source.on_chunk_load_completed(&self.media_chunks[index]);
                    let chunk = &self.media_chunks[index];
                    Some((
                        chunk.bytes_loaded(),
                        chunk.kind.type_code(),
                        chunk.trigger.code(),
                        chunk.format.clone(),
                        us_to_ms(chunk.start_time_us),
                        us_to_ms(chunk.end_time_us),
                    ))
                }
                None => None,
            }
        } else {
            self.current_loadable_holder.chunk().map(|chunk| {
                (
                    chunk.bytes_loaded(),
                    chunk.kind.type_code(),
                    chunk.trigger.code(),
                    chunk.format.clone(),
                    -1,
                    -1,
                )
            })
        };
        if let Some((bytes, type_code, trigger, format, start_ms, end_ms)) = notification {
            if !task.kind().is_media() {
                // The holder still owns a non-media chunk; let the chunk source inspect it
                // (e.g. to stash loaded initialization data) before it is dropped.
                if let Some(chunk) = self.current_loadable_holder.chunk() {
                    self.chunk_source.on_chunk_load_completed(chunk);
                }
            }
            self.notify_load_completed(
                bytes,
                type_code,
                trigger,
                format.as_ref(),
                start_ms,
                end_ms,
                load_duration,
            );
        }
        drop(task);
        self.clear_current_loadable();
        if self.state == SourceState::Enabled {
            self.update_load_control();
        }
    }

    fn on_load_canceled(&mut self, task: ChunkLoadTask) {
        self.notify_load_canceled(task.bytes_loaded());
        drop(task);
        self.clear_current_loadable();
        if self.state == SourceState::Enabled {
            self.restart_from(self.pending_reset_position_us);
        } else {
            self.disable_and_clear();
        }
    }

    fn on_load_error(&mut self, task: ChunkLoadTask, error: DashPlayerError) {
        warn!("load error on source {}: {error}", self.source_id);
        self.current_loadable_error_count += 1;
        self.current_loadable_error_timestamp = Some(self.clock.now());
        self.notify_load_error(&error);
        let failed_chunk_id = task.chunk_id();
        if task.kind().is_media() {
            let chunk = self.media_chunks.iter().find(|c| c.id() == failed_chunk_id);
            self.chunk_source.on_chunk_load_error(chunk.map(|c| c.as_ref()), &error);
        } else {
            self.chunk_source.on_chunk_load_error(self.current_loadable_holder.chunk(), &error);
        }
        self.current_loadable_error = Some(error);
        self.backed_off_task = Some(task);
        if self.state == SourceState::Enabled {
            self.update_load_control();
        }
    }

    // Internal state machine.

    fn disable_and_clear(&mut self) {
        assert_eq!(self.state, SourceState::Disabling);
        self.state = SourceState::Prepared;
        if let Some(handle) = self.handle.take() {
            self.load_control.unregister(handle);
        }
        self.chunk_source.disable(&self.media_chunks);
        self.sample_queue.clear();
        self.media_chunks.clear();
        self.clear_current_loadable();
        self.load_control.trim_allocator();
        if let Some(callback) = self.disable_done_callback.take() {
            callback();
        }
    }

    fn restart_from(&mut self, position_us: i64) {
        self.pending_reset_position_us = position_us;
        self.loading_finished = false;
        let loading = self.loader.as_ref().is_some_and(|l| l.is_loading());
        if loading {
            self.loader.as_ref().unwrap().cancel_loading();
        } else {
            self.sample_queue.clear();
            self.media_chunks.clear();
            self.clear_current_loadable();
            self.update_load_control();
        }
    }

    fn clear_current_loadable(&mut self) {
        self.current_loadable_holder.clear_chunk();
        self.clear_current_loadable_error();
        self.backed_off_task = None;
    }

    fn clear_current_loadable_error(&mut self) {
        self.current_loadable_error = None;
        self.current_loadable_error_count = 0;
        self.current_loadable_error_timestamp = None;
    }

    fn is_pending_reset(&self) -> bool {
        self.pending_reset_position_us != NO_RESET_PENDING
    }

    fn next_load_position_us(&self) -> i64 {
        if self.is_pending_reset() {
            self.pending_reset_position_us
        } else if self.loading_finished {
            -1
        } else {
            self.media_chunks
                .back()
                .map(|c| c.end_time_us)
                .unwrap_or(self.downstream_position_us)
        }
    }

    fn update_load_control(&mut self) {
        let now = self.clock.now();
        let mut next_load_position_us = self.next_load_position_us();
        let is_backed_off = self.current_loadable_error.is_some();
        let loading = self.loader.as_ref().is_some_and(|l| l.is_loading());
        let loading_or_backed_off = loading || is_backed_off;

        // If we're not loading or backed off, evaluate the operation if (a) we don't have the
        // next chunk yet and we're not finished, or (b) the last evaluation was long enough
        // ago.
        let evaluation_due = self
            .last_performed_buffer_operation
            .map(|t| now.duration_since(t) > EVALUATION_INTERVAL)
            .unwrap_or(true);
        if !loading_or_backed_off
            && ((self.current_loadable_holder.chunk().is_none() && next_load_position_us != -1)
                || evaluation_due)
        {
            self.last_performed_buffer_operation = Some(now);
            self.do_chunk_operation();
            let discarded =
                self.discard_upstream_media_chunks(self.current_loadable_holder.queue_size());
            if self.current_loadable_holder.chunk().is_none() {
                next_load_position_us = -1;
            } else if discarded {
                next_load_position_us = self.next_load_position_us();
            }
        }

        let handle = self.handle.expect("update_load_control without registration");
        let next_loader = self.load_control.update(
            handle,
            self.downstream_position_us,
            next_load_position_us,
            loading_or_backed_off,
        );

        if is_backed_off {
            let elapsed = self
                .current_loadable_error_timestamp
                .map(|t| now.duration_since(t))
                .unwrap_or_default();
            if elapsed >= retry_delay(self.current_loadable_error_count) {
                self.resume_from_back_off();
            }
            return;
        }
        if !loading && next_loader {
            self.maybe_start_loading();
        }
    }

    fn do_chunk_operation(&mut self) {
        self.current_loadable_holder.set_end_of_stream(false);
        self.current_loadable_holder.set_queue_size(self.media_chunks.len());
        let position_us = if self.is_pending_reset() {
            self.pending_reset_position_us
        } else {
            self.downstream_position_us
        };
        self.chunk_source.get_chunk_operation(
            &self.media_chunks,
            position_us,
            &mut self.current_loadable_holder,
        );
        self.loading_finished = self.current_loadable_holder.is_end_of_stream();
    }

    /// Discards media chunks from the back of the queue until it is no longer than
    /// `queue_length`, dropping their samples from the sample queue. Returns whether anything
    /// was discarded.
    fn discard_upstream_media_chunks(&mut self, queue_length: usize) -> bool {
        if self.media_chunks.len() <= queue_length {
            return false;
        }
        let end_time_us = self.media_chunks.back().unwrap().end_time_us;
        self.loading_finished = false;
        let mut removed = None;
        while self.media_chunks.len() > queue_length {
            removed = self.media_chunks.pop_back();
        }
        let removed = removed.unwrap();
        self.sample_queue.discard_upstream_samples(removed.first_sample_index());
        self.notify_upstream_discarded(us_to_ms(removed.start_time_us), us_to_ms(end_time_us));
        true
    }

    /// Resumes after backoff. If re-evaluation selects a chunk equivalent to the backed-off
    /// one, its load is resumed where it stopped; otherwise the backed-off load is reported
    /// canceled and the replacement starts.
    fn resume_from_back_off(&mut self) {
        self.current_loadable_error = None;
        let Some(task) = self.backed_off_task.take() else {
            return;
        };
        let failed_chunk_id = task.chunk_id();

        if !task.kind().is_media() {
            // The failed chunk is still owned by the holder; the chunk source either leaves it
            // unchanged or replaces it.
            self.do_chunk_operation();
            self.discard_upstream_media_chunks(self.current_loadable_holder.queue_size());
            let unchanged = self
                .current_loadable_holder
                .chunk()
                .map(|c| c.id() == failed_chunk_id)
                .unwrap_or(false);
            if unchanged {
                trace!("resuming backed-off load");
                self.loader_start(task);
            } else {
                self.notify_load_canceled(task.bytes_loaded());
                drop(task);
                self.maybe_start_loading();
            }
            return;
        }

        let is_front =
            self.media_chunks.front().map(|c| c.id() == failed_chunk_id).unwrap_or(false);
        if is_front {
            // We cannot clear the first media chunk, so we have no choice but to continue
            // loading it.
            self.loader_start(task);
            return;
        }

        // The failed chunk is the last media chunk. Remove it before invoking the chunk
        // source, and add it back afterwards.
        let removed = self.media_chunks.pop_back().expect("backed-off media chunk not queued");
        assert_eq!(removed.id(), failed_chunk_id, "backed-off chunk must be last in the queue");
        self.do_chunk_operation();
        self.media_chunks.push_back(removed);

        let unchanged = match self.current_loadable_holder.chunk() {
            Some(new_chunk) => new_chunk.same_load(self.media_chunks.back().unwrap()),
            None => false,
        };
        if unchanged {
            trace!("resuming backed-off media load");
            self.current_loadable_holder.clear_chunk();
            self.loader_start(task);
        } else {
            self.notify_load_canceled(task.bytes_loaded());
            drop(task);
            // This removes and releases at least one chunk from the end of the queue; the
            // backed-off chunk is guaranteed to be among them.
            self.discard_upstream_media_chunks(self.current_loadable_holder.queue_size());
            self.clear_current_loadable_error();
            self.maybe_start_loading();
        }
    }

    fn maybe_start_loading(&mut self) {
        if self.current_loadable_holder.chunk().is_none() {
            return;
        }
        self.current_load_start_time = Some(self.clock.now());
        let is_media = self.current_loadable_holder.chunk().unwrap().is_media();
        let task;
        if is_media {
            let mut chunk = self.current_loadable_holder.take_chunk().unwrap();
            chunk.init(self.sample_queue.clone());
            task = chunk.take_load_task();
            let length = chunk.data_spec.length;
            let type_code = chunk.kind.type_code();
            let trigger = chunk.trigger.code();
            let format = chunk.format.clone();
            let start_ms = us_to_ms(chunk.start_time_us);
            let end_ms = us_to_ms(chunk.end_time_us);
            self.media_chunks.push_back(chunk);
            if self.is_pending_reset() {
                self.pending_reset_position_us = NO_RESET_PENDING;
            }
            self.notify_load_started(length, type_code, trigger, format.as_ref(), start_ms, end_ms);
        } else {
            let chunk = self.current_loadable_holder.chunk_mut().unwrap();
            task = chunk.take_load_task();
            let length = chunk.data_spec.length;
            let type_code = chunk.kind.type_code();
            let trigger = chunk.trigger.code();
            let format = chunk.format.clone();
            self.notify_load_started(length, type_code, trigger, format.as_ref(), -1, -1);
        }
        self.loader_start(task);
    }

    fn loader_start(&mut self, task: ChunkLoadTask) {
        let started = self.loader.as_mut().expect("loader exists once prepared").start_loading(task);
        debug_assert!(started, "a load was already in progress");
    }

    // Event notifications.

    fn notify_load_started(
        &self,
        length: i64,
        chunk_type: i32,
        trigger: i32,
        format: Option<&Format>,
        media_start_ms: i64,
        media_end_ms: i64,
    ) {
        debug!("source {}: load started ({length} bytes)", self.source_id);
        if let Some(listener) = &self.event_listener {
            listener.on_load_started(
                self.source_id,
                length,
                chunk_type,
                trigger,
                format,
                media_start_ms,
                media_end_ms,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn notify_load_completed(
        &self,
        bytes_loaded: i64,
        chunk_type: i32,
        trigger: i32,
        format: Option<&Format>,
        media_start_ms: i64,
        media_end_ms: i64,
        load_duration: Duration,
    ) {
        if let Some(listener) = &self.event_listener {
            listener.on_load_completed(
                self.source_id,
                bytes_loaded,
                chunk_type,
                trigger,
                format,
                media_start_ms,
                media_end_ms,
                load_duration,
            );
        }
    }

    fn notify_load_canceled(&self, bytes_loaded: i64) {
        if let Some(listener) = &self.event_listener {
            listener.on_load_canceled(self.source_id, bytes_loaded);
        }
    }

    fn notify_load_error(&self, error: &DashPlayerError) {
        if let Some(listener) = &self.event_listener {
            listener.on_load_error(self.source_id, error);
        }
    }

    fn notify_upstream_discarded(&self, media_start_ms: i64, media_end_ms: i64) {
        if let Some(listener) = &self.event_listener {
            listener.on_upstream_discarded(self.source_id, media_start_ms, media_end_ms);
        }
    }

    fn notify_downstream_format_changed(&self, format: &Format, trigger: i32, position_us: i64) {
        if let Some(listener) = &self.event_listener {
            listener.on_downstream_format_changed(
                self.source_id,
                format,
                trigger,
                us_to_ms(position_us),
            );
        }
    }
}

fn retry_delay(error_count: u32) -> Duration {
    Duration::from_millis(((error_count.saturating_sub(1) as u64) * 1000).min(5000))
}

#[cfg(test)]
mod tests {
    use super::retry_delay;
    use std::time::Duration;

    #[test]
    fn test_retry_delay_is_capped() {
        assert_eq!(retry_delay(1), Duration::from_millis(0));
        assert_eq!(retry_delay(2), Duration::from_millis(1000));
        assert_eq!(retry_delay(4), Duration::from_millis(3000));
        assert_eq!(retry_delay(6), Duration::from_millis(5000));
        assert_eq!(retry_delay(60), Duration::from_millis(5000));
    }
}
