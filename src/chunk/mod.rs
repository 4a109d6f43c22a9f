//! Loadable chunks of media data, and the machinery that selects, loads and consumes them.

pub mod evaluator;
mod events;
mod holder;
mod sample_source;
mod source;

pub use events::ChunkSampleSourceEventListener;
pub use holder::ChunkOperationHolder;
pub use sample_source::{ChunkSampleSource, ReadResult, SourceState, DEFAULT_MIN_LOADABLE_RETRY_COUNT};
pub use source::{ChunkSource, TrackCriteria};

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::extractor::{sample_flags, DefaultTrackOutput, SampleCrypto};
use crate::format::{Format, MediaFormat};
use crate::upstream::{CancelFlag, DataSource, DataSpec, Loadable, LENGTH_UNBOUNDED};
use crate::DashPlayerError;

/// Chunk type codes, as reported to event listeners. Constants rather than an enum because
/// integrations may define custom codes at or above [`chunk_type::CUSTOM_BASE`].
pub mod chunk_type {
    pub const UNSPECIFIED: i32 = 0;
    pub const MEDIA: i32 = 1;
    pub const MEDIA_INITIALIZATION: i32 = 2;
    pub const DRM: i32 = 3;
    pub const MANIFEST: i32 = 4;
    pub const CUSTOM_BASE: i32 = 10000;
}

/// The reason a chunk was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Unspecified,
    /// An initial format selection.
    Initial,
    /// A user initiated format selection.
    Manual,
    /// An adaptive format selection.
    Adaptive,
    /// Selected whilst in a trick play mode.
    TrickPlay,
    /// Integration defined; codes start at [`chunk_type::CUSTOM_BASE`].
    Custom(u32),
}

impl Trigger {
    pub fn code(self) -> i32 {
        match self {
            Trigger::Unspecified => 0,
            Trigger::Initial => 1,
            Trigger::Manual => 2,
            Trigger::Adaptive => 3,
            Trigger::TrickPlay => 4,
            Trigger::Custom(c) => chunk_type::CUSTOM_BASE + c as i32,
        }
    }
}

/// What a chunk delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Media samples; the payload is appended to the bound track output as one sample.
    Media,
    /// Codec initialization data for a representation.
    Initialization,
    /// DRM related data.
    Drm,
    /// A manifest (refresh) document.
    Manifest,
    Custom(u32),
}

impl ChunkKind {
    pub fn type_code(self) -> i32 {
        match self {
            ChunkKind::Media => chunk_type::MEDIA,
            ChunkKind::Initialization => chunk_type::MEDIA_INITIALIZATION,
            ChunkKind::Drm => chunk_type::DRM,
            ChunkKind::Manifest => chunk_type::MANIFEST,
            ChunkKind::Custom(c) => chunk_type::CUSTOM_BASE + c as i32,
        }
    }

    pub fn is_media(self) -> bool {
        self == ChunkKind::Media
    }
}

/// Value of `parent_id` when no parent need be specified.
pub const NO_PARENT_ID: i32 = -1;

static NEXT_CHUNK_ID: AtomicU64 = AtomicU64::new(1);

/// A loadable unit: one media segment, an initialization segment, a DRM or manifest document.
///
/// The inheritance tree of player implementations collapses here into a tagged [`ChunkKind`]
/// plus a common envelope. Media chunks carry their presentation time range and index; other
/// kinds leave those fields at their defaults.
pub struct Chunk {
    pub kind: ChunkKind,
    pub trigger: Trigger,
    /// The spec defining the data to load. Immutable copy owned by the chunk.
    pub data_spec: DataSpec,
    /// The format of the stream this chunk belongs to, when it is associated with one.
    pub format: Option<Format>,
    /// Optional identifier for a parent (e.g. the period index) this chunk originates from.
    pub parent_id: i32,
    /// The start time of the media contained by the chunk, in microseconds.
    pub start_time_us: i64,
    /// The end time of the media contained by the chunk, in microseconds.
    pub end_time_us: i64,
    pub chunk_index: i64,
    /// Whether [`Chunk::media_format`] is already correct, or only becomes so once the chunk
    /// has loaded.
    pub is_media_format_final: bool,
    /// The elementary format delivered downstream alongside this chunk's samples.
    pub media_format: Option<MediaFormat>,
    /// Flags committed with the chunk's sample.
    pub sample_flags: u32,
    /// Encryption metadata committed with the chunk's sample; an entry with an empty IV makes
    /// the sample buffer parse the in-band encryption prefix at read time.
    pub sample_crypto: Option<SampleCrypto>,

    id: u64,
    first_sample_index: i32,
    bytes_loaded: Arc<AtomicI64>,
    cancel: Arc<CancelFlag>,
    source: Option<Box<dyn DataSource>>,
    output: Option<Arc<DefaultTrackOutput>>,
    collected: Arc<Mutex<Vec<u8>>>,
}

impl Chunk {
    /// A chunk delivering one media segment as a single sync sample.
    #[allow(clippy::too_many_arguments)]
    pub fn media(
        source: Box<dyn DataSource>,
        data_spec: DataSpec,
        trigger: Trigger,
        format: Format,
        start_time_us: i64,
        end_time_us: i64,
        chunk_index: i64,
        parent_id: i32,
    ) -> Chunk {
        Chunk {
            kind: ChunkKind::Media,
            trigger,
            data_spec,
            format: Some(format),
            parent_id,
            start_time_us,
            end_time_us,
            chunk_index,
            is_media_format_final: false,
            media_format: None,
            sample_flags: sample_flags::SYNC,
            sample_crypto: None,
            id: NEXT_CHUNK_ID.fetch_add(1, Ordering::Relaxed),
            first_sample_index: -1,
            bytes_loaded: Arc::new(AtomicI64::new(0)),
            cancel: Arc::new(CancelFlag::default()),
            source: Some(source),
            output: None,
            collected: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A chunk delivering codec initialization data for `format`.
    pub fn initialization(
        source: Box<dyn DataSource>,
        data_spec: DataSpec,
        trigger: Trigger,
        format: Format,
        parent_id: i32,
    ) -> Chunk {
        Chunk { kind: ChunkKind::Initialization, format: Some(format), ..Chunk::bare(source, data_spec, trigger, parent_id) }
    }

    pub fn manifest(source: Box<dyn DataSource>, data_spec: DataSpec, trigger: Trigger) -> Chunk {
        Chunk::bare_kind(ChunkKind::Manifest, source, data_spec, trigger, NO_PARENT_ID)
    }

    pub fn drm(
        source: Box<dyn DataSource>,
        data_spec: DataSpec,
        trigger: Trigger,
        parent_id: i32,
    ) -> Chunk {
        Chunk::bare_kind(ChunkKind::Drm, source, data_spec, trigger, parent_id)
    }

    fn bare(source: Box<dyn DataSource>, data_spec: DataSpec, trigger: Trigger, parent_id: i32) -> Chunk {
        Chunk::bare_kind(ChunkKind::Initialization, source, data_spec, trigger, parent_id)
    }

    fn bare_kind(
        kind: ChunkKind,
        source: Box<dyn DataSource>,
        data_spec: DataSpec,
        trigger: Trigger,
        parent_id: i32,
    ) -> Chunk {
        Chunk {
            kind,
            trigger,
            data_spec,
            format: None,
            parent_id,
            start_time_us: -1,
            end_time_us: -1,
            chunk_index: -1,
            is_media_format_final: false,
            media_format: None,
            sample_flags: 0,
            sample_crypto: None,
            id: NEXT_CHUNK_ID.fetch_add(1, Ordering::Relaxed),
            first_sample_index: -1,
            bytes_loaded: Arc::new(AtomicI64::new(0)),
            cancel: Arc::new(CancelFlag::default()),
            source: Some(source),
            output: None,
            collected: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Declares the final elementary format this chunk's samples carry.
    pub fn with_media_format(mut self, media_format: MediaFormat) -> Chunk {
        self.media_format = Some(media_format);
        self.is_media_format_final = true;
        self
    }

    pub fn with_sample_flags(mut self, flags: u32) -> Chunk {
        self.sample_flags = flags;
        self
    }

    pub fn with_sample_crypto(mut self, crypto: SampleCrypto) -> Chunk {
        self.sample_flags |= sample_flags::ENCRYPTED;
        self.sample_crypto = Some(crypto);
        self
    }

    /// The number of bytes loaded so far; monotone non-decreasing across retries.
    pub fn bytes_loaded(&self) -> i64 {
        self.bytes_loaded.load(Ordering::SeqCst)
    }

    pub fn is_media(&self) -> bool {
        self.kind.is_media()
    }

    pub fn next_chunk_index(&self) -> i64 {
        self.chunk_index + 1
    }

    pub fn prev_chunk_index(&self) -> i64 {
        self.chunk_index - 1
    }

    /// The index of the first sample in the bound output originating from this chunk. Only
    /// valid once the chunk has been initialized for loading.
    pub fn first_sample_index(&self) -> i32 {
        self.first_sample_index
    }

    /// The loaded payload of a non-media chunk (manifest, DRM or initialization data).
    pub fn collected_data(&self) -> Vec<u8> {
        self.collected.lock().clone()
    }

    /// Whether `other` describes the same load as this chunk. Replaces the pointer-identity
    /// comparison players traditionally use: two chunks are the same load when they address
    /// the same data for the same format.
    pub fn same_load(&self, other: &Chunk) -> bool {
        self.kind == other.kind
            && self.chunk_index == other.chunk_index
            && self.data_spec == other.data_spec
            && self.format == other.format
    }

    /// Binds the chunk to the output that will receive its samples, recording where its
    /// samples will begin.
    pub(crate) fn init(&mut self, output: Arc<DefaultTrackOutput>) {
        self.first_sample_index = output.write_index();
        self.output = Some(output);
    }

    /// Extracts the loadable part of the chunk. Panics if called twice while a load is still
    /// owning the transport: that is a caller state machine bug.
    pub(crate) fn take_load_task(&mut self) -> ChunkLoadTask {
        let source = self.source.take().expect("chunk is already being loaded");
        let sink = match self.kind {
            ChunkKind::Media => LoadSink::Samples {
                output: self.output.clone().expect("media chunk loaded before init()"),
                time_us: self.start_time_us,
                duration_us: self.end_time_us - self.start_time_us,
                flags: self.sample_flags,
                crypto: self.sample_crypto.clone(),
                media_format: self.media_format.clone(),
            },
            _ => LoadSink::Collect(self.collected.clone()),
        };
        ChunkLoadTask {
            chunk_id: self.id,
            kind: self.kind,
            data_spec: self.data_spec.clone(),
            sink,
            source: Some(source),
            cancel: self.cancel.clone(),
            bytes_loaded: self.bytes_loaded.clone(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("kind", &self.kind)
            .field("trigger", &self.trigger)
            .field("uri", &self.data_spec.uri.as_str())
            .field("chunk_index", &self.chunk_index)
            .field("start_time_us", &self.start_time_us)
            .field("end_time_us", &self.end_time_us)
            .field("bytes_loaded", &self.bytes_loaded())
            .finish()
    }
}

enum LoadSink {
    Samples {
        output: Arc<DefaultTrackOutput>,
        time_us: i64,
        duration_us: i64,
        flags: u32,
        crypto: Option<SampleCrypto>,
        media_format: Option<MediaFormat>,
    },
    Collect(Arc<Mutex<Vec<u8>>>),
}

const READ_GRANULARITY: usize = 16 * 1024;

/// The loadable half of a [`Chunk`]: owns the transport while the load runs on the loader
/// thread, and shares the cancel flag and byte counter with the chunk it was taken from.
pub struct ChunkLoadTask {
    chunk_id: u64,
    kind: ChunkKind,
    data_spec: DataSpec,
    sink: LoadSink,
    source: Option<Box<dyn DataSource>>,
    cancel: Arc<CancelFlag>,
    bytes_loaded: Arc<AtomicI64>,
}

impl ChunkLoadTask {
    pub(crate) fn chunk_id(&self) -> u64 {
        self.chunk_id
    }

    pub(crate) fn kind(&self) -> ChunkKind {
        self.kind
    }

    pub(crate) fn bytes_loaded(&self) -> i64 {
        self.bytes_loaded.load(Ordering::SeqCst)
    }

    fn run(&mut self, source: &mut dyn DataSource) -> Result<(), DashPlayerError> {
        // Resume where an interrupted attempt left off rather than re-fetching (and
        // re-appending) bytes already delivered to the sink.
        let already_loaded = self.bytes_loaded.load(Ordering::SeqCst);
        let spec = self.data_spec.remainder(already_loaded);
        source.open(&spec)?;
        loop {
            if self.cancel.is_set() {
                return Err(DashPlayerError::Canceled);
            }
            let appended = match &self.sink {
                LoadSink::Samples { output, .. } => {
                    output.write_sample_data_from_source(source, READ_GRANULARITY)?
                }
                LoadSink::Collect(collected) => {
                    let mut buf = [0u8; READ_GRANULARITY];
                    let n = source.read(&mut buf)?;
                    collected.lock().extend_from_slice(&buf[..n]);
                    n
                }
            };
            if appended == 0 {
                break;
            }
            self.bytes_loaded.fetch_add(appended as i64, Ordering::SeqCst);
        }

        let total = self.bytes_loaded.load(Ordering::SeqCst);
        if self.data_spec.length != LENGTH_UNBOUNDED && total != self.data_spec.length {
            return Err(DashPlayerError::ProtocolViolation(format!(
                "loaded {total} bytes where the data spec promised {}",
                self.data_spec.length
            )));
        }

        if let LoadSink::Samples { output, time_us, duration_us, flags, crypto, media_format } =
            &self.sink
        {
            if let Some(media_format) = media_format {
                output.give_format(media_format.clone());
            }
            output.write_sample_metadata(
                *time_us,
                *duration_us,
                *flags,
                total as usize,
                0,
                crypto.clone(),
            );
        }
        Ok(())
    }
}

impl Loadable for ChunkLoadTask {
    fn cancel_flag(&self) -> Arc<CancelFlag> {
        self.cancel.clone()
    }

    fn load(&mut self) -> Result<(), DashPlayerError> {
        let mut source = self.source.take().expect("load task reused while running");
        let result = self.run(source.as_mut());
        let _ = source.close();
        self.source = Some(source);
        result
    }
}
