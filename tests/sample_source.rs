// End-to-end tests for the chunk sample source driving a DashChunkSource over an in-memory
// transport.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dash_player::chunk::evaluator::AdaptiveEvaluator;
use dash_player::chunk::{
    ChunkSampleSource, ChunkSampleSourceEventListener, ReadResult, SourceState, TrackCriteria,
};
use dash_player::dash::DashChunkSource;
use dash_player::extractor::SampleHolder;
use dash_player::mpd::{parse, AdaptationType};
use dash_player::upstream::{
    Allocator, BandwidthMeter, BufferDataSource, DataSource, NO_ESTIMATE,
};
use dash_player::{Format, LoadControl, MediaFormat, PlaybackRate};
use parking_lot::Mutex;

const MPD_URL: &str = "http://example.com/content/test.mpd";

// Run with RUST_LOG=dash_player=trace to watch the pipeline decisions while debugging.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

struct StubMeter;

impl BandwidthMeter for StubMeter {
    fn bitrate_estimate(&self) -> i64 {
        NO_ESTIMATE
    }
}

#[derive(Default)]
struct RecordingListener {
    events: Arc<Mutex<Vec<String>>>,
}

impl ChunkSampleSourceEventListener for RecordingListener {
    fn on_load_started(
        &self,
        _source_id: i32,
        _length: i64,
        chunk_type: i32,
        _trigger: i32,
        _format: Option<&Format>,
        _media_start_ms: i64,
        _media_end_ms: i64,
    ) {
        self.events.lock().push(format!("started:{chunk_type}"));
    }

    fn on_load_completed(
        &self,
        _source_id: i32,
        _bytes_loaded: i64,
        chunk_type: i32,
        _trigger: i32,
        _format: Option<&Format>,
        _media_start_ms: i64,
        _media_end_ms: i64,
        _load_duration: Duration,
    ) {
        self.events.lock().push(format!("completed:{chunk_type}"));
    }

    fn on_load_error(&self, _source_id: i32, _error: &dash_player::DashPlayerError) {
        self.events.lock().push("error".to_string());
    }

    fn on_downstream_format_changed(
        &self,
        _source_id: i32,
        format: &Format,
        _trigger: i32,
        _position_ms: i64,
    ) {
        self.events.lock().push(format!("format:{}", format.id));
    }
}

const MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD mediaPresentationDuration="PT8S">
  <Period>
    <AdaptationSet contentType="video" mimeType="video/mp4">
      <SegmentTemplate media="seg-$Number$.m4s" initialization="init-$RepresentationID$.mp4"
                       duration="2" timescale="1" startNumber="1"/>
      <Representation id="v1" bandwidth="1200000" width="1280" height="720"/>
      <Representation id="v2" bandwidth="400000" width="640" height="360"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

fn segment_bytes(number: u8) -> Vec<u8> {
    (0..40 + number as usize).map(|i| number.wrapping_mul(31).wrapping_add(i as u8)).collect()
}

fn transport_with_media() -> BufferDataSource {
    let mut transport = BufferDataSource::new();
    transport.insert("http://example.com/content/init-v1.mp4", b"init-data-v1".to_vec());
    for number in 1..=4u8 {
        transport
            .insert(format!("http://example.com/content/seg-{number}.m4s"), segment_bytes(number));
    }
    transport
}

fn build_source(
    transport: BufferDataSource,
    listener: RecordingListener,
) -> (ChunkSampleSource, Arc<Mutex<Vec<String>>>) {
    let mpd = Arc::new(parse(MPD_URL, MANIFEST).unwrap());
    let playback_rate = Arc::new(PlaybackRate::default());
    let chunk_source = DashChunkSource::new(
        mpd,
        AdaptationType::Video,
        Arc::new(move || Box::new(transport.clone()) as Box<dyn DataSource>),
        Box::new(AdaptiveEvaluator::new(Arc::new(StubMeter))),
        playback_rate.clone(),
    );
    let load_control = Arc::new(LoadControl::new(Arc::new(Allocator::new(64 * 1024))));
    let events = listener.events.clone();
    let source = ChunkSampleSource::new(
        Box::new(chunk_source),
        load_control,
        playback_rate,
        10 * 64 * 1024,
        Some(Box::new(listener)),
        0,
        3,
    );
    (source, events)
}

// Disables the source and drives loader events until teardown completes (a canceled in-flight
// load is observed asynchronously).
fn disable_and_wait(source: &mut ChunkSampleSource) {
    source.disable(None);
    let deadline = Instant::now() + Duration::from_secs(5);
    while source.state() == SourceState::Disabling {
        assert!(Instant::now() < deadline, "disable never completed");
        source.handle_loader_events();
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(source.state(), SourceState::Prepared);
}

fn pump_until(source: &mut ChunkSampleSource, position_us: i64, mut done: impl FnMut(bool) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let have_data = source.continue_buffering(position_us);
        if done(have_data) {
            return;
        }
        assert!(Instant::now() < deadline, "pipeline made no progress");
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_plays_presentation_to_end_of_stream() {
    init_logging();
    let (mut source, events) = build_source(transport_with_media(), RecordingListener::default());

    source.register();
    assert!(source.prepare());
    assert_eq!(source.duration_us(), 8_000_000);
    source.enable(&TrackCriteria::of_type(AdaptationType::Video), 0);
    assert_eq!(source.state(), SourceState::Enabled);

    pump_until(&mut source, 0, |have_data| have_data);

    let mut format_holder: Option<MediaFormat> = None;
    let mut sample_holder = SampleHolder::default();

    // The first successful read reports the downstream media format, carrying the loaded
    // initialization data.
    let mut read = source.read_data(0, &mut format_holder, &mut sample_holder);
    while read == ReadResult::NothingRead {
        pump_until(&mut source, 0, |have_data| have_data);
        read = source.read_data(0, &mut format_holder, &mut sample_holder);
    }
    assert_eq!(read, ReadResult::FormatRead);
    let media_format = format_holder.take().unwrap();
    assert_eq!(media_format.track_id, "v1");
    assert_eq!(media_format.mime_type, "video/mp4");
    assert_eq!(media_format.initialization_data, vec![b"init-data-v1".to_vec()]);

    // All four segments come out as sync samples, in order, with their exact bytes.
    let mut samples = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        match source.read_data(0, &mut format_holder, &mut sample_holder) {
            ReadResult::SampleRead => {
                assert!(sample_holder.is_sync_frame());
                samples.push((sample_holder.time_us, sample_holder.data.clone()));
            }
            ReadResult::EndOfStream => break,
            ReadResult::FormatRead => {}
            ReadResult::NothingRead => {
                source.continue_buffering(0);
                std::thread::sleep(Duration::from_millis(2));
            }
        }
        assert!(Instant::now() < deadline, "did not reach end of stream");
    }
    assert_eq!(samples.len(), 4);
    for (i, (time_us, data)) in samples.iter().enumerate() {
        assert_eq!(*time_us, i as i64 * 2_000_000);
        assert_eq!(*data, segment_bytes(i as u8 + 1));
    }
    assert_eq!(source.buffered_position_us(), dash_player::END_OF_TRACK_US);

    {
        let events = events.lock();
        // Initialization segment first, then media; every started load completed.
        assert_eq!(events[0], "started:2");
        assert_eq!(events[1], "completed:2");
        assert!(events.contains(&"format:v1".to_string()));
        let started = events.iter().filter(|e| *e == "started:1").count();
        let completed = events.iter().filter(|e| *e == "completed:1").count();
        assert_eq!(started, 4);
        assert_eq!(completed, 4);
    }

    disable_and_wait(&mut source);
    source.release();
    assert_eq!(source.state(), SourceState::Idle);
}

#[test]
fn test_seek_restarts_and_reports_discontinuity() {
    init_logging();
    let (mut source, _events) = build_source(transport_with_media(), RecordingListener::default());

    source.register();
    assert!(source.prepare());
    source.enable(&TrackCriteria::of_type(AdaptationType::Video), 0);

    // Drain the whole stream first so the seek target is no longer buffered.
    let mut format_holder: Option<MediaFormat> = None;
    let mut sample_holder = SampleHolder::default();
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut samples_read = 0;
    while samples_read < 4 {
        source.continue_buffering(0);
        match source.read_data(0, &mut format_holder, &mut sample_holder) {
            ReadResult::SampleRead => samples_read += 1,
            ReadResult::NothingRead => std::thread::sleep(Duration::from_millis(2)),
            _ => {}
        }
        assert!(Instant::now() < deadline);
    }

    assert!(source.read_discontinuity().is_none());
    source.seek_to_us(3_000_000);
    assert_eq!(source.read_discontinuity(), Some(3_000_000));
    assert!(source.read_discontinuity().is_none());

    // Loading resumes from the segment containing the seek position.
    pump_until(&mut source, 3_000_000, |have_data| have_data);
    let mut read = source.read_data(3_000_000, &mut format_holder, &mut sample_holder);
    let deadline = Instant::now() + Duration::from_secs(10);
    while read != ReadResult::SampleRead {
        assert!(Instant::now() < deadline);
        source.continue_buffering(3_000_000);
        std::thread::sleep(Duration::from_millis(2));
        read = source.read_data(3_000_000, &mut format_holder, &mut sample_holder);
    }
    // The segment starts at 2s, before the 3s seek target, so the sample is decode-only.
    assert_eq!(sample_holder.time_us, 2_000_000);
    assert!(sample_holder.is_decode_only());
    assert_eq!(sample_holder.data, segment_bytes(2));

    disable_and_wait(&mut source);
    source.release();
}

#[test]
fn test_load_errors_back_off_and_report() {
    init_logging();
    // A transport with no resources at all: every open fails with a 404.
    let (mut source, events) =
        build_source(BufferDataSource::new(), RecordingListener::default());

    source.register();
    assert!(source.prepare());
    source.enable(&TrackCriteria::of_type(AdaptationType::Video), 0);

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        source.continue_buffering(0);
        // Retries are capped; once the error count exceeds the retry budget the source
        // reports that buffering cannot proceed.
        if !source.can_continue_buffering() {
            break;
        }
        assert!(Instant::now() < deadline, "source never exhausted its retries");
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(events.lock().iter().any(|e| e == "error"));

    disable_and_wait(&mut source);
    source.release();
}

// A custom chunk source issuing a single manifest chunk: exercises the non-media load path
// (collected payload, -1 media times in events) and the end-of-stream handoff.
struct ManifestOnlySource {
    manifest_loaded: Arc<Mutex<Option<Vec<u8>>>>,
}

impl dash_player::chunk::ChunkSource for ManifestOnlySource {
    fn prepare(&mut self) -> bool {
        true
    }

    fn duration_us(&self) -> i64 {
        dash_player::UNKNOWN_TIME_US
    }

    fn content_type(&self) -> &'static str {
        "video"
    }

    fn enable(&mut self, _criteria: &TrackCriteria) {}

    fn continue_buffering(&mut self, _playback_position_us: i64) {}

    fn get_chunk_operation(
        &mut self,
        _queue: &std::collections::VecDeque<Box<dash_player::chunk::Chunk>>,
        _playback_position_us: i64,
        out: &mut dash_player::chunk::ChunkOperationHolder,
    ) {
        if self.manifest_loaded.lock().is_some() {
            out.set_end_of_stream(true);
            out.clear_chunk();
            return;
        }
        if out.chunk().is_some() {
            return;
        }
        let url = url::Url::parse("http://example.com/content/refreshed.mpd").unwrap();
        let transport =
            BufferDataSource::with_resource(url.as_str(), b"<MPD refreshed/>".to_vec());
        out.set_chunk(Box::new(dash_player::chunk::Chunk::manifest(
            Box::new(transport),
            dash_player::upstream::DataSpec::new(url),
            dash_player::chunk::Trigger::Manual,
        )));
    }

    fn on_chunk_load_completed(&mut self, chunk: &dash_player::chunk::Chunk) {
        *self.manifest_loaded.lock() = Some(chunk.collected_data());
    }

    fn on_chunk_load_error(
        &mut self,
        _chunk: Option<&dash_player::chunk::Chunk>,
        _error: &dash_player::DashPlayerError,
    ) {
    }

    fn disable(&mut self, _queue: &std::collections::VecDeque<Box<dash_player::chunk::Chunk>>) {}
}

#[test]
fn test_manifest_chunk_loads_through_source() {
    init_logging();
    let manifest_loaded = Arc::new(Mutex::new(None));
    let listener = RecordingListener::default();
    let events = listener.events.clone();

    let load_control = Arc::new(LoadControl::new(Arc::new(Allocator::new(64 * 1024))));
    let mut source = ChunkSampleSource::new(
        Box::new(ManifestOnlySource { manifest_loaded: manifest_loaded.clone() }),
        load_control,
        Arc::new(PlaybackRate::default()),
        64 * 1024,
        Some(Box::new(listener)),
        7,
        3,
    );
    source.register();
    assert!(source.prepare());
    source.enable(&TrackCriteria::of_type(AdaptationType::Video), 0);

    pump_until(&mut source, 0, |have_data| have_data);
    assert_eq!(
        manifest_loaded.lock().as_deref(),
        Some(b"<MPD refreshed/>".as_slice())
    );

    // No media chunk ever started, so the enable-time reset is still pending and reads stay
    // at NothingRead even though loading has finished.
    let mut format_holder: Option<MediaFormat> = None;
    let mut sample_holder = SampleHolder::default();
    assert_eq!(
        source.read_data(0, &mut format_holder, &mut sample_holder),
        ReadResult::NothingRead
    );
    {
        let events = events.lock();
        assert!(events.contains(&"started:4".to_string()));
        assert!(events.contains(&"completed:4".to_string()));
    }

    disable_and_wait(&mut source);
    source.release();
}
