//! An MPD-aware [`ChunkSource`]: walks the manifest's periods and segment indices, asks the
//! format evaluator which representation to load, and manufactures the corresponding chunks.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::chunk::evaluator::{FormatEvaluation, FormatEvaluator};
use crate::chunk::{Chunk, ChunkKind, ChunkOperationHolder, ChunkSource, TrackCriteria, Trigger};
use crate::extractor::SampleCrypto;
use crate::format::MediaFormat;
use crate::mpd::{
    AdaptationType, MediaPresentationDescription, Period, RangedUri, Representation,
};
use crate::playback_rate::PlaybackRate;
use crate::upstream::{DataSourceFactory, DataSpec};
use crate::{us_to_ms, DashPlayerError, UNKNOWN_TIME_US};

enum NextSegment {
    /// Derive the segment from the playback position (the queue is empty).
    FromPosition,
    /// The first segment of the target period (we just rolled over into it).
    First,
    Exact(i64),
}

struct NextTarget {
    period_index: usize,
    segment: NextSegment,
}

/// Provides [`Chunk`]s for one adaptation type of a DASH presentation.
pub struct DashChunkSource {
    mpd: Arc<MediaPresentationDescription>,
    adaptation_type: AdaptationType,
    data_source_factory: Arc<dyn DataSourceFactory>,
    evaluator: Box<dyn FormatEvaluator>,
    playback_rate: Arc<PlaybackRate>,
    criteria: Option<TrackCriteria>,
    evaluation: FormatEvaluation,
    /// Loaded initialization blobs, keyed by representation cache key. Survives disable so a
    /// re-enabled source does not re-fetch init segments.
    initialization_data: HashMap<String, Arc<Vec<u8>>>,
}

impl DashChunkSource {
    pub fn new(
        mpd: Arc<MediaPresentationDescription>,
        adaptation_type: AdaptationType,
        data_source_factory: Arc<dyn DataSourceFactory>,
        evaluator: Box<dyn FormatEvaluator>,
        playback_rate: Arc<PlaybackRate>,
    ) -> DashChunkSource {
        DashChunkSource {
            mpd,
            adaptation_type,
            data_source_factory,
            evaluator,
            playback_rate,
            criteria: None,
            evaluation: FormatEvaluation::default(),
            initialization_data: HashMap::new(),
        }
    }

    fn period_start_us(&self, period_index: usize) -> i64 {
        self.mpd.periods[period_index].start_ms * 1000
    }

    /// The adaptation set this source draws from within `period`, honoring the language
    /// preference when several sets of the type exist.
    fn adaptation_set_index(&self, period: &Period) -> Option<usize> {
        let mut fallback = None;
        for (i, set) in period.adaptation_sets.iter().enumerate() {
            if set.adaptation_type != self.adaptation_type {
                continue;
            }
            fallback.get_or_insert(i);
            if let Some(language) = self.criteria.as_ref().and_then(|c| c.language.as_deref()) {
                if set.representations.iter().any(|r| r.format.language == language) {
                    return Some(i);
                }
            } else {
                return Some(i);
            }
        }
        fallback
    }

    /// Works out which (period, segment) the next media chunk should deliver, following the
    /// last of the `retained` leading queue entries (chunks past that point are about to be
    /// discarded). Returns `None` when the presentation is exhausted.
    fn next_target(
        &self,
        queue: &VecDeque<Box<Chunk>>,
        retained: usize,
        playback_position_us: i64,
    ) -> Option<NextTarget> {
        let last = if retained == 0 { None } else { queue.get(retained - 1) };
        let last = match last {
            None => {
                let period_index =
                    self.mpd.period_index_for_time_ms(us_to_ms(playback_position_us));
                return Some(NextTarget { period_index, segment: NextSegment::FromPosition });
            }
            Some(last) => last,
        };
        let period_index = last.parent_id as usize;
        let period = &self.mpd.periods[period_index];
        let set_index = period
            .adaptation_sets
            .iter()
            .position(|s| s.adaptation_type == self.adaptation_type)?;
        let last_format = last.format.as_ref()?;
        let representation = period.adaptation_sets[set_index]
            .representations
            .iter()
            .find(|r| r.format.id == last_format.id)?;
        let index = representation.index()?;
        let period_duration_us = self.mpd.period_duration_us(period_index);
        let next_segment_num = last.next_chunk_index();
        if next_segment_num <= index.last_segment_num(period_duration_us) {
            return Some(NextTarget {
                period_index,
                segment: NextSegment::Exact(next_segment_num),
            });
        }
        // The period is exhausted; move to the next one, or signal end of stream.
        if period_index + 1 < self.mpd.period_count() {
            Some(NextTarget { period_index: period_index + 1, segment: NextSegment::First })
        } else {
            None
        }
    }

    fn build_media_chunk(
        &self,
        representation: &Representation,
        encrypted_key_id: Option<String>,
        target: &NextTarget,
        playback_position_us: i64,
        trigger: Trigger,
    ) -> Option<Chunk> {
        let period_index = target.period_index;
        let period_start_us = self.period_start_us(period_index);
        let period_duration_us = self.mpd.period_duration_us(period_index);
        let Some(index) = representation.index() else {
            // An externally indexed single segment (indexRange). We cannot consult the index
            // without a container parser, so deliver the resource as one segment.
            warn!(
                "representation {} uses an external segment index; treating it as one segment",
                representation.format.id
            );
            return self.single_segment_fallback(
                representation,
                encrypted_key_id,
                period_index,
                period_duration_us,
                trigger,
            );
        };

        let first = index.first_segment_num();
        let last = index.last_segment_num(period_duration_us);
        if last < first {
            return None;
        }
        let segment_num = match target.segment {
            NextSegment::FromPosition => {
                let local = (playback_position_us - period_start_us).max(0);
                index.segment_num_for(local, period_duration_us)
            }
            NextSegment::First => first,
            NextSegment::Exact(n) => n,
        }
        .clamp(first, last);

        let url = index.segment_url(segment_num)?;
        let data_spec =
            DataSpec::from_ranged_uri(&url, Some(representation.cache_key.clone()));
        let start_time_us = period_start_us + index.time_us(segment_num);
        let end_time_us = start_time_us + index.duration_us(segment_num, period_duration_us);
        Some(self.finish_media_chunk(
            representation,
            encrypted_key_id,
            data_spec,
            start_time_us,
            end_time_us,
            segment_num,
            period_index,
            trigger,
        ))
    }

    fn single_segment_fallback(
        &self,
        representation: &Representation,
        encrypted_key_id: Option<String>,
        period_index: usize,
        period_duration_us: i64,
        trigger: Trigger,
    ) -> Option<Chunk> {
        let uri = match &representation.segment_base {
            crate::mpd::SegmentBase::Single(single) => {
                RangedUri::new(single.uri.clone(), 0, single.content_length)
            }
            _ => return None,
        };
        let period_start_us = self.period_start_us(period_index);
        let end_time_us = if period_duration_us == UNKNOWN_TIME_US {
            UNKNOWN_TIME_US
        } else {
            period_start_us + period_duration_us
        };
        Some(self.finish_media_chunk(
            representation,
            encrypted_key_id,
            DataSpec::from_ranged_uri(&uri, Some(representation.cache_key.clone())),
            period_start_us,
            end_time_us,
            0,
            period_index,
            trigger,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_media_chunk(
        &self,
        representation: &Representation,
        encrypted_key_id: Option<String>,
        data_spec: DataSpec,
        start_time_us: i64,
        end_time_us: i64,
        segment_num: i64,
        period_index: usize,
        trigger: Trigger,
    ) -> Chunk {
        let mut chunk = Chunk::media(
            self.data_source_factory.create(),
            data_spec,
            trigger,
            representation.format.clone(),
            start_time_us,
            end_time_us,
            segment_num,
            period_index as i32,
        );
        let needs_init = representation.initialization_uri().is_some();
        let init_blob = self.initialization_data.get(&representation.cache_key);
        if !needs_init || init_blob.is_some() {
            let mut media_format =
                MediaFormat::from_format(&representation.format, self.mpd.duration_us());
            if let Some(blob) = init_blob {
                media_format.initialization_data.push(blob.as_ref().clone());
            }
            chunk = chunk.with_media_format(media_format);
        }
        if let Some(key_id) = encrypted_key_id {
            chunk = chunk.with_sample_crypto(SampleCrypto {
                key_id,
                iv: Vec::new(),
                num_bytes_clear: Vec::new(),
                num_bytes_encrypted: Vec::new(),
            });
        }
        chunk
    }
}

impl ChunkSource for DashChunkSource {
    fn prepare(&mut self) -> bool {
        true
    }

    fn duration_us(&self) -> i64 {
        self.mpd.duration_us()
    }

    fn content_type(&self) -> &'static str {
        self.adaptation_type.content_type()
    }

    fn enable(&mut self, criteria: &TrackCriteria) {
        debug_assert_eq!(criteria.adaptation_type, self.adaptation_type);
        self.criteria = Some(criteria.clone());
        self.evaluator.enable();
    }

    fn continue_buffering(&mut self, _playback_position_us: i64) {
        // Manifest refresh for dynamic presentations is driven by the player shell; nothing to
        // do per buffering tick here.
    }

    fn get_chunk_operation(
        &mut self,
        queue: &VecDeque<Box<Chunk>>,
        playback_position_us: i64,
        out: &mut ChunkOperationHolder,
    ) {
        if self.criteria.is_none() {
            return;
        }
        let Some(pre_target) = self.next_target(queue, queue.len(), playback_position_us) else {
            if !self.mpd.dynamic {
                out.set_end_of_stream(true);
            }
            out.clear_chunk();
            return;
        };
        let period = &self.mpd.periods[pre_target.period_index];
        let Some(set_index) = self.adaptation_set_index(period) else {
            out.clear_chunk();
            return;
        };
        let formats: Vec<_> = period.adaptation_sets[set_index]
            .representations
            .iter()
            .map(|r| r.format.clone())
            .collect();
        if formats.is_empty() {
            out.clear_chunk();
            return;
        }

        self.evaluation.queue_size = queue.len();
        self.evaluator.evaluate(
            queue,
            playback_position_us,
            &formats,
            &mut self.evaluation,
            &self.playback_rate,
        );
        out.set_queue_size(self.evaluation.queue_size);
        let Some(selected) = self.evaluation.format.clone() else {
            out.clear_chunk();
            return;
        };
        let trigger = self.evaluation.trigger.unwrap_or(Trigger::Initial);

        // When the evaluation discards buffered chunks, the next chunk follows the last
        // retained one rather than the end of the queue.
        let target = if self.evaluation.queue_size >= queue.len() {
            pre_target
        } else {
            match self.next_target(queue, self.evaluation.queue_size, playback_position_us) {
                Some(target) => target,
                None => {
                    if !self.mpd.dynamic {
                        out.set_end_of_stream(true);
                    }
                    out.clear_chunk();
                    return;
                }
            }
        };
        let period = &self.mpd.periods[target.period_index];
        let Some(set_index) = self.adaptation_set_index(period) else {
            out.clear_chunk();
            return;
        };
        let adaptation_set = &period.adaptation_sets[set_index];
        let Some(representation) = adaptation_set
            .representations
            .iter()
            .find(|r| r.format.id == selected.id)
        else {
            // The selected format does not exist in the target period (representation ids
            // changed across the boundary); wait for the next tick, which evaluates against
            // the new period's formats.
            out.clear_chunk();
            return;
        };
        let encrypted_key_id = adaptation_set.content_protections.iter().find_map(|p| {
            p.default_key_id
                .clone()
                .or_else(|| p.uuid.clone())
        });

        // An initialization segment must be delivered before the representation's media.
        let needs_init = representation.initialization_uri().is_some()
            && !self.initialization_data.contains_key(&representation.cache_key);
        if needs_init {
            let init_uri = representation.initialization_uri().unwrap();
            let data_spec =
                DataSpec::from_ranged_uri(&init_uri, Some(representation.cache_key.clone()));
            let unchanged = out
                .chunk()
                .map(|held| {
                    held.kind == ChunkKind::Initialization && held.data_spec == data_spec
                })
                .unwrap_or(false);
            if unchanged {
                return;
            }
            trace!("issuing initialization chunk for {}", representation.format.id);
            out.set_chunk(Box::new(Chunk::initialization(
                self.data_source_factory.create(),
                data_spec,
                trigger,
                selected,
                target.period_index as i32,
            )));
            return;
        }

        match self.build_media_chunk(
            representation,
            encrypted_key_id,
            &target,
            playback_position_us,
            trigger,
        ) {
            Some(chunk) => {
                let unchanged = out
                    .chunk()
                    .map(|held| held.same_load(&chunk))
                    .unwrap_or(false);
                if !unchanged {
                    out.set_chunk(Box::new(chunk));
                }
            }
            None => out.clear_chunk(),
        }
    }

    fn on_chunk_load_completed(&mut self, chunk: &Chunk) {
        if chunk.kind == ChunkKind::Initialization {
            if let Some(key) = chunk.data_spec.key.clone() {
                debug!("initialization data loaded for {key}");
                self.initialization_data.insert(key, Arc::new(chunk.collected_data()));
            }
        }
    }

    fn on_chunk_load_error(&mut self, chunk: Option<&Chunk>, error: &DashPlayerError) {
        trace!(
            "chunk load error (index {:?}): {error}",
            chunk.map(|c| c.chunk_index)
        );
    }

    fn disable(&mut self, _queue: &VecDeque<Box<Chunk>>) {
        self.evaluator.disable();
        self.evaluation = FormatEvaluation::default();
        self.criteria = None;
    }
}
