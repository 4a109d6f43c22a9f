//! Format selection during playback: the adaptive policy, and a fixed single-format variant.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::{Chunk, Trigger};
use crate::format::Format;
use crate::playback_rate::PlaybackRate;
use crate::upstream::{BandwidthMeter, NO_ESTIMATE};

/// A format evaluation: the desired media-chunk queue size, the sticky trigger, and the
/// selected format.
#[derive(Debug, Default)]
pub struct FormatEvaluation {
    /// The desired size of the media chunk queue; smaller than the current queue size when
    /// already-buffered chunks should be discarded.
    pub queue_size: usize,
    /// The sticky reason for the format selection: it only changes when the selected
    /// representation changes.
    pub trigger: Option<Trigger>,
    /// The selected format; `None` before the first evaluation.
    pub format: Option<Format>,
}

impl FormatEvaluation {
    pub fn trigger_code(&self) -> i32 {
        self.trigger.unwrap_or(Trigger::Initial).code()
    }
}

/// Selects from a number of available formats during playback.
///
/// When invoked, the evaluation holds the currently selected format (`None` for the first
/// evaluation), the most recent trigger, and the current queue size; implementations update
/// these fields as necessary.
pub trait FormatEvaluator: Send {
    fn enable(&mut self) {}
    fn disable(&mut self) {}
    fn evaluate(
        &self,
        queue: &VecDeque<Box<Chunk>>,
        playback_position_us: i64,
        formats: &[Format],
        evaluation: &mut FormatEvaluation,
        playback_rate: &PlaybackRate,
    );
}

/// Configuration of the [`AdaptiveEvaluator`].
#[derive(Debug, Clone)]
pub struct AdaptiveConfig {
    /// The maximum bitrate in bits per second assumed while the bandwidth meter cannot provide
    /// an estimate because playback has only just started.
    pub max_initial_bitrate: i64,
    /// The minimum duration of buffered data required to consider switching to a higher
    /// quality format.
    pub min_duration_for_quality_increase: Duration,
    /// The maximum duration of buffered data over which a switch to a lower quality format is
    /// deferred, draining the buffer first.
    pub max_duration_for_quality_decrease: Duration,
    /// When switching to a significantly higher quality format, already-buffered low quality
    /// media may be discarded to reach the higher quality faster; this is the minimum duration
    /// of it that must be retained.
    pub min_duration_to_retain_after_discard: Duration,
    /// The fraction of the available bandwidth considered usable. Below 1 to account both for
    /// estimator inaccuracy and for audio and text consuming part of the link.
    pub bandwidth_fraction: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> AdaptiveConfig {
        AdaptiveConfig {
            max_initial_bitrate: 16_000_000,
            min_duration_for_quality_increase: Duration::from_secs(10),
            max_duration_for_quality_decrease: Duration::from_secs(25),
            min_duration_to_retain_after_discard: Duration::from_secs(15),
            bandwidth_fraction: 0.90,
        }
    }
}

const MIN_HD_HEIGHT: i32 = 720;
const MIN_HD_WIDTH: i32 = 1280;

/// An adaptive evaluator, selecting the representation best matched to the bandwidth estimate
/// while damping oscillation through buffer-health hysteresis.
pub struct AdaptiveEvaluator {
    bandwidth_meter: Arc<dyn BandwidthMeter>,
    config: AdaptiveConfig,
}

impl AdaptiveEvaluator {
    pub fn new(bandwidth_meter: Arc<dyn BandwidthMeter>) -> AdaptiveEvaluator {
        AdaptiveEvaluator::with_config(bandwidth_meter, AdaptiveConfig::default())
    }

    pub fn with_config(
        bandwidth_meter: Arc<dyn BandwidthMeter>,
        config: AdaptiveConfig,
    ) -> AdaptiveEvaluator {
        AdaptiveEvaluator { bandwidth_meter, config }
    }

    pub(crate) fn effective_bitrate(&self, bitrate_estimate: i64) -> i64 {
        if bitrate_estimate == NO_ESTIMATE {
            self.config.max_initial_bitrate
        } else {
            (bitrate_estimate as f64 * self.config.bandwidth_fraction).round() as i64
        }
    }

    /// Finds the ideal format within `formats`, ignoring buffer health.
    pub(crate) fn determine_ideal_format<'a>(
        formats: &'a [Format],
        effective_bitrate: i64,
        playback_rate: &PlaybackRate,
    ) -> &'a Format {
        assert!(!formats.is_empty());

        // Filter the formats by max playout rate first. The survivors all share one playout
        // rate value: the smallest rate still satisfying the current playback rate, or failing
        // that the largest rate available.
        let abs_rate = playback_rate.abs_rate();
        let mut filtered: Vec<&Format> = Vec::with_capacity(formats.len());
        for format in formats {
            let Some(first) = filtered.first() else {
                filtered.push(format);
                continue;
            };
            let filter_rate = first.max_playout_rate as f32;
            let current_rate = format.max_playout_rate as f32;
            if filter_rate == current_rate {
                filtered.push(format);
                continue;
            }
            if filter_rate < abs_rate {
                // What passed the filter so far is too slow for the current playback rate; a
                // faster candidate replaces it even if itself still too slow.
                if current_rate > filter_rate {
                    filtered.clear();
                    filtered.push(format);
                }
                continue;
            }
            if current_rate >= abs_rate && current_rate < filter_rate {
                filtered.clear();
                filtered.push(format);
            }
        }

        // Linear scan for the best bitrate. The formats are not necessarily sorted in the
        // manifest, and with the handful of formats a manifest carries an O(n) scan beats
        // sorting for a binary search.
        let mut best: Option<&Format> = None;
        for format in filtered {
            let better = match best {
                None => true,
                Some(current_best) => {
                    // If no format fits below effective_bitrate, take the lowest available;
                    // otherwise the highest that does not exceed it.
                    (current_best.bitrate > effective_bitrate
                        && format.bitrate < current_best.bitrate)
                        || (format.bitrate <= effective_bitrate
                            && format.bitrate > current_best.bitrate)
                }
            };
            if better {
                best = Some(format);
            }
        }
        best.expect("filtered formats cannot be empty")
    }
}

impl FormatEvaluator for AdaptiveEvaluator {
    fn evaluate(
        &self,
        queue: &VecDeque<Box<Chunk>>,
        playback_position_us: i64,
        formats: &[Format],
        evaluation: &mut FormatEvaluation,
        playback_rate: &PlaybackRate,
    ) {
        let buffered_us = queue
            .back()
            .map(|chunk| chunk.end_time_us - playback_position_us)
            .unwrap_or(0)
            .max(0);
        let buffered = Duration::from_micros(buffered_us as u64);

        let effective_bitrate = self.effective_bitrate(self.bandwidth_meter.bitrate_estimate());
        let mut ideal = Self::determine_ideal_format(formats, effective_bitrate, playback_rate);

        let current = evaluation.format.clone();
        let current = current.as_ref();
        let is_higher = current.map(|c| ideal.bitrate > c.bitrate).unwrap_or(false);
        let is_lower = current.map(|c| ideal.bitrate < c.bitrate).unwrap_or(false);
        if is_higher {
            let current = current.unwrap();
            if buffered < self.config.min_duration_for_quality_increase {
                // The ideal format is a higher quality, but we have insufficient buffer to
                // safely switch up. Defer switching up for now.
                trace!("evaluation: ideal > current, but not enough buffer");
                ideal = current;
            } else if buffered >= self.config.min_duration_to_retain_after_discard {
                // Consider discarding already-buffered media chunks to switch up to the higher
                // resolution faster: discard from the first chunk that is of lower bandwidth,
                // lower resolution and not HD.
                for (i, chunk) in queue.iter().enumerate().skip(1) {
                    let Some(chunk_format) = chunk.format.as_ref() else { continue };
                    let before_this_chunk = Duration::from_micros(
                        (chunk.start_time_us - playback_position_us).max(0) as u64,
                    );
                    if before_this_chunk >= self.config.min_duration_to_retain_after_discard
                        && chunk_format.bitrate < ideal.bitrate
                        && chunk_format.height < ideal.height
                        && chunk_format.height < MIN_HD_HEIGHT
                        && chunk_format.width < MIN_HD_WIDTH
                    {
                        trace!("evaluation: ideal > current, discarding buffer from chunk {i}");
                        evaluation.queue_size = i;
                        break;
                    }
                }
            } else {
                trace!("evaluation: ideal > current");
            }
        } else if is_lower {
            if buffered >= self.config.max_duration_for_quality_decrease {
                // The ideal format is a lower quality, but we have sufficient buffer to defer
                // switching down for now.
                trace!("evaluation: ideal < current but buffer is sufficient");
                ideal = current.unwrap();
            } else {
                trace!("evaluation: ideal < current");
            }
        }

        if evaluation.format.is_some() {
            evaluation.trigger = Some(Trigger::Adaptive);
        } else {
            evaluation.trigger = Some(Trigger::Initial);
        }
        if evaluation.format.as_ref() != Some(ideal) {
            debug!(
                "evaluation changed: old bitrate {}, new bitrate {}",
                evaluation.format.as_ref().map(|f| f.bitrate).unwrap_or(-1),
                ideal.bitrate
            );
            evaluation.format = Some(ideal.clone());
        }
    }
}

/// An evaluator that always selects the first provided format and never discards buffered
/// chunks, for sources with a single representation (or an externally pinned selection).
#[derive(Debug, Default)]
pub struct FixedEvaluator;

impl FormatEvaluator for FixedEvaluator {
    fn evaluate(
        &self,
        _queue: &VecDeque<Box<Chunk>>,
        _playback_position_us: i64,
        formats: &[Format],
        evaluation: &mut FormatEvaluation,
        _playback_rate: &PlaybackRate,
    ) {
        assert!(!formats.is_empty());
        if evaluation.format.is_some() {
            evaluation.trigger = Some(Trigger::Adaptive);
        } else {
            evaluation.trigger = Some(Trigger::Initial);
        }
        if evaluation.format.as_ref() != Some(&formats[0]) {
            evaluation.format = Some(formats[0].clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Trigger;
    use crate::upstream::{BufferDataSource, DataSpec};
    use url::Url;

    struct StubMeter(i64);

    impl BandwidthMeter for StubMeter {
        fn bitrate_estimate(&self) -> i64 {
            self.0
        }
    }

    fn format(id: &str, width: i32, height: i32, max_playout_rate: i32, bitrate: i64) -> Format {
        Format {
            id: id.to_string(),
            mime_type: "video/x-any".to_string(),
            width,
            height,
            max_playout_rate,
            bitrate,
            ..Format::default()
        }
    }

    fn media_chunk(format: &Format, start_time_us: i64, end_time_us: i64, index: i64) -> Box<Chunk> {
        let uri = Url::parse("http://example.com/chunk").unwrap();
        Box::new(Chunk::media(
            Box::new(BufferDataSource::new()),
            DataSpec::new(uri),
            Trigger::Unspecified,
            format.clone(),
            start_time_us,
            end_time_us,
            index,
            -1,
        ))
    }

    fn evaluator_with(estimate: i64, fraction: f64) -> AdaptiveEvaluator {
        AdaptiveEvaluator::with_config(
            Arc::new(StubMeter(estimate)),
            AdaptiveConfig {
                max_initial_bitrate: 8_000_000,
                min_duration_for_quality_increase: Duration::from_secs(10),
                max_duration_for_quality_decrease: Duration::from_secs(25),
                min_duration_to_retain_after_discard: Duration::from_secs(25),
                bandwidth_fraction: fraction,
            },
        )
    }

    #[test]
    fn test_effective_bitrate() {
        let full = evaluator_with(0, 1.0);
        assert_eq!(full.effective_bitrate(NO_ESTIMATE), 8_000_000);
        let mut i: i64 = 0;
        while i < 1_500_000_000 {
            let effective = full.effective_bitrate(i);
            assert!((effective - i).abs() <= 150);
            i += 876_543;
        }

        let three_quarters = evaluator_with(0, 0.75);
        assert_eq!(three_quarters.effective_bitrate(NO_ESTIMATE), 8_000_000);
        let mut i: i64 = 0;
        while i < 1_500_000_000 {
            let effective = three_quarters.effective_bitrate(i);
            let target = (i * 3) / 4;
            assert!((effective - target).abs() <= 150);
            i += 975_319;
        }
    }

    #[test]
    fn test_determine_ideal_format() {
        let formats = [
            format("1", -1, -1, 1, 5000),
            format("2", -1, -1, 1, 400),
            format("3", -1, -1, 1, 30),
            format("4", -1, -1, 1, 29),
            format("5", -1, -1, 1, 28),
            format("6", -1, -1, 1, 5),
        ];
        let rate = PlaybackRate::default();
        let ideal = |bitrate: i64| {
            AdaptiveEvaluator::determine_ideal_format(&formats, bitrate, &rate).id.clone()
        };
        assert_eq!(ideal(10000), "1");
        assert_eq!(ideal(5000), "1");
        assert_eq!(ideal(4999), "2");
        assert_eq!(ideal(400), "2");
        assert_eq!(ideal(399), "3");
        assert_eq!(ideal(29), "4");
        assert_eq!(ideal(28), "5");
        assert_eq!(ideal(27), "6");
        assert_eq!(ideal(0), "6");
        assert_eq!(ideal(-1), "6");
    }

    #[test]
    fn test_playout_rate_filter() {
        let formats = [
            format("1_low", 1280, 720, 1, 5000),
            format("1_hi", 1920, 1080, 1, 20000),
            format("8_hi", 1920, 1080, 8, 20000),
            format("8_low", 1280, 720, 8, 5000),
            format("16_hi", 1920, 1080, 16, 20000),
        ];
        let rate = PlaybackRate::default();
        assert_eq!(
            AdaptiveEvaluator::determine_ideal_format(&formats, 1_000_000, &rate).id,
            "1_hi"
        );
        rate.set_rate(8.0);
        assert_eq!(
            AdaptiveEvaluator::determine_ideal_format(&formats, 1_000_000, &rate).id,
            "8_hi"
        );
        rate.set_rate(-8.0);
        assert_eq!(
            AdaptiveEvaluator::determine_ideal_format(&formats, 1_000_000, &rate).id,
            "8_hi"
        );
        rate.set_rate(32.0);
        assert_eq!(
            AdaptiveEvaluator::determine_ideal_format(&formats, 1_000_000, &rate).id,
            "16_hi"
        );
    }

    #[test]
    fn test_trigger_becomes_adaptive_and_is_idempotent() {
        let sd_mid = format("sd_mid", 640, 480, 1, 28);
        let formats = [sd_mid.clone()];
        let evaluator = evaluator_with(28, 0.75);
        // 0.75 * 28 rounds to 21, below every format, so the lowest is selected anyway.
        let queue = VecDeque::new();
        let rate = PlaybackRate::default();
        let mut evaluation = FormatEvaluation::default();

        evaluator.evaluate(&queue, 1_000_000, &formats, &mut evaluation, &rate);
        assert_eq!(evaluation.format.as_ref().unwrap().id, "sd_mid");
        assert_eq!(evaluation.trigger, Some(Trigger::Initial));
        assert_eq!(evaluation.queue_size, 0);

        evaluator.evaluate(&queue, 1_000_000, &formats, &mut evaluation, &rate);
        assert_eq!(evaluation.format.as_ref().unwrap().id, "sd_mid");
        assert_eq!(evaluation.trigger, Some(Trigger::Adaptive));
        assert_eq!(evaluation.queue_size, 0);
    }

    // 30s of buffered SD video, playing at t=1s with chunks from t=3s in 2s pieces; bandwidth
    // jumps to the HD bitrate. The first 12 SD chunks (up to the 25s retain threshold) stay,
    // the rest are discarded.
    #[test]
    fn test_switch_up_with_discard() {
        let sd_mid = format("sd_mid", 640, 480, 1, 28);
        let hd_high = format("hd_high", 1920, 1080, 1, 5000);
        let formats = [hd_high.clone(), sd_mid.clone()];

        let mut queue = VecDeque::new();
        let mut start = 3_000_000i64;
        for i in 0..15 {
            queue.push_back(media_chunk(&sd_mid, start, start + 2_000_000, 42 + i));
            start += 2_000_000;
        }

        // bandwidth_fraction 1.0 keeps the arithmetic exact.
        let evaluator = evaluator_with(hd_high.bitrate, 1.0);
        let rate = PlaybackRate::default();
        let mut evaluation = FormatEvaluation {
            queue_size: queue.len(),
            trigger: Some(Trigger::Initial),
            format: Some(sd_mid.clone()),
        };
        evaluator.evaluate(&queue, 1_000_000, &formats, &mut evaluation, &rate);
        assert_eq!(evaluation.format.as_ref().unwrap().id, "hd_high");
        assert_eq!(evaluation.queue_size, 12);
        assert_eq!(evaluation.trigger, Some(Trigger::Adaptive));
    }

    // 16s of buffered SD: above the quality-increase threshold but below the retain-after-
    // discard threshold, so the switch up happens without discarding anything.
    #[test]
    fn test_switch_up_without_discard_on_small_buffer() {
        let sd_mid = format("sd_mid", 640, 480, 1, 28);
        let hd_low = format("hd_low", 1280, 720, 1, 400);
        let formats = [hd_low.clone(), sd_mid.clone()];

        let mut queue = VecDeque::new();
        let mut start = 3_000_000i64;
        for i in 0..8 {
            queue.push_back(media_chunk(&sd_mid, start, start + 2_000_000, 42 + i));
            start += 2_000_000;
        }

        let evaluator = evaluator_with(hd_low.bitrate, 1.0);
        let rate = PlaybackRate::default();
        let mut evaluation = FormatEvaluation {
            queue_size: queue.len(),
            trigger: Some(Trigger::Initial),
            format: Some(sd_mid.clone()),
        };
        evaluator.evaluate(&queue, 1_000_000, &formats, &mut evaluation, &rate);
        assert_eq!(evaluation.format.as_ref().unwrap().id, "hd_low");
        assert_eq!(evaluation.queue_size, queue.len());
        assert_eq!(evaluation.trigger, Some(Trigger::Adaptive));
    }

    // A switch down is deferred while the buffer holds more than
    // max_duration_for_quality_decrease of media.
    #[test]
    fn test_switch_down_deferred_with_large_buffer() {
        let sd_mid = format("sd_mid", 640, 480, 1, 28);
        let hd_high = format("hd_high", 1920, 1080, 1, 5000);
        let formats = [hd_high.clone(), sd_mid.clone()];

        let mut queue = VecDeque::new();
        let mut start = 3_000_000i64;
        for i in 0..15 {
            queue.push_back(media_chunk(&hd_high, start, start + 2_000_000, 42 + i));
            start += 2_000_000;
        }

        let evaluator = evaluator_with(sd_mid.bitrate, 1.0);
        let rate = PlaybackRate::default();
        let mut evaluation = FormatEvaluation {
            queue_size: queue.len(),
            trigger: Some(Trigger::Initial),
            format: Some(hd_high.clone()),
        };
        evaluator.evaluate(&queue, 1_000_000, &formats, &mut evaluation, &rate);
        assert_eq!(evaluation.format.as_ref().unwrap().id, "hd_high");
        assert_eq!(evaluation.queue_size, queue.len());
    }

    #[test]
    fn test_fixed_evaluator_sticks_to_first_format() {
        let formats = [format("only", 640, 480, 1, 28)];
        let evaluator = FixedEvaluator;
        let queue = VecDeque::new();
        let rate = PlaybackRate::default();
        let mut evaluation = FormatEvaluation::default();
        evaluator.evaluate(&queue, 0, &formats, &mut evaluation, &rate);
        assert_eq!(evaluation.format.as_ref().unwrap().id, "only");
        assert_eq!(evaluation.trigger, Some(Trigger::Initial));
        evaluator.evaluate(&queue, 0, &formats, &mut evaluation, &rate);
        assert_eq!(evaluation.trigger, Some(Trigger::Adaptive));
    }
}
