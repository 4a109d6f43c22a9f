//! Segment addressing: the `SegmentBase` family of manifest elements, and the uniform segment
//! index interface the playback pipeline consumes.

use url::Url;

use super::url_template::UrlTemplate;
use super::{RangedUri, Representation};
use crate::{scale_large_timestamp, MICROS_PER_SECOND, UNKNOWN_TIME_US};

/// One entry of an explicit `SegmentTimeline`, in timescale units of the enclosing element.
/// Consecutive elements may be non-contiguous when the manifest carries explicit `t` attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentTimelineElement {
    pub start_time: i64,
    pub duration: i64,
}

/// A `SegmentBase` describing one media URI, with optional byte ranges locating initialization
/// data and an externally-defined segment index within it.
#[derive(Debug, Clone)]
pub struct SingleSegmentBase {
    pub uri: Url,
    pub initialization: Option<RangedUri>,
    pub timescale: i64,
    pub presentation_time_offset: i64,
    pub index_start: i64,
    /// Length of the byte-range index, or 0 when the representation has none.
    pub index_length: i64,
    /// Total length of the resource in bytes, or -1 if unknown.
    pub content_length: i64,
}

impl SingleSegmentBase {
    /// A segment base covering the whole resource at `uri`, with no index and no init data.
    pub fn whole_resource(uri: Url) -> SingleSegmentBase {
        SingleSegmentBase {
            uri,
            initialization: None,
            timescale: 1,
            presentation_time_offset: 0,
            index_start: 0,
            index_length: 0,
            content_length: -1,
        }
    }

    pub fn index_uri(&self) -> Option<RangedUri> {
        if self.index_length <= 0 {
            None
        } else {
            Some(RangedUri::new(self.uri.clone(), self.index_start, self.index_length))
        }
    }
}

/// The fields shared by the multi-segment addressing schemes: segment numbering, a fixed segment
/// duration or an explicit timeline, and the common time scaling attributes.
#[derive(Debug, Clone)]
pub struct MultiSegmentBase {
    pub initialization: Option<RangedUri>,
    pub timescale: i64,
    pub presentation_time_offset: i64,
    pub start_number: i64,
    /// Fixed segment duration in timescale units. Ignored when a timeline is present.
    pub duration: i64,
    pub timeline: Option<Vec<SegmentTimelineElement>>,
}

impl MultiSegmentBase {
    pub fn first_segment_num(&self) -> i64 {
        self.start_number
    }

    /// Start time of the given segment in microseconds of period-local presentation time.
    pub fn segment_time_us(&self, segment_num: i64) -> i64 {
        let unscaled = match &self.timeline {
            Some(timeline) => {
                let i = (segment_num - self.start_number) as usize;
                timeline[i].start_time - self.presentation_time_offset
            }
            None => (segment_num - self.start_number) * self.duration,
        };
        scale_large_timestamp(unscaled, MICROS_PER_SECOND, self.timescale)
    }

    /// Duration of the given segment, truncating the final fixed-duration segment so the period
    /// total matches `period_duration_us` exactly.
    pub fn segment_duration_us(
        &self,
        segment_num: i64,
        period_duration_us: i64,
        last_segment_num: i64,
    ) -> i64 {
        match &self.timeline {
            Some(timeline) => {
                let i = (segment_num - self.start_number) as usize;
                scale_large_timestamp(timeline[i].duration, MICROS_PER_SECOND, self.timescale)
            }
            None => {
                if segment_num == last_segment_num && period_duration_us != UNKNOWN_TIME_US {
                    period_duration_us - self.segment_time_us(segment_num)
                } else {
                    scale_large_timestamp(self.duration, MICROS_PER_SECOND, self.timescale)
                }
            }
        }
    }

    /// The segment containing `time_us`, clamped to the index bounds.
    pub fn segment_num_for(&self, time_us: i64, last_segment_num: i64) -> i64 {
        match &self.timeline {
            Some(timeline) => {
                // Binary search for the last segment starting at or before time_us.
                let mut lo = 0usize;
                let mut hi = timeline.len();
                while hi - lo > 1 {
                    let mid = (lo + hi) / 2;
                    if self.segment_time_us(self.start_number + mid as i64) <= time_us {
                        lo = mid;
                    } else {
                        hi = mid;
                    }
                }
                self.start_number + lo as i64
            }
            None => {
                if self.duration <= 0 {
                    return self.start_number;
                }
                let duration_us =
                    scale_large_timestamp(self.duration, MICROS_PER_SECOND, self.timescale);
                let offset = if duration_us > 0 { time_us / duration_us } else { 0 };
                (self.start_number + offset.max(0)).min(last_segment_num)
            }
        }
    }

    /// The last segment number, bounded by the timeline length or by the period duration for
    /// fixed-duration segments.
    pub fn last_segment_num(&self, period_duration_us: i64) -> i64 {
        match &self.timeline {
            Some(timeline) => self.start_number + timeline.len() as i64 - 1,
            None => {
                if period_duration_us == UNKNOWN_TIME_US {
                    // Live: the index is unbounded.
                    return i64::MAX;
                }
                let total = period_duration_us as i128 * self.timescale as i128;
                let step = self.duration as i128 * MICROS_PER_SECOND as i128;
                let count = if step > 0 { (total + step - 1) / step } else { 1 };
                self.start_number + (count.max(1) as i64) - 1
            }
        }
    }

    /// Raw timescale-unit time value substituted for `$Time$` in URL templates.
    fn unscaled_segment_time(&self, segment_num: i64) -> i64 {
        match &self.timeline {
            Some(timeline) => timeline[(segment_num - self.start_number) as usize].start_time,
            None => (segment_num - self.start_number) * self.duration,
        }
    }
}

/// A multi-segment base enumerating its media segments explicitly.
#[derive(Debug, Clone)]
pub struct SegmentList {
    pub base: MultiSegmentBase,
    pub media_segments: Vec<RangedUri>,
}

/// A multi-segment base constructing segment URLs from compiled templates.
#[derive(Debug, Clone)]
pub struct SegmentTemplate {
    pub base: MultiSegmentBase,
    /// Effective base URL that built template URIs are resolved against.
    pub base_url: Url,
    pub initialization_template: Option<UrlTemplate>,
    pub media_template: Option<UrlTemplate>,
}

/// The segment addressing scheme of one representation.
#[derive(Debug, Clone)]
pub enum SegmentBase {
    Single(SingleSegmentBase),
    List(SegmentList),
    Template(SegmentTemplate),
}

impl SegmentBase {
    pub fn is_single_segment(&self) -> bool {
        matches!(self, SegmentBase::Single(_))
    }

    /// The location of initialization data for a representation with the given format, if any.
    pub fn initialization_uri_for(&self, format: &crate::Format) -> Option<RangedUri> {
        match self {
            SegmentBase::Single(s) => s.initialization.clone(),
            SegmentBase::List(l) => l.base.initialization.clone(),
            SegmentBase::Template(t) => {
                if let Some(init) = &t.base.initialization {
                    return Some(init.clone());
                }
                let template = t.initialization_template.as_ref()?;
                let reference = template.build(&format.id, 0, format.bitrate, 0);
                Some(RangedUri::resolve(&t.base_url, &reference, 0, -1))
            }
        }
    }

    /// The unscaled presentation time offset and the timescale it is expressed in.
    pub(crate) fn presentation_time_offset(&self) -> (i64, i64) {
        match self {
            SegmentBase::Single(s) => (s.presentation_time_offset, s.timescale),
            SegmentBase::List(l) => (l.base.presentation_time_offset, l.base.timescale),
            SegmentBase::Template(t) => (t.base.presentation_time_offset, t.base.timescale),
        }
    }
}

enum IndexKind<'a> {
    Single(&'a SingleSegmentBase),
    List(&'a SegmentList),
    Template(&'a SegmentTemplate),
}

/// A uniform view of a representation's segments: numbering, timing and URL resolution.
///
/// Obtained from [`Representation::index`]. Queries taking a `period_duration_us` accept
/// [`UNKNOWN_TIME_US`] for a live period whose end is not yet known.
pub struct DashSegmentIndex<'a> {
    representation: &'a Representation,
    kind: IndexKind<'a>,
}

impl<'a> DashSegmentIndex<'a> {
    pub(super) fn for_representation(
        representation: &'a Representation,
    ) -> Option<DashSegmentIndex<'a>> {
        let kind = match &representation.segment_base {
            SegmentBase::Single(single) => {
                if single.index_length > 0 {
                    // The index is defined externally (e.g. a sidx box); callers must load it
                    // from Representation::index_uri().
                    return None;
                }
                IndexKind::Single(single)
            }
            SegmentBase::List(list) => IndexKind::List(list),
            SegmentBase::Template(template) => IndexKind::Template(template),
        };
        Some(DashSegmentIndex { representation, kind })
    }

    fn multi(&self) -> Option<&MultiSegmentBase> {
        match &self.kind {
            IndexKind::Single(_) => None,
            IndexKind::List(l) => Some(&l.base),
            IndexKind::Template(t) => Some(&t.base),
        }
    }

    pub fn first_segment_num(&self) -> i64 {
        match self.multi() {
            None => 0,
            Some(m) => m.first_segment_num(),
        }
    }

    pub fn last_segment_num(&self, period_duration_us: i64) -> i64 {
        match &self.kind {
            IndexKind::Single(_) => 0,
            IndexKind::List(l) => l.base.start_number + l.media_segments.len() as i64 - 1,
            IndexKind::Template(t) => t.base.last_segment_num(period_duration_us),
        }
    }

    pub fn segment_num_for(&self, time_us: i64, period_duration_us: i64) -> i64 {
        match self.multi() {
            None => 0,
            Some(m) => m.segment_num_for(time_us, self.last_segment_num(period_duration_us)),
        }
    }

    pub fn time_us(&self, segment_num: i64) -> i64 {
        match self.multi() {
            None => 0,
            Some(m) => m.segment_time_us(segment_num),
        }
    }

    pub fn duration_us(&self, segment_num: i64, period_duration_us: i64) -> i64 {
        match self.multi() {
            None => period_duration_us,
            Some(m) => m.segment_duration_us(
                segment_num,
                period_duration_us,
                self.last_segment_num(period_duration_us),
            ),
        }
    }

    /// The location of the given segment, as an owned copy. Returns `None` for a segment number
    /// outside the index bounds.
    pub fn segment_url(&self, segment_num: i64) -> Option<RangedUri> {
        match &self.kind {
            IndexKind::Single(s) => {
                Some(RangedUri::new(s.uri.clone(), 0, s.content_length))
            }
            IndexKind::List(l) => {
                let index = segment_num - l.base.start_number;
                if index < 0 || index as usize >= l.media_segments.len() {
                    return None;
                }
                Some(l.media_segments[index as usize].clone())
            }
            IndexKind::Template(t) => {
                if let Some(timeline) = &t.base.timeline {
                    let index = segment_num - t.base.start_number;
                    if index < 0 || index as usize >= timeline.len() {
                        return None;
                    }
                } else if segment_num < t.base.start_number {
                    return None;
                }
                let template = t.media_template.as_ref()?;
                let format = &self.representation.format;
                let reference = template.build(
                    &format.id,
                    segment_num,
                    format.bitrate,
                    t.base.unscaled_segment_time(segment_num),
                );
                Some(RangedUri::resolve(&t.base_url, &reference, 0, -1))
            }
        }
    }

    /// True iff the index enumerates its segments (an explicit list or timeline, or a single
    /// segment); false for fixed-duration templates, whose bounds are derived.
    pub fn is_explicit(&self) -> bool {
        match &self.kind {
            IndexKind::Single(_) => true,
            IndexKind::List(_) => true,
            IndexKind::Template(t) => t.base.timeline.is_some(),
        }
    }
}
