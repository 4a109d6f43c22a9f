//! The parsed MPD data model and segment index resolution.
//!
//! [`parse`] turns the XML text of a manifest into a [`MediaPresentationDescription`]: an
//! immutable, shareable object tree in which base URLs have been resolved, SegmentBase
//! inheritance has been applied, and each [`Representation`] can answer segment addressing
//! queries through a uniform [`DashSegmentIndex`].

mod parse;
mod segment;
mod url_template;
pub(crate) mod xml;

pub use parse::parse;
pub use segment::{
    DashSegmentIndex, MultiSegmentBase, SegmentBase, SegmentList, SegmentTemplate,
    SegmentTimelineElement, SingleSegmentBase,
};
pub use url_template::UrlTemplate;

use std::sync::Arc;

use url::Url;

use crate::format::Format;
use crate::{scale_large_timestamp, MICROS_PER_SECOND};

/// Marker for an unknown duration in millisecond fields of the model.
pub const UNKNOWN_DURATION_MS: i64 = -1;

/// A resolved URI together with an optional byte range. `length` of -1 means "to the end of the
/// resource".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangedUri {
    pub url: Url,
    pub start: i64,
    pub length: i64,
}

impl RangedUri {
    pub fn new(url: Url, start: i64, length: i64) -> RangedUri {
        RangedUri { url, start, length }
    }

    /// Resolves `reference` against `base`, falling back to `base` itself for an empty reference.
    pub fn resolve(base: &Url, reference: &str, start: i64, length: i64) -> RangedUri {
        let url = if reference.is_empty() {
            base.clone()
        } else {
            base.join(reference).unwrap_or_else(|_| base.clone())
        };
        RangedUri { url, start, length }
    }

    /// Whether this URI covers the whole resource.
    pub fn is_whole_resource(&self) -> bool {
        self.start == 0 && self.length == -1
    }
}

/// Generic labeled metadata carried by descriptor elements (supplemental and essential
/// properties, UTC timing sources).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorType {
    pub scheme_id_uri: String,
    pub value: String,
    pub id: String,
}

/// An initialization data blob for one DRM scheme, tagged with its MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemeInitData {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// A content protection declaration: the scheme URI, the scheme UUID when one is declared,
/// the default key id protecting the content, and optional inline initialization data (a
/// `cenc:pssh` box).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentProtection {
    pub scheme_id_uri: String,
    pub uuid: Option<String>,
    pub default_key_id: Option<String>,
    pub scheme_init_data: Option<SchemeInitData>,
}

/// The media type of an adaptation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptationType {
    Video,
    Audio,
    Text,
    Unknown,
}

impl AdaptationType {
    pub fn content_type(self) -> &'static str {
        match self {
            AdaptationType::Video => "video",
            AdaptationType::Audio => "audio",
            AdaptationType::Text => "text",
            AdaptationType::Unknown => "unknown",
        }
    }
}

/// A single encoded stream at a specific quality, together with its segment addressing scheme.
#[derive(Debug, Clone)]
pub struct Representation {
    /// Identifies the content this representation belongs to, shared by representations across
    /// adaptation sets and periods.
    pub content_id: String,
    pub revision_id: i64,
    pub format: Format,
    pub segment_base: SegmentBase,
    /// Key under which loaded media for this representation may be cached.
    pub cache_key: String,
    pub supplemental_properties: Vec<DescriptorType>,
    pub essential_properties: Vec<DescriptorType>,
}

impl Representation {
    pub fn new(
        content_id: String,
        revision_id: i64,
        format: Format,
        segment_base: SegmentBase,
        custom_cache_key: Option<String>,
    ) -> Representation {
        let cache_key = custom_cache_key
            .unwrap_or_else(|| format!("{}.{}.{}", content_id, format.id, revision_id));
        Representation {
            content_id,
            revision_id,
            format,
            segment_base,
            cache_key,
            supplemental_properties: Vec::new(),
            essential_properties: Vec::new(),
        }
    }

    /// The location of initialization data, if the representation declares any.
    pub fn initialization_uri(&self) -> Option<RangedUri> {
        self.segment_base.initialization_uri_for(&self.format)
    }

    /// For a single-segment representation whose index is defined externally (an `indexRange`
    /// pointing at e.g. a sidx box), the location of that index.
    pub fn index_uri(&self) -> Option<RangedUri> {
        match &self.segment_base {
            SegmentBase::Single(single) => single.index_uri(),
            _ => None,
        }
    }

    /// A segment index answering addressing queries for this representation, or `None` when the
    /// index is defined externally and must be loaded out of band (see [`Self::index_uri`]).
    pub fn index(&self) -> Option<DashSegmentIndex<'_>> {
        DashSegmentIndex::for_representation(self)
    }

    pub fn presentation_time_offset_us(&self) -> i64 {
        let (offset, timescale) = self.segment_base.presentation_time_offset();
        scale_large_timestamp(offset, MICROS_PER_SECOND, timescale)
    }
}

/// A group of interchangeable representations of one media component.
#[derive(Debug, Clone)]
pub struct AdaptationSet {
    pub id: i32,
    pub adaptation_type: AdaptationType,
    pub representations: Vec<Representation>,
    pub content_protections: Vec<ContentProtection>,
}

impl AdaptationSet {
    pub fn has_content_protection(&self) -> bool {
        !self.content_protections.is_empty()
    }
}

/// A time-contiguous portion of the presentation with its own adaptation sets.
#[derive(Debug, Clone)]
pub struct Period {
    pub id: String,
    pub start_ms: i64,
    pub adaptation_sets: Vec<AdaptationSet>,
}

impl Period {
    /// The index of the first adaptation set of the given type, if any.
    pub fn adaptation_set_index(&self, adaptation_type: AdaptationType) -> Option<usize> {
        self.adaptation_sets.iter().position(|a| a.adaptation_type == adaptation_type)
    }
}

/// The root of the parsed manifest. Immutable after parse; share it behind an [`Arc`].
#[derive(Debug, Clone)]
pub struct MediaPresentationDescription {
    /// Milliseconds since the Unix epoch at which the presentation became available, or 0 when
    /// not declared.
    pub availability_start_time_ms: i64,
    /// Total presentation duration in milliseconds, or [`UNKNOWN_DURATION_MS`].
    pub duration_ms: i64,
    pub min_buffer_time_ms: i64,
    /// True for a live presentation whose availability window grows with wall-clock time.
    pub dynamic: bool,
    /// Minimum delay between manifest refreshes, or [`UNKNOWN_DURATION_MS`] for a static
    /// presentation.
    pub min_update_period_ms: i64,
    pub time_shift_buffer_depth_ms: i64,
    pub utc_timing: Option<DescriptorType>,
    /// URL from which an updated manifest should be fetched, when the origin supplies one.
    pub location: Option<String>,
    /// Periods in ascending start time order. Never empty.
    pub periods: Vec<Period>,
}

impl MediaPresentationDescription {
    pub fn period_count(&self) -> usize {
        self.periods.len()
    }

    /// The duration of period `index` in milliseconds. For all but the last period this is the
    /// distance to the next period's start; for the last period it is bounded by the
    /// presentation duration, and unknown when that is unknown.
    pub fn period_duration_ms(&self, index: usize) -> i64 {
        if index + 1 < self.periods.len() {
            self.periods[index + 1].start_ms - self.periods[index].start_ms
        } else if self.duration_ms == UNKNOWN_DURATION_MS {
            UNKNOWN_DURATION_MS
        } else {
            self.duration_ms - self.periods[index].start_ms
        }
    }

    pub fn period_duration_us(&self, index: usize) -> i64 {
        match self.period_duration_ms(index) {
            UNKNOWN_DURATION_MS => crate::UNKNOWN_TIME_US,
            ms => ms * 1000,
        }
    }

    /// The index of the period containing the given presentation time. Positions before the
    /// first period map to the first period, positions after the end to the last.
    pub fn period_index_for_time_ms(&self, time_ms: i64) -> usize {
        let mut index = 0;
        for (i, period) in self.periods.iter().enumerate() {
            if period.start_ms <= time_ms {
                index = i;
            } else {
                break;
            }
        }
        index
    }

    pub fn duration_us(&self) -> i64 {
        match self.duration_ms {
            UNKNOWN_DURATION_MS => crate::UNKNOWN_TIME_US,
            ms => ms * 1000,
        }
    }
}

/// Convenience alias used throughout the pipeline.
pub type SharedMpd = Arc<MediaPresentationDescription>;
