//! Conversion of the XML document model into the resolved MPD model: base URL resolution,
//! SegmentBase inheritance, attribute fix-ups and structural validation.

use base64::prelude::{Engine as _, BASE64_STANDARD};
use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;
use url::Url;

use super::segment::{
    MultiSegmentBase, SegmentBase, SegmentList, SegmentTemplate, SegmentTimelineElement,
    SingleSegmentBase,
};
use super::url_template::UrlTemplate;
use super::xml;
use super::{
    AdaptationSet, AdaptationType, ContentProtection, DescriptorType,
    MediaPresentationDescription, Period, RangedUri, Representation, SchemeInitData,
    UNKNOWN_DURATION_MS,
};
use crate::format::Format;
use crate::DashPlayerError;

lazy_static! {
    static ref RANGE_RE: Regex = Regex::new(r"^(\d+)-(\d+)$").unwrap();
    static ref FRAME_RATE_RE: Regex = Regex::new(r"^(\d+(?:\.\d+)?)(?:/(\d+))?$").unwrap();
}

/// Parses the XML text of an MPD manifest fetched from `location`.
///
/// `location` is the URL the manifest was retrieved from (after redirects); relative references
/// in the document are resolved against it. Fails with [`DashPlayerError::Parsing`] on XML or
/// structural errors, and with [`DashPlayerError::UnsupportedManifest`] when the manifest
/// requires an addressing feature the pipeline does not implement.
pub fn parse(location: &str, xml: &str) -> Result<MediaPresentationDescription, DashPlayerError> {
    let document_url = Url::parse(location)
        .map_err(|e| DashPlayerError::Parsing(format!("invalid manifest URL {location}: {e}")))?;
    let mut de = quick_xml::de::Deserializer::from_str(xml);
    let doc: xml::MPD = serde_path_to_error::deserialize(&mut de)
        .map_err(|e| DashPlayerError::Parsing(format!("{} (at {})", e.inner(), e.path())))?;
    build_mpd(&document_url, location, &doc)
}

fn build_mpd(
    document_url: &Url,
    content_id: &str,
    doc: &xml::MPD,
) -> Result<MediaPresentationDescription, DashPlayerError> {
    if doc.periods.is_empty() {
        return Err(DashPlayerError::Parsing("manifest contains no Period".to_string()));
    }
    let dynamic = doc.mpdtype.as_deref() == Some("dynamic");
    let base_url = merge_base_urls(document_url, &doc.base_urls);

    // Establish period start times: an explicit start attribute wins, otherwise a period starts
    // where its predecessor ends.
    let mut periods = Vec::with_capacity(doc.periods.len());
    let mut next_start_ms: Option<i64> = Some(0);
    let mut last_period_end_ms = UNKNOWN_DURATION_MS;
    for (index, period) in doc.periods.iter().enumerate() {
        let start_ms = match &period.start {
            Some(start) => start.as_millis() as i64,
            None => next_start_ms.ok_or_else(|| {
                DashPlayerError::Parsing(format!(
                    "start time of Period {index} cannot be determined"
                ))
            })?,
        };
        if let Some(previous) = periods.last().map(|p: &Period| p.start_ms) {
            if start_ms <= previous {
                return Err(DashPlayerError::Parsing(format!(
                    "Period {index} starts at {start_ms}ms, before its predecessor"
                )));
            }
        }
        next_start_ms = period.duration.map(|d| start_ms + d.as_millis() as i64);
        if index + 1 == doc.periods.len() {
            last_period_end_ms = next_start_ms.unwrap_or(UNKNOWN_DURATION_MS);
        }
        periods.push(build_period(&base_url, content_id, period, index, start_ms)?);
    }

    let duration_ms = match &doc.mediaPresentationDuration {
        Some(d) => d.as_millis() as i64,
        None if !dynamic => last_period_end_ms,
        None => UNKNOWN_DURATION_MS,
    };

    Ok(MediaPresentationDescription {
        availability_start_time_ms: doc.availabilityStartTime.unwrap_or(0),
        duration_ms,
        min_buffer_time_ms: doc.minBufferTime.map(|d| d.as_millis() as i64).unwrap_or(0),
        dynamic,
        min_update_period_ms: doc
            .minimumUpdatePeriod
            .map(|d| d.as_millis() as i64)
            .unwrap_or(UNKNOWN_DURATION_MS),
        time_shift_buffer_depth_ms: doc
            .timeShiftBufferDepth
            .map(|d| d.as_millis() as i64)
            .unwrap_or(UNKNOWN_DURATION_MS),
        utc_timing: doc.UTCTiming.as_ref().map(|t| DescriptorType {
            scheme_id_uri: t.schemeIdUri.clone().unwrap_or_default(),
            value: t.value.clone().unwrap_or_default(),
            id: String::new(),
        }),
        location: doc.Location.as_ref().and_then(|l| l.url.clone()),
        periods,
    })
}

fn build_period(
    base_url: &Url,
    content_id: &str,
    period: &xml::Period,
    index: usize,
    start_ms: i64,
) -> Result<Period, DashPlayerError> {
    let period_base = merge_base_urls(base_url, &period.base_urls);
    let mut adaptation_sets = Vec::with_capacity(period.adaptations.len());
    for adaptation in &period.adaptations {
        adaptation_sets.push(build_adaptation_set(&period_base, content_id, period, adaptation)?);
    }
    Ok(Period {
        id: period.id.clone().unwrap_or_else(|| index.to_string()),
        start_ms,
        adaptation_sets,
    })
}

fn build_adaptation_set(
    period_base: &Url,
    content_id: &str,
    period: &xml::Period,
    adaptation: &xml::AdaptationSet,
) -> Result<AdaptationSet, DashPlayerError> {
    let set_base = merge_base_urls(period_base, &adaptation.base_urls);
    let adaptation_type = adaptation_type_of(adaptation);

    let mut protections = Vec::new();
    merge_content_protections(&mut protections, &adaptation.content_protections)?;

    let mut representations = Vec::with_capacity(adaptation.representations.len());
    for representation in &adaptation.representations {
        merge_content_protections(&mut protections, &representation.content_protections)?;
        representations.push(build_representation(
            &set_base,
            content_id,
            period,
            adaptation,
            representation,
        )?);
    }

    Ok(AdaptationSet {
        id: adaptation.id.unwrap_or(-1),
        adaptation_type,
        representations,
        content_protections: protections,
    })
}

fn build_representation(
    set_base: &Url,
    content_id: &str,
    period: &xml::Period,
    adaptation: &xml::AdaptationSet,
    representation: &xml::Representation,
) -> Result<Representation, DashPlayerError> {
    let rep_base = merge_base_urls(set_base, &representation.base_urls);
    let format = build_format(adaptation, representation)?;
    let segment_base =
        resolve_segment_base(&rep_base, period, adaptation, representation, &format)?;
    let mut rep = Representation::new(content_id.to_string(), 0, format, segment_base, None);
    rep.supplemental_properties =
        representation.supplemental_properties.iter().map(descriptor_of).collect();
    rep.essential_properties =
        representation.essential_properties.iter().map(descriptor_of).collect();
    Ok(rep)
}

fn descriptor_of(d: &xml::Descriptor) -> DescriptorType {
    DescriptorType {
        scheme_id_uri: d.schemeIdUri.clone().unwrap_or_default(),
        value: d.value.clone().unwrap_or_default(),
        id: d.id.clone().unwrap_or_default(),
    }
}

fn adaptation_type_of(adaptation: &xml::AdaptationSet) -> AdaptationType {
    let content_type = adaptation
        .contentType
        .clone()
        .or_else(|| adaptation.mimeType.as_ref().map(|m| m.split('/').next().unwrap().to_string()))
        .unwrap_or_default();
    match content_type.as_str() {
        "video" => AdaptationType::Video,
        "audio" => AdaptationType::Audio,
        "text" => AdaptationType::Text,
        "application" => AdaptationType::Text,
        _ => AdaptationType::Unknown,
    }
}

fn build_format(
    adaptation: &xml::AdaptationSet,
    representation: &xml::Representation,
) -> Result<Format, DashPlayerError> {
    let id = representation
        .id
        .clone()
        .ok_or_else(|| DashPlayerError::Parsing("Representation missing id".to_string()))?;
    let mime_type = representation
        .mimeType
        .clone()
        .or_else(|| adaptation.mimeType.clone())
        .unwrap_or_default();
    let mut codecs = representation
        .codecs
        .clone()
        .or_else(|| adaptation.codecs.clone())
        .unwrap_or_default();
    // Some packagers emit the legacy "eac3" label; rewrite to the RFC 6381 name so downstream
    // codec selection does not need a special case.
    if codecs == "eac3" {
        codecs = "ec-3".to_string();
    }
    let frame_rate = match representation.frameRate.as_ref().or(adaptation.frameRate.as_ref()) {
        Some(s) => parse_frame_rate(s)?,
        None => -1.0,
    };
    let channels = adaptation
        .AudioChannelConfiguration
        .as_ref()
        .or(representation.AudioChannelConfiguration.as_ref())
        .and_then(|c| c.value.as_ref())
        .and_then(|v| v.parse::<i32>().ok())
        .unwrap_or(-1);
    Ok(Format {
        id,
        mime_type,
        codecs,
        width: representation.width.or(adaptation.width).unwrap_or(-1) as i32,
        height: representation.height.or(adaptation.height).unwrap_or(-1) as i32,
        frame_rate,
        max_playout_rate: representation
            .maxPlayoutRate
            .or(adaptation.maxPlayoutRate)
            .unwrap_or(1) as i32,
        audio_channels: channels,
        audio_sampling_rate: representation
            .audioSamplingRate
            .or(adaptation.audioSamplingRate)
            .unwrap_or(-1) as i32,
        bitrate: representation.bandwidth.unwrap_or(-1),
        language: representation
            .lang
            .clone()
            .or_else(|| adaptation.lang.clone())
            .unwrap_or_default(),
    })
}

// Frame rates are either a plain decimal or a ratio "A/B".
fn parse_frame_rate(s: &str) -> Result<f64, DashPlayerError> {
    let captures = FRAME_RATE_RE
        .captures(s)
        .ok_or_else(|| DashPlayerError::Parsing(format!("invalid frame rate {s}")))?;
    let numerator: f64 = captures[1].parse().unwrap_or(-1.0);
    match captures.get(2) {
        Some(denominator) => {
            let denominator: f64 = denominator.as_str().parse().unwrap_or(1.0);
            if denominator == 0.0 {
                return Err(DashPlayerError::Parsing(format!("invalid frame rate {s}")));
            }
            Ok(numerator / denominator)
        }
        None => Ok(numerator),
    }
}

fn parse_range(range: &str) -> Result<(i64, i64), DashPlayerError> {
    let captures = RANGE_RE
        .captures(range)
        .ok_or_else(|| DashPlayerError::Parsing(format!("invalid range specifier {range}")))?;
    let start: i64 = captures[1]
        .parse()
        .map_err(|_| DashPlayerError::Parsing(format!("invalid range start in {range}")))?;
    let end: i64 = captures[2]
        .parse()
        .map_err(|_| DashPlayerError::Parsing(format!("invalid range end in {range}")))?;
    if end < start {
        return Err(DashPlayerError::Parsing(format!("inverted range {range}")));
    }
    Ok((start, end - start + 1))
}

// Each element may carry BaseURL children; the effective base of a nested element is its
// parents' bases applied top-down in document order. Only the first BaseURL of each element is
// considered (alternative service locations are a CDN selection concern).
fn merge_base_urls(current: &Url, new: &[xml::BaseURL]) -> Url {
    match new.first() {
        None => current.clone(),
        Some(b) => match current.join(b.base.trim()) {
            Ok(merged) => merged,
            Err(e) => {
                warn!("ignoring unparseable BaseURL {}: {e}", b.base);
                current.clone()
            }
        },
    }
}

fn merge_content_protections(
    into: &mut Vec<ContentProtection>,
    declared: &[xml::ContentProtection],
) -> Result<(), DashPlayerError> {
    for protection in declared {
        let scheme_id_uri = protection.schemeIdUri.clone().unwrap_or_default();
        let uuid = scheme_id_uri
            .strip_prefix("urn:uuid:")
            .map(|u| u.to_ascii_lowercase());
        let default_key_id = protection.default_KID.as_ref().map(|k| k.to_ascii_lowercase());
        let scheme_init_data = match protection.pssh.as_ref().and_then(|p| p.content.as_ref()) {
            Some(encoded) => {
                let data = BASE64_STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| DashPlayerError::Parsing(format!("invalid cenc:pssh: {e}")))?;
                Some(SchemeInitData { mime_type: "video/mp4".to_string(), data })
            }
            None => None,
        };
        match into
            .iter_mut()
            .find(|existing| existing.scheme_id_uri == scheme_id_uri && existing.uuid == uuid)
        {
            Some(existing) => {
                // Representations may repeat the adaptation set's declaration, but must not
                // contradict it.
                match (&existing.scheme_init_data, &scheme_init_data) {
                    (Some(a), Some(b)) if a != b => {
                        return Err(DashPlayerError::Parsing(format!(
                            "conflicting pssh data for scheme {scheme_id_uri}"
                        )));
                    }
                    (None, Some(_)) => existing.scheme_init_data = scheme_init_data,
                    _ => {}
                }
                if existing.default_key_id.is_none() {
                    existing.default_key_id = default_key_id;
                }
            }
            None => into.push(ContentProtection {
                scheme_id_uri,
                uuid,
                default_key_id,
                scheme_init_data,
            }),
        }
    }
    Ok(())
}

// SegmentBase/SegmentList/SegmentTemplate inheritance: a representation that omits one inherits
// from the enclosing AdaptationSet or Period; overrides are element-wise, so an overriding
// element inherits the attributes it does not repeat from the elements it overrides.
fn resolve_segment_base(
    base_url: &Url,
    period: &xml::Period,
    adaptation: &xml::AdaptationSet,
    representation: &xml::Representation,
    format: &Format,
) -> Result<SegmentBase, DashPlayerError> {
    let template_chain: Vec<&xml::SegmentTemplate> =
        [period.SegmentTemplate.as_ref(), adaptation.SegmentTemplate.as_ref(), representation.SegmentTemplate.as_ref()]
            .into_iter()
            .flatten()
            .collect();
    let list_chain: Vec<&xml::SegmentList> =
        [period.SegmentList.as_ref(), adaptation.SegmentList.as_ref(), representation.SegmentList.as_ref()]
            .into_iter()
            .flatten()
            .collect();
    let base_chain: Vec<&xml::SegmentBase> =
        [period.SegmentBase.as_ref(), adaptation.SegmentBase.as_ref(), representation.SegmentBase.as_ref()]
            .into_iter()
            .flatten()
            .collect();

    if !template_chain.is_empty() {
        build_segment_template(base_url, &template_chain, format)
    } else if !list_chain.is_empty() {
        build_segment_list(base_url, &list_chain)
    } else if !base_chain.is_empty() {
        build_single_segment_base(base_url, &base_chain)
    } else {
        // No explicit addressing: the representation's base URL is the single media segment.
        Ok(SegmentBase::Single(SingleSegmentBase::whole_resource(base_url.clone())))
    }
}

// Picks the nearest declared value out of an inheritance chain ordered outermost first.
fn inherited<'a, E, T>(chain: &[&'a E], get: impl FnMut(&'a E) -> Option<T>) -> Option<T> {
    chain.iter().rev().copied().find_map(get)
}

fn build_initialization(
    base_url: &Url,
    initialization: &xml::Initialization,
) -> Result<RangedUri, DashPlayerError> {
    let (start, length) = match &initialization.range {
        Some(range) => parse_range(range)?,
        None => (0, -1),
    };
    Ok(RangedUri::resolve(
        base_url,
        initialization.sourceURL.as_deref().unwrap_or(""),
        start,
        length,
    ))
}

fn build_timeline(
    timeline: &xml::SegmentTimeline,
) -> Result<Vec<SegmentTimelineElement>, DashPlayerError> {
    let mut elements = Vec::new();
    let mut elapsed: i64 = 0;
    for s in &timeline.segments {
        if s.d <= 0 {
            return Err(DashPlayerError::Parsing(
                "SegmentTimeline S element with non-positive duration".to_string(),
            ));
        }
        if let Some(t) = s.t {
            elapsed = t;
        }
        let repeats = s.r.unwrap_or(0).max(0);
        for _ in 0..=repeats {
            elements.push(SegmentTimelineElement { start_time: elapsed, duration: s.d });
            elapsed += s.d;
        }
    }
    Ok(elements)
}

fn build_single_segment_base(
    base_url: &Url,
    chain: &[&xml::SegmentBase],
) -> Result<SegmentBase, DashPlayerError> {
    let initialization = match inherited(chain, |e| e.initialization.as_ref()) {
        Some(init) => Some(build_initialization(base_url, init)?),
        None => None,
    };
    let (index_start, index_length) = match inherited(chain, |e| e.indexRange.as_ref()) {
        Some(range) => parse_range(range)?,
        None => (0, 0),
    };
    Ok(SegmentBase::Single(SingleSegmentBase {
        uri: base_url.clone(),
        initialization,
        timescale: inherited(chain, |e| e.timescale).unwrap_or(1),
        presentation_time_offset: inherited(chain, |e| e.presentationTimeOffset).unwrap_or(0),
        index_start,
        index_length,
        content_length: -1,
    }))
}

fn build_segment_list(
    base_url: &Url,
    chain: &[&xml::SegmentList],
) -> Result<SegmentBase, DashPlayerError> {
    let initialization = match inherited(chain, |e| e.initialization.as_ref()) {
        Some(init) => Some(build_initialization(base_url, init)?),
        None => None,
    };
    let timeline = match inherited(chain, |e| e.SegmentTimeline.as_ref()) {
        Some(timeline) => Some(build_timeline(timeline)?),
        None => None,
    };
    // An overriding SegmentList replaces the list itself but inherits the scalar attributes it
    // does not repeat.
    let urls = inherited(chain, |e| {
        if e.segment_urls.is_empty() { None } else { Some(&e.segment_urls) }
    })
    .map(Vec::as_slice)
    .unwrap_or(&[]);
    let mut media_segments = Vec::with_capacity(urls.len());
    for segment_url in urls {
        let (start, length) = match &segment_url.mediaRange {
            Some(range) => parse_range(range)?,
            None => (0, -1),
        };
        media_segments.push(RangedUri::resolve(
            base_url,
            segment_url.media.as_deref().unwrap_or(""),
            start,
            length,
        ));
    }
    Ok(SegmentBase::List(SegmentList {
        base: MultiSegmentBase {
            initialization,
            timescale: inherited(chain, |e| e.timescale).unwrap_or(1),
            presentation_time_offset: inherited(chain, |e| e.presentationTimeOffset).unwrap_or(0),
            start_number: inherited(chain, |e| e.startNumber).unwrap_or(1),
            duration: inherited(chain, |e| e.duration).unwrap_or(0),
            timeline,
        },
        media_segments,
    }))
}

fn build_segment_template(
    base_url: &Url,
    chain: &[&xml::SegmentTemplate],
    format: &Format,
) -> Result<SegmentBase, DashPlayerError> {
    let initialization = match inherited(chain, |e| e.initialization_element.as_ref()) {
        Some(init) => Some(build_initialization(base_url, init)?),
        None => None,
    };
    let timeline = match inherited(chain, |e| e.SegmentTimeline.as_ref()) {
        Some(timeline) => Some(build_timeline(timeline)?),
        None => None,
    };
    let initialization_template = match inherited(chain, |e| e.initialization.as_ref()) {
        Some(t) => Some(UrlTemplate::compile(t)?),
        None => None,
    };
    let media_template = match inherited(chain, |e| e.media.as_ref()) {
        Some(t) => Some(UrlTemplate::compile(t)?),
        None => None,
    };
    let duration = inherited(chain, |e| e.duration).unwrap_or(0);
    if media_template.is_none() {
        return Err(DashPlayerError::Parsing(
            "SegmentTemplate without a media template".to_string(),
        ));
    }
    if timeline.is_none() && duration <= 0 {
        return Err(DashPlayerError::UnsupportedManifest(format!(
            "SegmentTemplate for representation {} has neither duration nor SegmentTimeline",
            format.id
        )));
    }
    Ok(SegmentBase::Template(SegmentTemplate {
        base: MultiSegmentBase {
            initialization,
            timescale: inherited(chain, |e| e.timescale).unwrap_or(1),
            presentation_time_offset: inherited(chain, |e| e.presentationTimeOffset).unwrap_or(0),
            start_number: inherited(chain, |e| e.startNumber).unwrap_or(1),
            duration,
            timeline,
        },
        base_url: base_url.clone(),
        initialization_template,
        media_template,
    }))
}
