//! serde document structs for the MPD XML vocabulary.
//!
//! We are using the quick_xml + serde crates to deserialize the XML content to Rust structs.
//! serde ignores unknown fields when deserializing, so only the elements and attributes the
//! pipeline consumes are declared here. Field names follow the attribute and element names of
//! ISO/IEC 23009-1 (quick-xml's `@` prefix marks attributes, `$text` the element text), hence
//! the departure from Rust naming conventions in this module.
//!
//! The MPD format is documented by ISO using an XML Schema at
//! <https://standards.iso.org/ittf/PubliclyAvailableStandards/MPEG-DASH_schema_files/>.
//! We occasionally diverge from the standard when in-the-wild implementations do.

#![allow(non_snake_case)]

use std::time::Duration;

use serde::de;
use serde::Deserialize;

// Parse an XML duration string, as per https://www.w3.org/TR/xmlschema-2/#duration
//
// The lexical representation for duration is the ISO 8601 extended format PnYnMnDTnHnMnS, where
// nY represents the number of years, nM the number of months, nD the number of days, 'T' is the
// date/time separator, nH the number of hours, nM the number of minutes and nS the number of
// seconds. The number of seconds can include decimal digits to arbitrary precision.
pub(crate) fn parse_xs_duration(s: &str) -> Result<Duration, String> {
    match iso8601::duration(s) {
        Ok(iso_duration) => match iso_duration {
            iso8601::Duration::Weeks(w) => Ok(Duration::new(w as u64 * 60 * 60 * 24 * 7, 0)),
            iso8601::Duration::YMDHMS { year, month, day, hour, minute, second, millisecond } => {
                // note that if year and month are specified, we are not going to do a very good
                // conversion here
                let mut secs: u64 = second.into();
                secs += minute as u64 * 60;
                secs += hour as u64 * 60 * 60;
                secs += day as u64 * 60 * 60 * 24;
                secs += month as u64 * 60 * 60 * 24 * 31;
                secs += year as u64 * 60 * 60 * 24 * 31 * 365;
                Ok(Duration::new(secs, millisecond * 1_000_000))
            }
        },
        Err(e) => Err(format!("couldn't parse XS duration {s}: {e:?}")),
    }
}

// Deserialize an optional XML duration string to an Option<Duration>. This is a little trickier
// than deserializing a required field with serde.
fn deserialize_xs_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: de::Deserializer<'de>,
{
    match <Option<String>>::deserialize(deserializer) {
        Ok(Some(xs)) => match parse_xs_duration(&xs) {
            Ok(d) => Ok(Some(d)),
            Err(e) => Err(de::Error::custom(e)),
        },
        Ok(None) => Ok(None),
        // the field isn't present; return an Ok(None)
        Err(_) => Ok(None),
    }
}

// Deserialize an optional ISO 8601 datetime (such as availabilityStartTime) to milliseconds
// since the Unix epoch. Some manifests omit the timezone designator, which the RFC 3339 parser
// rejects; retry with an assumed UTC suffix in that case.
fn deserialize_datetime_ms<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: de::Deserializer<'de>,
{
    match <Option<String>>::deserialize(deserializer) {
        Ok(Some(s)) => chrono::DateTime::parse_from_rfc3339(&s)
            .or_else(|_| chrono::DateTime::parse_from_rfc3339(&format!("{s}Z")))
            .map(|dt| Some(dt.timestamp_millis()))
            .map_err(|e| de::Error::custom(format!("couldn't parse datetime {s}: {e}"))),
        Ok(None) => Ok(None),
        Err(_) => Ok(None),
    }
}

/// A URI string that specifies one or more common locations for Segments and other resources.
#[derive(Debug, Deserialize, Clone)]
pub struct BaseURL {
    #[serde(rename = "$text")]
    pub base: String,
}

/// The URL from which an updated manifest should be requested.
#[derive(Debug, Deserialize, Clone)]
pub struct Location {
    #[serde(rename = "$text")]
    pub url: Option<String>,
}

/// A source of wall-clock time used to anchor a dynamic presentation.
#[derive(Debug, Deserialize, Clone)]
pub struct UTCTiming {
    #[serde(rename = "@schemeIdUri")]
    pub schemeIdUri: Option<String>,
    #[serde(rename = "@value")]
    pub value: Option<String>,
}

/// Generic descriptor element (SupplementalProperty, EssentialProperty).
#[derive(Debug, Deserialize, Clone)]
pub struct Descriptor {
    #[serde(rename = "@schemeIdUri")]
    pub schemeIdUri: Option<String>,
    #[serde(rename = "@value")]
    pub value: Option<String>,
    #[serde(rename = "@id")]
    pub id: Option<String>,
}

/// Specifies information concerning the audio channel (eg. stereo, multichannel).
#[derive(Debug, Deserialize, Clone)]
pub struct AudioChannelConfiguration {
    #[serde(rename = "@schemeIdUri")]
    pub schemeIdUri: Option<String>,
    #[serde(rename = "@value")]
    pub value: Option<String>,
}

/// Base64 PSSH content carried inline by a ContentProtection element.
#[derive(Debug, Deserialize, Clone)]
pub struct Pssh {
    #[serde(rename = "$text")]
    pub content: Option<String>,
}

/// Contains information on the DRM mechanisms protecting the stream.
#[derive(Debug, Deserialize, Clone)]
pub struct ContentProtection {
    #[serde(rename = "@schemeIdUri")]
    pub schemeIdUri: Option<String>,
    #[serde(rename = "@value")]
    pub value: Option<String>,
    #[serde(rename = "@cenc:default_KID", alias = "@default_KID")]
    pub default_KID: Option<String>,
    #[serde(rename = "cenc:pssh", alias = "pssh")]
    pub pssh: Option<Pssh>,
}

/// The first media segment in a sequence of Segments. Subsequent segments can be concatenated
/// to this segment to produce a media stream.
#[derive(Debug, Deserialize, Clone)]
pub struct Initialization {
    #[serde(rename = "@sourceURL")]
    pub sourceURL: Option<String>,
    #[serde(rename = "@range")]
    pub range: Option<String>,
}

/// Describes a sequence of contiguous Segments with identical duration.
#[derive(Debug, Deserialize, Clone)]
pub struct S {
    /// Start time in timescale units; resets the running time when present.
    #[serde(rename = "@t")]
    pub t: Option<i64>,
    /// The segment duration in timescale units.
    #[serde(rename = "@d")]
    pub d: i64,
    /// The repeat count (number of contiguous Segments with identical duration minus one),
    /// defaulting to zero if not present.
    #[serde(rename = "@r")]
    pub r: Option<i64>,
}

/// Contains a sequence of `S` elements, each describing a run of contiguous segments of
/// identical duration.
#[derive(Debug, Deserialize, Clone)]
pub struct SegmentTimeline {
    #[serde(rename = "S", default)]
    pub segments: Vec<S>,
}

/// Specifies some common information concerning media segments.
#[derive(Debug, Deserialize, Clone)]
pub struct SegmentBase {
    #[serde(rename = "@timescale")]
    pub timescale: Option<i64>,
    #[serde(rename = "@presentationTimeOffset")]
    pub presentationTimeOffset: Option<i64>,
    #[serde(rename = "@indexRange")]
    pub indexRange: Option<String>,
    #[serde(rename = "Initialization")]
    pub initialization: Option<Initialization>,
}

/// The URL of a media segment within a SegmentList.
#[derive(Debug, Deserialize, Clone)]
pub struct SegmentURL {
    #[serde(rename = "@media")]
    pub media: Option<String>,
    #[serde(rename = "@mediaRange")]
    pub mediaRange: Option<String>,
}

/// Contains an explicit sequence of SegmentURL elements.
#[derive(Debug, Deserialize, Clone)]
pub struct SegmentList {
    // note: the spec says this is an unsigned int, not an xs:duration
    #[serde(rename = "@duration")]
    pub duration: Option<i64>,
    #[serde(rename = "@timescale")]
    pub timescale: Option<i64>,
    #[serde(rename = "@presentationTimeOffset")]
    pub presentationTimeOffset: Option<i64>,
    #[serde(rename = "@startNumber")]
    pub startNumber: Option<i64>,
    #[serde(rename = "Initialization")]
    pub initialization: Option<Initialization>,
    pub SegmentTimeline: Option<SegmentTimeline>,
    #[serde(rename = "SegmentURL", default)]
    pub segment_urls: Vec<SegmentURL>,
}

/// Allows template-based `SegmentURL` construction. Specifies various substitution rules using
/// dynamic values such as `$Time$` and `$Number$` that map to a sequence of Segments.
#[derive(Debug, Deserialize, Clone)]
pub struct SegmentTemplate {
    #[serde(rename = "@initialization")]
    pub initialization: Option<String>,
    #[serde(rename = "@media")]
    pub media: Option<String>,
    pub SegmentTimeline: Option<SegmentTimeline>,
    #[serde(rename = "@startNumber")]
    pub startNumber: Option<i64>,
    // note: the spec says this is an unsigned int, not an xs:duration
    #[serde(rename = "@duration")]
    pub duration: Option<i64>,
    #[serde(rename = "@timescale")]
    pub timescale: Option<i64>,
    #[serde(rename = "@presentationTimeOffset")]
    pub presentationTimeOffset: Option<i64>,
    #[serde(rename = "Initialization")]
    pub initialization_element: Option<Initialization>,
}

/// A representation describes a version of the content, using a specific encoding and bitrate.
/// Streams often have multiple representations with different bitrates, to allow the client to
/// select that most suitable to its network conditions.
#[derive(Debug, Deserialize, Clone)]
pub struct Representation {
    #[serde(rename = "@id")]
    pub id: Option<String>,
    #[serde(rename = "@mimeType")]
    pub mimeType: Option<String>,
    /// An RFC6381 string, <https://tools.ietf.org/html/rfc6381>
    #[serde(rename = "@codecs")]
    pub codecs: Option<String>,
    #[serde(rename = "@bandwidth")]
    pub bandwidth: Option<i64>,
    #[serde(rename = "@width")]
    pub width: Option<i64>,
    #[serde(rename = "@height")]
    pub height: Option<i64>,
    #[serde(rename = "@frameRate")]
    pub frameRate: Option<String>,
    #[serde(rename = "@maxPlayoutRate")]
    pub maxPlayoutRate: Option<i64>,
    #[serde(rename = "@audioSamplingRate")]
    pub audioSamplingRate: Option<i64>,
    #[serde(rename = "@lang")]
    pub lang: Option<String>,
    #[serde(rename = "BaseURL", default)]
    pub base_urls: Vec<BaseURL>,
    pub AudioChannelConfiguration: Option<AudioChannelConfiguration>,
    #[serde(rename = "ContentProtection", default)]
    pub content_protections: Vec<ContentProtection>,
    #[serde(rename = "SupplementalProperty", default)]
    pub supplemental_properties: Vec<Descriptor>,
    #[serde(rename = "EssentialProperty", default)]
    pub essential_properties: Vec<Descriptor>,
    pub SegmentBase: Option<SegmentBase>,
    pub SegmentList: Option<SegmentList>,
    pub SegmentTemplate: Option<SegmentTemplate>,
}

/// Contains a set of interchangeable encoded versions of one media content component.
#[derive(Debug, Deserialize, Clone)]
pub struct AdaptationSet {
    #[serde(rename = "@id")]
    pub id: Option<i32>,
    #[serde(rename = "@contentType")]
    pub contentType: Option<String>,
    #[serde(rename = "@mimeType")]
    pub mimeType: Option<String>,
    #[serde(rename = "@codecs")]
    pub codecs: Option<String>,
    #[serde(rename = "@lang")]
    pub lang: Option<String>,
    #[serde(rename = "@width")]
    pub width: Option<i64>,
    #[serde(rename = "@height")]
    pub height: Option<i64>,
    #[serde(rename = "@frameRate")]
    pub frameRate: Option<String>,
    #[serde(rename = "@maxPlayoutRate")]
    pub maxPlayoutRate: Option<i64>,
    #[serde(rename = "@audioSamplingRate")]
    pub audioSamplingRate: Option<i64>,
    #[serde(rename = "BaseURL", default)]
    pub base_urls: Vec<BaseURL>,
    pub AudioChannelConfiguration: Option<AudioChannelConfiguration>,
    #[serde(rename = "ContentProtection", default)]
    pub content_protections: Vec<ContentProtection>,
    pub SegmentBase: Option<SegmentBase>,
    pub SegmentList: Option<SegmentList>,
    pub SegmentTemplate: Option<SegmentTemplate>,
    #[serde(rename = "Representation", default)]
    pub representations: Vec<Representation>,
}

/// One Period of the presentation.
#[derive(Debug, Deserialize, Clone)]
pub struct Period {
    #[serde(rename = "@id")]
    pub id: Option<String>,
    #[serde(rename = "@start", default, deserialize_with = "deserialize_xs_duration")]
    pub start: Option<Duration>,
    #[serde(rename = "@duration", default, deserialize_with = "deserialize_xs_duration")]
    pub duration: Option<Duration>,
    #[serde(rename = "BaseURL", default)]
    pub base_urls: Vec<BaseURL>,
    pub SegmentBase: Option<SegmentBase>,
    pub SegmentList: Option<SegmentList>,
    pub SegmentTemplate: Option<SegmentTemplate>,
    #[serde(rename = "AdaptationSet", default)]
    pub adaptations: Vec<AdaptationSet>,
}

/// The root node of a parsed DASH MPD manifest.
#[derive(Debug, Deserialize, Clone)]
pub struct MPD {
    #[serde(rename = "@type")]
    pub mpdtype: Option<String>,
    #[serde(
        rename = "@availabilityStartTime",
        default,
        deserialize_with = "deserialize_datetime_ms"
    )]
    pub availabilityStartTime: Option<i64>,
    #[serde(
        rename = "@mediaPresentationDuration",
        default,
        deserialize_with = "deserialize_xs_duration"
    )]
    pub mediaPresentationDuration: Option<Duration>,
    #[serde(rename = "@minBufferTime", default, deserialize_with = "deserialize_xs_duration")]
    pub minBufferTime: Option<Duration>,
    #[serde(
        rename = "@minimumUpdatePeriod",
        default,
        deserialize_with = "deserialize_xs_duration"
    )]
    pub minimumUpdatePeriod: Option<Duration>,
    #[serde(
        rename = "@timeShiftBufferDepth",
        default,
        deserialize_with = "deserialize_xs_duration"
    )]
    pub timeShiftBufferDepth: Option<Duration>,
    #[serde(rename = "BaseURL", default)]
    pub base_urls: Vec<BaseURL>,
    pub Location: Option<Location>,
    pub UTCTiming: Option<UTCTiming>,
    #[serde(rename = "Period", default)]
    pub periods: Vec<Period>,
}
