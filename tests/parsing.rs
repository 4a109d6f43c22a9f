// Tests for the MPD parsing support

use dash_player::mpd::{parse, AdaptationType, SegmentBase};
use dash_player::DashPlayerError;
use pretty_assertions::assert_eq;

const MPD_URL: &str = "http://example.com/content/test.mpd";

#[test]
fn test_mpd_parser() {
    let case1 = r#"<?xml version="1.0" encoding="UTF-8"?><MPD><Period></Period></MPD>"#;
    let mpd = parse(MPD_URL, case1).unwrap();
    assert_eq!(mpd.periods.len(), 1);
    assert!(!mpd.dynamic);

    let case2 = r#"<?xml version="1.0" encoding="UTF-8"?><MPD foo="foo"><Period></Period><foo></foo></MPD>"#;
    let mpd = parse(MPD_URL, case2).unwrap();
    assert_eq!(mpd.periods.len(), 1);

    let case3 = r#"<?xml version="1.0" encoding="UTF-8"?><MPD><Period></PeriodZ></MPD>"#;
    assert!(matches!(parse(MPD_URL, case3), Err(DashPlayerError::Parsing(_))));

    let no_period = r#"<?xml version="1.0" encoding="UTF-8"?><MPD></MPD>"#;
    assert!(matches!(parse(MPD_URL, no_period), Err(DashPlayerError::Parsing(_))));
}

#[test]
fn test_mpd_top_level_attributes() {
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD type="dynamic" availabilityStartTime="1970-01-01T00:00:10Z"
     mediaPresentationDuration="PT1H" minBufferTime="PT1.5S"
     minimumUpdatePeriod="PT30S" timeShiftBufferDepth="PT5M">
  <Location>http://example.com/refreshed.mpd</Location>
  <UTCTiming schemeIdUri="urn:mpeg:dash:utc:http-iso:2014" value="http://time.example.com"/>
  <Period></Period>
</MPD>"#;
    let mpd = parse(MPD_URL, xml).unwrap();
    assert!(mpd.dynamic);
    assert_eq!(mpd.availability_start_time_ms, 10_000);
    assert_eq!(mpd.duration_ms, 3_600_000);
    assert_eq!(mpd.min_buffer_time_ms, 1_500);
    assert_eq!(mpd.min_update_period_ms, 30_000);
    assert_eq!(mpd.time_shift_buffer_depth_ms, 300_000);
    assert_eq!(mpd.location.as_deref(), Some("http://example.com/refreshed.mpd"));
    let timing = mpd.utc_timing.unwrap();
    assert_eq!(timing.scheme_id_uri, "urn:mpeg:dash:utc:http-iso:2014");
    assert_eq!(timing.value, "http://time.example.com");
}

#[test]
fn test_representation_format_attributes() {
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD mediaPresentationDuration="PT60S">
  <Period>
    <AdaptationSet contentType="video" mimeType="video/mp4" frameRate="30000/1001" lang="en">
      <SegmentTemplate media="$RepresentationID$-$Number$.mp4" duration="2" timescale="1"/>
      <Representation id="v1" bandwidth="1200000" codecs="avc1.4d401f" width="1280" height="720"/>
      <Representation id="v2" bandwidth="400000" codecs="avc1.42c00d" width="640" height="360" frameRate="25"/>
    </AdaptationSet>
    <AdaptationSet contentType="audio" mimeType="audio/mp4" audioSamplingRate="48000">
      <SegmentTemplate media="$RepresentationID$-$Number$.mp4" duration="2" timescale="1"/>
      <AudioChannelConfiguration schemeIdUri="urn:mpeg:dash:23003:3:audio_channel_configuration:2011" value="2"/>
      <Representation id="a1" bandwidth="128000" codecs="eac3"/>
    </AdaptationSet>
  </Period>
</MPD>"#;
    let mpd = parse(MPD_URL, xml).unwrap();
    let period = &mpd.periods[0];
    assert_eq!(period.adaptation_sets.len(), 2);

    let video = &period.adaptation_sets[0];
    assert_eq!(video.adaptation_type, AdaptationType::Video);
    let v1 = &video.representations[0].format;
    assert_eq!(v1.id, "v1");
    assert_eq!(v1.mime_type, "video/mp4");
    assert_eq!((v1.width, v1.height), (1280, 720));
    assert!((v1.frame_rate - 30000.0 / 1001.0).abs() < 1e-9);
    assert_eq!(v1.language, "en");
    let v2 = &video.representations[1].format;
    assert_eq!(v2.frame_rate, 25.0);

    let audio = &period.adaptation_sets[1];
    assert_eq!(audio.adaptation_type, AdaptationType::Audio);
    let a1 = &audio.representations[0].format;
    // The legacy "eac3" label is rewritten to its RFC 6381 name.
    assert_eq!(a1.codecs, "ec-3");
    assert_eq!(a1.audio_channels, 2);
    assert_eq!(a1.audio_sampling_rate, 48000);

    // Default cache key is <content_id>.<format id>.<revision>.
    assert_eq!(video.representations[0].cache_key, format!("{MPD_URL}.v1.0"));
}

#[test]
fn test_base_url_inheritance() {
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD mediaPresentationDuration="PT30S">
  <BaseURL>http://cdn.example.com/root/</BaseURL>
  <Period>
    <BaseURL>period1/</BaseURL>
    <AdaptationSet contentType="video" mimeType="video/mp4">
      <Representation id="v1" bandwidth="1000">
        <BaseURL>media.mp4</BaseURL>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;
    let mpd = parse(MPD_URL, xml).unwrap();
    let representation = &mpd.periods[0].adaptation_sets[0].representations[0];
    match &representation.segment_base {
        SegmentBase::Single(single) => {
            assert_eq!(single.uri.as_str(), "http://cdn.example.com/root/period1/media.mp4");
        }
        other => panic!("expected single segment base, got {other:?}"),
    }
}

#[test]
fn test_segment_template_inheritance() {
    // The representation inherits the adaptation set template's attributes it does not repeat.
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD mediaPresentationDuration="PT30S">
  <Period>
    <AdaptationSet contentType="video" mimeType="video/mp4">
      <SegmentTemplate timescale="1000" duration="2000" startNumber="5"
                       media="seg-$Number$.mp4" initialization="init-$RepresentationID$.mp4"/>
      <Representation id="v1" bandwidth="1000">
        <SegmentTemplate media="override-$Number$.mp4"/>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;
    let mpd = parse(MPD_URL, xml).unwrap();
    let representation = &mpd.periods[0].adaptation_sets[0].representations[0];
    let index = representation.index().unwrap();
    assert_eq!(index.first_segment_num(), 5);
    let url = index.segment_url(5).unwrap();
    assert_eq!(url.url.as_str(), "http://example.com/content/override-5.mp4");
    // Initialization template still comes from the adaptation set.
    let init = representation.initialization_uri().unwrap();
    assert_eq!(init.url.as_str(), "http://example.com/content/init-v1.mp4");
}

#[test]
fn test_content_protection() {
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD mediaPresentationDuration="PT30S">
  <Period>
    <AdaptationSet contentType="video" mimeType="video/mp4">
      <ContentProtection schemeIdUri="urn:mpeg:dash:mp4protection:2011" value="cenc"/>
      <ContentProtection schemeIdUri="urn:uuid:EDEF8BA9-79D6-4ACE-A3C8-27DCD51D21ED">
        <cenc:pssh>AAAAGHBzc2gAAAAA</cenc:pssh>
      </ContentProtection>
      <SegmentTemplate media="seg-$Number$.mp4" duration="2" timescale="1"/>
      <Representation id="v1" bandwidth="1000">
        <ContentProtection schemeIdUri="urn:mpeg:dash:mp4protection:2011" value="cenc"/>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;
    let mpd = parse(MPD_URL, xml).unwrap();
    let set = &mpd.periods[0].adaptation_sets[0];
    assert!(set.has_content_protection());
    // The representation-level duplicate collapses into the adaptation set's declaration.
    assert_eq!(set.content_protections.len(), 2);
    let widevine = &set.content_protections[1];
    assert_eq!(widevine.uuid.as_deref(), Some("edef8ba9-79d6-4ace-a3c8-27dcd51d21ed"));
    let init_data = widevine.scheme_init_data.as_ref().unwrap();
    assert_eq!(init_data.mime_type, "video/mp4");
    assert!(!init_data.data.is_empty());
}

#[test]
fn test_multiperiod_durations() {
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD mediaPresentationDuration="PT12546699S">
  <Period start="PT12543099S"></Period>
  <Period start="PT12544310S"></Period>
</MPD>"#;
    let mpd = parse(MPD_URL, xml).unwrap();
    assert_eq!(mpd.period_count(), 2);
    assert_eq!(mpd.periods[0].start_ms, 12_543_099_000);
    assert_eq!(mpd.periods[1].start_ms, 12_544_310_000);
    assert_eq!(mpd.period_duration_ms(0), 1_211_000);
    assert_eq!(mpd.period_duration_ms(1), 2_389_000);
    // The period durations tile the presentation from the first period's start to the end.
    assert_eq!(
        mpd.periods[0].start_ms + mpd.period_duration_ms(0) + mpd.period_duration_ms(1),
        mpd.duration_ms
    );
    assert_eq!(mpd.period_index_for_time_ms(12_543_099_000), 0);
    assert_eq!(mpd.period_index_for_time_ms(12_544_309_999), 0);
    assert_eq!(mpd.period_index_for_time_ms(12_544_310_000), 1);
}

#[test]
fn test_period_starts_must_increase() {
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD mediaPresentationDuration="PT60S">
  <Period start="PT20S"></Period>
  <Period start="PT10S"></Period>
</MPD>"#;
    assert!(matches!(parse(MPD_URL, xml), Err(DashPlayerError::Parsing(_))));
}

#[test]
fn test_period_start_derived_from_predecessor() {
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD>
  <Period duration="PT10S"></Period>
  <Period duration="PT20S"></Period>
</MPD>"#;
    let mpd = parse(MPD_URL, xml).unwrap();
    assert_eq!(mpd.periods[0].start_ms, 0);
    assert_eq!(mpd.periods[1].start_ms, 10_000);
    // With no mediaPresentationDuration on a static manifest, the total falls out of the last
    // period's end.
    assert_eq!(mpd.duration_ms, 30_000);
}

#[test]
fn test_unknown_template_identifier_fails_parse() {
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD mediaPresentationDuration="PT30S">
  <Period>
    <AdaptationSet contentType="video" mimeType="video/mp4">
      <SegmentTemplate media="seg-$Frobnicate$.mp4" duration="2" timescale="1"/>
      <Representation id="v1" bandwidth="1000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;
    assert!(matches!(parse(MPD_URL, xml), Err(DashPlayerError::Parsing(_))));
}
