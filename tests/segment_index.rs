// Tests for segment addressing: templates, timelines, lists and single segments.

use dash_player::mpd::{parse, UrlTemplate};
use pretty_assertions::assert_eq;

const MPD_URL: &str = "http://example.com/content/test.mpd";

#[test]
fn test_url_template_expansion() {
    let template =
        UrlTemplate::compile("AA/$RepresentationID$/segment-$Number%05d$.mp4").unwrap();
    assert_eq!(template.build("640x480", 42, 0, 0), "AA/640x480/segment-00042.mp4");

    let template = UrlTemplate::compile("AA$Time$BB").unwrap();
    assert_eq!(template.build("r", 0, 0, 12345), "AA12345BB");

    // $$ produces a literal dollar; widths pad with zeros.
    let template = UrlTemplate::compile("price$$$Bandwidth%03d$").unwrap();
    assert_eq!(template.build("r", 0, 42, 0), "price$042");

    assert!(UrlTemplate::compile("$NotAThing$").is_err());
}

fn fixed_duration_mpd() -> dash_player::mpd::MediaPresentationDescription {
    // 31s period with 4s segments: 8 segments, the last truncated to 3s.
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD mediaPresentationDuration="PT31S">
  <Period>
    <AdaptationSet contentType="video" mimeType="video/mp4">
      <SegmentTemplate media="seg-$Number$.m4s" initialization="init.mp4"
                       duration="4000" timescale="1000" startNumber="1"/>
      <Representation id="v1" bandwidth="1000000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;
    parse(MPD_URL, xml).unwrap()
}

#[test]
fn test_fixed_duration_index() {
    let mpd = fixed_duration_mpd();
    let period_duration_us = mpd.period_duration_us(0);
    assert_eq!(period_duration_us, 31_000_000);
    let representation = &mpd.periods[0].adaptation_sets[0].representations[0];
    let index = representation.index().unwrap();

    assert!(!index.is_explicit());
    assert_eq!(index.first_segment_num(), 1);
    assert_eq!(index.last_segment_num(period_duration_us), 8);

    // Every segment is at least 1us long and the durations tile the period exactly.
    let mut total_us = 0;
    for segment_num in 1..=8 {
        let duration = index.duration_us(segment_num, period_duration_us);
        assert!(duration >= 1);
        assert_eq!(index.time_us(segment_num), total_us);
        total_us += duration;
    }
    assert_eq!(total_us, period_duration_us);
    // The final segment is truncated to the period end.
    assert_eq!(index.duration_us(8, period_duration_us), 3_000_000);

    // Position to segment mapping.
    assert_eq!(index.segment_num_for(0, period_duration_us), 1);
    assert_eq!(index.segment_num_for(3_999_999, period_duration_us), 1);
    assert_eq!(index.segment_num_for(4_000_000, period_duration_us), 2);
    assert_eq!(index.segment_num_for(30_999_999, period_duration_us), 8);

    let url = index.segment_url(3).unwrap();
    assert_eq!(url.url.as_str(), "http://example.com/content/seg-3.m4s");
    assert!(url.is_whole_resource());
}

#[test]
fn test_segment_timeline_index() {
    // Three runs: two 2s segments, then a gap, then a 3s segment introduced by an explicit t.
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD mediaPresentationDuration="PT13S">
  <Period>
    <AdaptationSet contentType="video" mimeType="video/mp4">
      <SegmentTemplate media="seg-$Time$.m4s" timescale="1" startNumber="10">
        <SegmentTimeline>
          <S t="0" d="2" r="1"/>
          <S t="10" d="3"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v1" bandwidth="1000000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;
    let mpd = parse(MPD_URL, xml).unwrap();
    let period_duration_us = mpd.period_duration_us(0);
    let representation = &mpd.periods[0].adaptation_sets[0].representations[0];
    let index = representation.index().unwrap();

    assert!(index.is_explicit());
    assert_eq!(index.first_segment_num(), 10);
    assert_eq!(index.last_segment_num(period_duration_us), 12);
    // Segment count equals the number of committed timeline records.
    assert_eq!(index.last_segment_num(period_duration_us) - index.first_segment_num() + 1, 3);

    assert_eq!(index.time_us(10), 0);
    assert_eq!(index.time_us(11), 2_000_000);
    assert_eq!(index.time_us(12), 10_000_000);
    assert_eq!(index.duration_us(12, period_duration_us), 3_000_000);

    // Binary search by start time: a position in the gap maps to the preceding segment.
    assert_eq!(index.segment_num_for(0, period_duration_us), 10);
    assert_eq!(index.segment_num_for(2_000_000, period_duration_us), 11);
    assert_eq!(index.segment_num_for(7_000_000, period_duration_us), 11);
    assert_eq!(index.segment_num_for(12_000_000, period_duration_us), 12);

    // $Time$ substitutes the unscaled timeline value.
    let url = index.segment_url(12).unwrap();
    assert_eq!(url.url.as_str(), "http://example.com/content/seg-10.m4s");
}

#[test]
fn test_segment_list_index() {
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD mediaPresentationDuration="PT6S">
  <Period>
    <AdaptationSet contentType="video" mimeType="video/mp4">
      <Representation id="v1" bandwidth="1000000">
        <SegmentList duration="3" timescale="1" startNumber="1">
          <Initialization sourceURL="init.mp4" range="0-99"/>
          <SegmentURL media="s1.m4s"/>
          <SegmentURL media="s2.m4s" mediaRange="100-299"/>
        </SegmentList>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;
    let mpd = parse(MPD_URL, xml).unwrap();
    let period_duration_us = mpd.period_duration_us(0);
    let representation = &mpd.periods[0].adaptation_sets[0].representations[0];

    let init = representation.initialization_uri().unwrap();
    assert_eq!(init.url.as_str(), "http://example.com/content/init.mp4");
    assert_eq!((init.start, init.length), (0, 100));

    let index = representation.index().unwrap();
    assert!(index.is_explicit());
    assert_eq!(index.first_segment_num(), 1);
    assert_eq!(index.last_segment_num(period_duration_us), 2);

    let first = index.segment_url(1).unwrap();
    assert_eq!(first.url.as_str(), "http://example.com/content/s1.m4s");
    assert!(first.is_whole_resource());
    let second = index.segment_url(2).unwrap();
    assert_eq!((second.start, second.length), (100, 200));
    assert!(index.segment_url(3).is_none());
}

#[test]
fn test_single_segment_representation() {
    // No addressing elements at all: the representation's base URL is the one segment.
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD mediaPresentationDuration="PT30S">
  <Period>
    <AdaptationSet contentType="video" mimeType="video/mp4">
      <Representation id="v1" bandwidth="1000000">
        <BaseURL>movie.mp4</BaseURL>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;
    let mpd = parse(MPD_URL, xml).unwrap();
    let period_duration_us = mpd.period_duration_us(0);
    let representation = &mpd.periods[0].adaptation_sets[0].representations[0];
    assert!(representation.index_uri().is_none());
    let index = representation.index().unwrap();
    assert!(index.is_explicit());
    assert_eq!(index.first_segment_num(), 0);
    assert_eq!(index.last_segment_num(period_duration_us), 0);
    assert_eq!(index.duration_us(0, period_duration_us), period_duration_us);
    let url = index.segment_url(0).unwrap();
    assert_eq!(url.url.as_str(), "http://example.com/content/movie.mp4");
}

#[test]
fn test_single_segment_with_external_index() {
    // An indexRange means the index lives in the media (e.g. a sidx box): the representation
    // exposes its location and no in-manifest index.
    let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD mediaPresentationDuration="PT30S">
  <Period>
    <AdaptationSet contentType="video" mimeType="video/mp4">
      <Representation id="v1" bandwidth="1000000">
        <BaseURL>movie.mp4</BaseURL>
        <SegmentBase indexRange="820-2543">
          <Initialization range="0-819"/>
        </SegmentBase>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;
    let mpd = parse(MPD_URL, xml).unwrap();
    let representation = &mpd.periods[0].adaptation_sets[0].representations[0];
    assert!(representation.index().is_none());
    let index_uri = representation.index_uri().unwrap();
    assert_eq!(index_uri.url.as_str(), "http://example.com/content/movie.mp4");
    assert_eq!((index_uri.start, index_uri.length), (820, 1724));
    let init = representation.initialization_uri().unwrap();
    assert_eq!((init.start, init.length), (0, 820));
}
