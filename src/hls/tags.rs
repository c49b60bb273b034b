//! One-shot classification of playlist lines into typed tags.

use super::attributes::AttributeList;

/// A classified physical line of a playlist.
#[derive(Debug, Clone, PartialEq)]
pub enum Line<'a> {
    Blank,
    Tag(Tag<'a>),
    /// A resource reference (anything that is neither blank nor starts with `#`).
    Uri(&'a str),
}

/// Tags the relay understands, with their payload already parsed.
///
/// Numeric payloads that fail to parse are carried as `None`.
#[derive(Debug, Clone, PartialEq)]
pub enum Tag<'a> {
    Header,
    Version(Option<u32>),
    TargetDuration(Option<u64>),
    MediaSequence(Option<u64>),
    DiscontinuitySequence(Option<u64>),
    PlaylistType(&'a str),
    EndList,
    IFramesOnly,
    IndependentSegments,
    Key(AttributeList),
    SessionKey(AttributeList),
    Map(AttributeList),
    StreamInf(AttributeList),
    IFrameStreamInf(AttributeList),
    Media(AttributeList),
    Inf { duration: f64, title: Option<&'a str> },
    ByteRange(&'a str),
    Discontinuity,
    ProgramDateTime(&'a str),
    Part(AttributeList),
    PreloadHint(AttributeList),
    RenditionReport(AttributeList),
    /// An `#EXT` tag without dedicated handling.
    Unknown(&'a str),
    /// A plain `#` comment.
    Comment,
}

impl<'a> Line<'a> {
    /// Classify one line. Surrounding whitespace is ignored.
    pub fn classify(raw: &'a str) -> Self {
        let line = raw.trim();
        if line.is_empty() {
            return Line::Blank;
        }
        if !line.starts_with('#') {
            return Line::Uri(line);
        }
        if !line.starts_with("#EXT") {
            return Line::Tag(Tag::Comment);
        }

        let (name, payload) = match line.split_once(':') {
            Some((name, payload)) => (name, payload.trim()),
            None => (line, ""),
        };

        let tag = match name {
            "#EXTM3U" => Tag::Header,
            "#EXT-X-VERSION" => Tag::Version(payload.parse().ok()),
            "#EXT-X-TARGETDURATION" => Tag::TargetDuration(parse_integer(payload)),
            "#EXT-X-MEDIA-SEQUENCE" => Tag::MediaSequence(parse_integer(payload)),
            "#EXT-X-DISCONTINUITY-SEQUENCE" => Tag::DiscontinuitySequence(parse_integer(payload)),
            "#EXT-X-PLAYLIST-TYPE" => Tag::PlaylistType(payload),
            "#EXT-X-ENDLIST" => Tag::EndList,
            "#EXT-X-I-FRAMES-ONLY" => Tag::IFramesOnly,
            "#EXT-X-INDEPENDENT-SEGMENTS" => Tag::IndependentSegments,
            "#EXT-X-KEY" => Tag::Key(AttributeList::parse(payload)),
            "#EXT-X-SESSION-KEY" => Tag::SessionKey(AttributeList::parse(payload)),
            "#EXT-X-MAP" => Tag::Map(AttributeList::parse(payload)),
            "#EXT-X-STREAM-INF" => Tag::StreamInf(AttributeList::parse(payload)),
            "#EXT-X-I-FRAME-STREAM-INF" => Tag::IFrameStreamInf(AttributeList::parse(payload)),
            "#EXT-X-MEDIA" => Tag::Media(AttributeList::parse(payload)),
            "#EXTINF" => parse_inf(payload),
            "#EXT-X-BYTERANGE" => Tag::ByteRange(payload),
            "#EXT-X-DISCONTINUITY" => Tag::Discontinuity,
            "#EXT-X-PROGRAM-DATE-TIME" => Tag::ProgramDateTime(payload),
            "#EXT-X-PART" => Tag::Part(AttributeList::parse(payload)),
            "#EXT-X-PRELOAD-HINT" => Tag::PreloadHint(AttributeList::parse(payload)),
            "#EXT-X-RENDITION-REPORT" => Tag::RenditionReport(AttributeList::parse(payload)),
            other => Tag::Unknown(other),
        };
        Line::Tag(tag)
    }
}

impl Tag<'_> {
    /// Whether the tag carries `URI` attributes that name resources a player fetches.
    pub fn has_uri_attributes(&self) -> bool {
        matches!(
            self,
            Tag::Key(_)
                | Tag::SessionKey(_)
                | Tag::Map(_)
                | Tag::Media(_)
                | Tag::IFrameStreamInf(_)
                | Tag::Part(_)
                | Tag::PreloadHint(_)
                | Tag::RenditionReport(_)
        )
    }
}

/// Integers that some packagers write as decimals (`10.0`) are truncated.
fn parse_integer(payload: &str) -> Option<u64> {
    payload
        .parse::<u64>()
        .ok()
        .or_else(|| payload.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as u64))
}

fn parse_inf(payload: &str) -> Tag<'_> {
    let (duration, title) = match payload.split_once(',') {
        Some((duration, title)) => (duration, Some(title.trim()).filter(|t| !t.is_empty())),
        None => (payload, None),
    };
    Tag::Inf {
        duration: duration.trim().parse().unwrap_or(0.0),
        title,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_blank_uri_and_comment() {
        assert_eq!(Line::classify("   "), Line::Blank);
        assert_eq!(Line::classify("seg1.ts\r"), Line::Uri("seg1.ts"));
        assert_eq!(Line::classify("# just a note"), Line::Tag(Tag::Comment));
    }

    #[test]
    fn numeric_tags_parse_payload() {
        assert_eq!(Line::classify("#EXT-X-VERSION:6"), Line::Tag(Tag::Version(Some(6))));
        assert_eq!(
            Line::classify("#EXT-X-TARGETDURATION:10.0"),
            Line::Tag(Tag::TargetDuration(Some(10)))
        );
        assert_eq!(
            Line::classify("#EXT-X-MEDIA-SEQUENCE:abc"),
            Line::Tag(Tag::MediaSequence(None))
        );
    }

    #[test]
    fn inf_splits_duration_and_title() {
        assert_eq!(
            Line::classify("#EXTINF:9.009,Opening, part 1"),
            Line::Tag(Tag::Inf { duration: 9.009, title: Some("Opening, part 1") })
        );
        assert_eq!(
            Line::classify("#EXTINF:4,"),
            Line::Tag(Tag::Inf { duration: 4.0, title: None })
        );
    }

    #[test]
    fn unknown_ext_tags_are_explicit() {
        assert_eq!(
            Line::classify("#EXT-X-DATERANGE:ID=\"ad\""),
            Line::Tag(Tag::Unknown("#EXT-X-DATERANGE"))
        );
        // Prefix overlap must not be mistaken for a known tag
        assert_eq!(
            Line::classify("#EXT-X-MEDIA-SEQUENCE:3"),
            Line::Tag(Tag::MediaSequence(Some(3)))
        );
    }

    #[test]
    fn uri_bearing_tags() {
        let Line::Tag(tag) = Line::classify(r#"#EXT-X-MAP:URI="init.mp4""#) else {
            panic!("expected tag");
        };
        assert!(tag.has_uri_attributes());
        let Line::Tag(tag) = Line::classify("#EXT-X-STREAM-INF:BANDWIDTH=1") else {
            panic!("expected tag");
        };
        assert!(!tag.has_uri_attributes());
    }
}
