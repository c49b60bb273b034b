//! Attribute-list parsing for tags such as `#EXT-X-KEY` and `#EXT-X-STREAM-INF`.

use std::ops::Range;

/// Ordered `NAME=VALUE` pairs with surrounding quotes stripped from values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeList {
    pairs: Vec<(String, String)>,
}

impl AttributeList {
    /// Parse an attribute list. Commas inside quoted values do not split pairs.
    pub fn parse(input: &str) -> Self {
        let mut pairs = Vec::new();
        for item in split_unquoted(input) {
            let Some((name, value)) = item.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            pairs.push((name.to_ascii_uppercase(), value.to_string()));
        }
        Self { pairs }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn owned(&self, name: &str) -> Option<String> {
        self.get(name).map(str::to_string)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

fn split_unquoted(input: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                items.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&input[start..]);
    items
}

/// Byte ranges of every quoted `URI="..."` value in a tag line (quotes excluded).
///
/// Only a `URI` attribute name counts; names that merely end in `URI` are skipped.
pub fn quoted_uri_spans(line: &str) -> Vec<Range<usize>> {
    const MARKER: &str = "URI=\"";
    let mut spans = Vec::new();
    let mut search_from = 0;

    while let Some(found) = line[search_from..].find(MARKER) {
        let marker_pos = search_from + found;
        let value_start = marker_pos + MARKER.len();
        let boundary = line[..marker_pos]
            .chars()
            .next_back()
            .is_none_or(|c| c == ':' || c == ',' || c.is_whitespace());

        let Some(close) = line[value_start..].find('"') else {
            break;
        };
        let value_end = value_start + close;
        if boundary {
            spans.push(value_start..value_end);
        }
        search_from = value_end + 1;
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_and_bare_values() {
        let attrs = AttributeList::parse(r#"METHOD=AES-128,URI="https://k/key1",IV=0x1234"#);
        assert_eq!(attrs.get("METHOD"), Some("AES-128"));
        assert_eq!(attrs.get("URI"), Some("https://k/key1"));
        assert_eq!(attrs.get("iv"), Some("0x1234"));
        assert_eq!(attrs.get("KEYFORMAT"), None);
    }

    #[test]
    fn commas_inside_quotes_do_not_split() {
        let attrs = AttributeList::parse(r#"BANDWIDTH=1280000,CODECS="avc1.4d401f,mp4a.40.2",RESOLUTION=1280x720"#);
        assert_eq!(attrs.get("CODECS"), Some("avc1.4d401f,mp4a.40.2"));
        assert_eq!(attrs.get("RESOLUTION"), Some("1280x720"));
    }

    #[test]
    fn ignores_items_without_equals() {
        let attrs = AttributeList::parse("garbage,,BANDWIDTH=5");
        assert_eq!(attrs.get("BANDWIDTH"), Some("5"));
        assert!(!attrs.is_empty());
    }

    #[test]
    fn finds_all_uri_spans() {
        let line = r#"#EXT-X-MEDIA:TYPE=AUDIO,URI="a.m3u8",NAME="x""#;
        let spans = quoted_uri_spans(line);
        assert_eq!(spans.len(), 1);
        assert_eq!(&line[spans[0].clone()], "a.m3u8");
    }

    #[test]
    fn skips_suffix_named_attributes() {
        let line = r#"#EXT-X-FOO:X-URI="nope",URI="yes""#;
        let spans = quoted_uri_spans(line);
        assert_eq!(spans.len(), 1);
        assert_eq!(&line[spans[0].clone()], "yes");
    }
}
