//! Structural HLS parser.
//!
//! Produces a [`PlaylistDocument`] with every URI resolved against the
//! playlist's own URL. Parsing never fails: input without the `#EXTM3U`
//! signature yields a document with `is_valid == false`.

use super::attributes::AttributeList;
use super::resolve::resolve_url;
use super::tags::{Line, Tag};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaylistKind {
    Master,
    #[default]
    Media,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMethod {
    None,
    Aes128,
    SampleAes,
    SampleAesCtr,
    Other(String),
}

impl KeyMethod {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "NONE" => KeyMethod::None,
            "AES-128" => KeyMethod::Aes128,
            "SAMPLE-AES" => KeyMethod::SampleAes,
            "SAMPLE-AES-CTR" => KeyMethod::SampleAesCtr,
            _ => KeyMethod::Other(raw.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncryptionKey {
    pub method: KeyMethod,
    pub uri: Option<String>,
    pub iv: Option<String>,
    pub key_format: Option<String>,
    pub key_format_versions: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitializationMap {
    pub uri: String,
    pub byte_range: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub duration: f64,
    pub title: Option<String>,
    pub uri: String,
    pub byte_range: Option<String>,
    pub discontinuity: bool,
    pub program_date_time: Option<String>,
    pub key: Option<Arc<EncryptionKey>>,
    pub map: Option<Arc<InitializationMap>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantStream {
    pub bandwidth: u64,
    pub resolution: Option<String>,
    pub codecs: Option<String>,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaGroup {
    pub media_type: Option<String>,
    pub group_id: Option<String>,
    pub language: Option<String>,
    pub name: Option<String>,
    pub is_default: bool,
    /// As written in the playlist, not resolved.
    pub uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistDocument {
    pub is_valid: bool,
    pub kind: PlaylistKind,
    pub version: u32,
    pub target_duration: u64,
    pub media_sequence: u64,
    pub discontinuity_sequence: u64,
    pub playlist_type: Option<String>,
    pub end_list: bool,
    pub i_frames_only: bool,
    pub independent_segments: bool,
    pub segments: Vec<Segment>,
    pub variants: Vec<VariantStream>,
    pub i_frame_variants: Vec<VariantStream>,
    pub media_groups: Vec<MediaGroup>,
    pub keys: HashMap<String, Arc<EncryptionKey>>,
    pub maps: HashMap<String, Arc<InitializationMap>>,
}

impl Default for PlaylistDocument {
    fn default() -> Self {
        Self {
            is_valid: false,
            kind: PlaylistKind::Media,
            version: 1,
            target_duration: 0,
            media_sequence: 0,
            discontinuity_sequence: 0,
            playlist_type: None,
            end_list: false,
            i_frames_only: false,
            independent_segments: false,
            segments: Vec::new(),
            variants: Vec::new(),
            i_frame_variants: Vec::new(),
            media_groups: Vec::new(),
            keys: HashMap::new(),
            maps: HashMap::new(),
        }
    }
}

impl PlaylistDocument {
    pub fn is_master(&self) -> bool {
        self.kind == PlaylistKind::Master
    }
}

/// Segment attributes collected between `#EXTINF` and its URI line.
struct PendingSegment {
    duration: f64,
    title: Option<String>,
    byte_range: Option<String>,
    discontinuity: bool,
    program_date_time: Option<String>,
}

struct PendingVariant {
    bandwidth: u64,
    resolution: Option<String>,
    codecs: Option<String>,
}

#[derive(Default)]
struct ParseState {
    current_key: Option<Arc<EncryptionKey>>,
    current_map: Option<Arc<InitializationMap>>,
    pending_segment: Option<PendingSegment>,
    pending_variant: Option<PendingVariant>,
    /// Discontinuity seen before the `#EXTINF` it belongs to.
    discontinuity: bool,
}

fn parse_key(attrs: &AttributeList, base: &str) -> EncryptionKey {
    EncryptionKey {
        method: KeyMethod::parse(attrs.get("METHOD").unwrap_or("NONE")),
        uri: attrs.get("URI").map(|u| resolve_url(u, base)),
        iv: attrs.owned("IV"),
        key_format: attrs.owned("KEYFORMAT"),
        key_format_versions: attrs.owned("KEYFORMATVERSIONS"),
    }
}

fn bandwidth(attrs: &AttributeList) -> u64 {
    attrs
        .get("BANDWIDTH")
        .and_then(|b| b.parse().ok())
        .unwrap_or(0)
}

fn path_ends_with_m3u8(uri: &str) -> bool {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    path.to_ascii_lowercase().ends_with(".m3u8")
}

/// Parse playlist text, resolving every URI against `base_url`.
pub fn parse(content: &str, base_url: &str) -> PlaylistDocument {
    let mut doc = PlaylistDocument::default();
    let mut state = ParseState::default();

    for raw in content.lines() {
        match Line::classify(raw) {
            Line::Blank => {}
            Line::Uri(uri) => {
                let resolved = resolve_url(uri, base_url);
                if let Some(variant) = state.pending_variant.take() {
                    doc.variants.push(VariantStream {
                        bandwidth: variant.bandwidth,
                        resolution: variant.resolution,
                        codecs: variant.codecs,
                        uri: resolved,
                    });
                } else if let Some(segment) = state.pending_segment.take() {
                    doc.segments.push(Segment {
                        duration: segment.duration,
                        title: segment.title,
                        uri: resolved,
                        byte_range: segment.byte_range,
                        discontinuity: segment.discontinuity,
                        program_date_time: segment.program_date_time,
                        key: state.current_key.clone(),
                        map: state.current_map.clone(),
                    });
                } else if path_ends_with_m3u8(&resolved) {
                    doc.kind = PlaylistKind::Master;
                    doc.variants.push(VariantStream {
                        bandwidth: 0,
                        resolution: None,
                        codecs: None,
                        uri: resolved,
                    });
                }
            }
            Line::Tag(tag) => match tag {
                Tag::Header => doc.is_valid = true,
                Tag::Version(v) => doc.version = v.unwrap_or(doc.version),
                Tag::TargetDuration(v) => doc.target_duration = v.unwrap_or(doc.target_duration),
                Tag::MediaSequence(v) => doc.media_sequence = v.unwrap_or(doc.media_sequence),
                Tag::DiscontinuitySequence(v) => {
                    doc.discontinuity_sequence = v.unwrap_or(doc.discontinuity_sequence)
                }
                Tag::PlaylistType(t) => doc.playlist_type = Some(t.to_string()),
                Tag::EndList => doc.end_list = true,
                Tag::IFramesOnly => doc.i_frames_only = true,
                Tag::IndependentSegments => doc.independent_segments = true,
                Tag::Key(attrs) => {
                    let key = parse_key(&attrs, base_url);
                    if key.method == KeyMethod::None {
                        state.current_key = None;
                    } else {
                        let key = Arc::new(key);
                        if let Some(uri) = &key.uri {
                            doc.keys.insert(uri.clone(), Arc::clone(&key));
                        }
                        state.current_key = Some(key);
                    }
                }
                Tag::SessionKey(attrs) => {
                    let key = parse_key(&attrs, base_url);
                    if let Some(uri) = key.uri.clone() {
                        doc.keys.insert(uri, Arc::new(key));
                    }
                }
                Tag::Map(attrs) => {
                    if let Some(uri) = attrs.get("URI") {
                        let map = Arc::new(InitializationMap {
                            uri: resolve_url(uri, base_url),
                            byte_range: attrs.owned("BYTERANGE"),
                        });
                        doc.maps.insert(map.uri.clone(), Arc::clone(&map));
                        state.current_map = Some(map);
                    }
                }
                Tag::StreamInf(attrs) => {
                    doc.kind = PlaylistKind::Master;
                    state.pending_variant = Some(PendingVariant {
                        bandwidth: bandwidth(&attrs),
                        resolution: attrs.owned("RESOLUTION"),
                        codecs: attrs.owned("CODECS"),
                    });
                }
                Tag::IFrameStreamInf(attrs) => {
                    doc.kind = PlaylistKind::Master;
                    if let Some(uri) = attrs.get("URI") {
                        doc.i_frame_variants.push(VariantStream {
                            bandwidth: bandwidth(&attrs),
                            resolution: attrs.owned("RESOLUTION"),
                            codecs: attrs.owned("CODECS"),
                            uri: resolve_url(uri, base_url),
                        });
                    }
                }
                Tag::Media(attrs) => doc.media_groups.push(MediaGroup {
                    media_type: attrs.owned("TYPE"),
                    group_id: attrs.owned("GROUP-ID"),
                    language: attrs.owned("LANGUAGE"),
                    name: attrs.owned("NAME"),
                    is_default: attrs
                        .get("DEFAULT")
                        .is_some_and(|d| d.eq_ignore_ascii_case("YES")),
                    uri: attrs.owned("URI"),
                }),
                Tag::Inf { duration, title } => {
                    state.pending_segment = Some(PendingSegment {
                        duration,
                        title: title.map(str::to_string),
                        byte_range: None,
                        discontinuity: std::mem::take(&mut state.discontinuity),
                        program_date_time: None,
                    });
                }
                Tag::ByteRange(range) => {
                    if let Some(segment) = state.pending_segment.as_mut() {
                        segment.byte_range = Some(range.to_string());
                    }
                }
                Tag::Discontinuity => match state.pending_segment.as_mut() {
                    Some(segment) => segment.discontinuity = true,
                    None => state.discontinuity = true,
                },
                Tag::ProgramDateTime(when) => {
                    if let Some(segment) = state.pending_segment.as_mut() {
                        segment.program_date_time = Some(when.to_string());
                    }
                }
                Tag::Part(_)
                | Tag::PreloadHint(_)
                | Tag::RenditionReport(_)
                | Tag::Unknown(_)
                | Tag::Comment => {}
            },
        }
    }

    doc
}
