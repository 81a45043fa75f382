//! Line-oriented M3U8 parser.
//!
//! The first non-blank line must be `#EXTM3U`. Lines starting with `#EXT`
//! are tags; other `#` lines are comments; any remaining non-blank line is a
//! URI that closes the pending segment (media playlist) or variant (master
//! playlist). Tag dispatch is table-driven: [`TAG_TABLE`] maps each known
//! tag to its kind and to its [`TagScope`], and the scope alone decides
//! whether a tag attaches to the next URI or to the playlist. Unknown tags
//! are preserved verbatim.

use super::attrs::{AttrValue, TagAttrs};
use super::master::{
    ClosedCaptions, IFrameVariant, MasterPlaylist, MediaType, Rendition, Variant,
};
use super::media::{MediaPlaylist, Segment};
use super::types::{
    ByteRange, ContentSteering, DateRange, Definition, EncryptionKey, EncryptionMethod, ExtTag,
    HdcpLevel, MapTag, PartInf, PartialSegment, PlaylistType, PreloadHint, PreloadHintType,
    RenditionReport, ServerControl, SessionData, Skip, StartOffset, VideoRange,
};
use super::Manifest;
use chrono::DateTime;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("input does not begin with #EXTM3U")]
    MalformedHeader,
    #[error("unexpected token at line {line}, column {col}")]
    UnexpectedToken { line: usize, col: usize },
    #[error("{tag} is missing required attribute {attr}")]
    MissingRequiredAttribute { tag: &'static str, attr: &'static str },
    #[error("{tag} has invalid value {raw:?} for {attr}")]
    InvalidAttributeValue {
        tag: &'static str,
        attr: String,
        raw: String,
    },
    #[error("#EXTINF at line {line} is not followed by a URI")]
    SegmentWithoutUri { line: usize },
    #[error("{feature} requires protocol version {required}, playlist declares {declared}")]
    VersionFeatureMismatch {
        feature: &'static str,
        required: u8,
        declared: u8,
    },
}

/// Whether a tag applies to the next URI line or to the whole playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagScope {
    Playlist,
    Segment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    // basic
    Version,
    IndependentSegments,
    Start,
    Define,
    // media playlist scoped
    TargetDuration,
    MediaSequence,
    DiscontinuitySequence,
    PlaylistType,
    EndList,
    IFramesOnly,
    ServerControl,
    PartInf,
    Skip,
    PreloadHint,
    RenditionReport,
    // media segment scoped
    Inf,
    ByteRange,
    Discontinuity,
    Key,
    Map,
    ProgramDateTime,
    DateRange,
    Gap,
    Bitrate,
    Part,
    // master playlist scoped
    Media,
    StreamInf,
    IFrameStreamInf,
    SessionData,
    SessionKey,
    ContentSteering,
}

pub struct TagSpec {
    pub name: &'static str,
    pub kind: TagKind,
    pub scope: TagScope,
}

const fn spec(name: &'static str, kind: TagKind, scope: TagScope) -> TagSpec {
    TagSpec { name, kind, scope }
}

/// Every tag the parser understands. Longest-name-first is not required;
/// lookup is by exact name.
pub const TAG_TABLE: &[TagSpec] = &[
    spec("EXT-X-VERSION", TagKind::Version, TagScope::Playlist),
    spec(
        "EXT-X-INDEPENDENT-SEGMENTS",
        TagKind::IndependentSegments,
        TagScope::Playlist,
    ),
    spec("EXT-X-START", TagKind::Start, TagScope::Playlist),
    spec("EXT-X-DEFINE", TagKind::Define, TagScope::Playlist),
    spec(
        "EXT-X-TARGETDURATION",
        TagKind::TargetDuration,
        TagScope::Playlist,
    ),
    spec(
        "EXT-X-MEDIA-SEQUENCE",
        TagKind::MediaSequence,
        TagScope::Playlist,
    ),
    spec(
        "EXT-X-DISCONTINUITY-SEQUENCE",
        TagKind::DiscontinuitySequence,
        TagScope::Playlist,
    ),
    spec(
        "EXT-X-PLAYLIST-TYPE",
        TagKind::PlaylistType,
        TagScope::Playlist,
    ),
    spec("EXT-X-ENDLIST", TagKind::EndList, TagScope::Playlist),
    spec(
        "EXT-X-I-FRAMES-ONLY",
        TagKind::IFramesOnly,
        TagScope::Playlist,
    ),
    spec(
        "EXT-X-SERVER-CONTROL",
        TagKind::ServerControl,
        TagScope::Playlist,
    ),
    spec("EXT-X-PART-INF", TagKind::PartInf, TagScope::Playlist),
    spec("EXT-X-SKIP", TagKind::Skip, TagScope::Playlist),
    spec(
        "EXT-X-PRELOAD-HINT",
        TagKind::PreloadHint,
        TagScope::Playlist,
    ),
    spec(
        "EXT-X-RENDITION-REPORT",
        TagKind::RenditionReport,
        TagScope::Playlist,
    ),
    spec("EXTINF", TagKind::Inf, TagScope::Segment),
    spec("EXT-X-BYTERANGE", TagKind::ByteRange, TagScope::Segment),
    spec(
        "EXT-X-DISCONTINUITY",
        TagKind::Discontinuity,
        TagScope::Segment,
    ),
    spec("EXT-X-KEY", TagKind::Key, TagScope::Segment),
    spec("EXT-X-MAP", TagKind::Map, TagScope::Segment),
    spec(
        "EXT-X-PROGRAM-DATE-TIME",
        TagKind::ProgramDateTime,
        TagScope::Segment,
    ),
    spec("EXT-X-DATERANGE", TagKind::DateRange, TagScope::Segment),
    spec("EXT-X-GAP", TagKind::Gap, TagScope::Segment),
    spec("EXT-X-BITRATE", TagKind::Bitrate, TagScope::Segment),
    spec("EXT-X-PART", TagKind::Part, TagScope::Segment),
    spec("EXT-X-MEDIA", TagKind::Media, TagScope::Playlist),
    spec("EXT-X-STREAM-INF", TagKind::StreamInf, TagScope::Segment),
    spec(
        "EXT-X-I-FRAME-STREAM-INF",
        TagKind::IFrameStreamInf,
        TagScope::Playlist,
    ),
    spec(
        "EXT-X-SESSION-DATA",
        TagKind::SessionData,
        TagScope::Playlist,
    ),
    spec("EXT-X-SESSION-KEY", TagKind::SessionKey, TagScope::Playlist),
    spec(
        "EXT-X-CONTENT-STEERING",
        TagKind::ContentSteering,
        TagScope::Playlist,
    ),
];

fn lookup(name: &str) -> Option<&'static TagSpec> {
    TAG_TABLE.iter().find(|t| t.name == name)
}

enum Line<'a> {
    Tag {
        name: &'a str,
        value: Option<&'a str>,
        line: usize,
    },
    Uri {
        uri: &'a str,
        line: usize,
    },
}

fn lex(input: &str) -> Result<Vec<Line>, ParseError> {
    let mut out = Vec::new();
    let mut saw_header = false;

    for (idx, raw) in input.lines().enumerate() {
        let line = idx + 1;
        let text = raw.trim_end_matches('\r').trim();
        if text.is_empty() {
            continue;
        }
        if !saw_header {
            if text != "#EXTM3U" {
                return Err(ParseError::MalformedHeader);
            }
            saw_header = true;
            continue;
        }
        if let Some(rest) = text.strip_prefix('#') {
            if rest.starts_with("EXT") {
                match rest.split_once(':') {
                    Some((name, value)) => out.push(Line::Tag {
                        name,
                        value: Some(value),
                        line,
                    }),
                    None => out.push(Line::Tag {
                        name: rest,
                        value: None,
                        line,
                    }),
                }
            }
            // other '#' lines are comments
            continue;
        }
        out.push(Line::Uri { uri: text, line });
    }

    if !saw_header {
        return Err(ParseError::MalformedHeader);
    }
    Ok(out)
}

/// Parse a UTF-8 M3U8 document into a [`Manifest`].
pub fn parse(input: &str) -> Result<Manifest, ParseError> {
    let lines = lex(input)?;

    let is_master = lines.iter().any(|l| {
        matches!(l, Line::Tag { name, .. } if matches!(
            lookup(name).map(|t| t.kind),
            Some(
                TagKind::StreamInf
                    | TagKind::IFrameStreamInf
                    | TagKind::Media
                    | TagKind::SessionData
                    | TagKind::SessionKey
                    | TagKind::ContentSteering
            )
        ))
    });

    if is_master {
        parse_master(&lines).map(Manifest::Master)
    } else {
        parse_media(&lines).map(Manifest::Media)
    }
}

fn scalar<'a>(value: Option<&'a str>, line: usize) -> Result<&'a str, ParseError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim()),
        _ => Err(ParseError::UnexpectedToken { line, col: 1 }),
    }
}

fn invalid_scalar(tag: &'static str, raw: &str) -> ParseError {
    ParseError::InvalidAttributeValue {
        tag,
        attr: "value".to_string(),
        raw: raw.to_string(),
    }
}

fn parse_key(tag: &'static str, value: &str, line: usize) -> Result<EncryptionKey, ParseError> {
    let attrs = TagAttrs::parse(tag, value, line)?;
    let method_raw = attrs.required_str("METHOD")?;
    let method = EncryptionMethod::from_str(&method_raw)
        .ok_or_else(|| ParseError::InvalidAttributeValue {
            tag,
            attr: "METHOD".to_string(),
            raw: method_raw,
        })?;
    Ok(EncryptionKey {
        method,
        uri: attrs.opt_str("URI")?,
        iv: attrs.opt_iv("IV")?,
        key_format: attrs.opt_str("KEYFORMAT")?,
        key_format_versions: attrs.opt_str("KEYFORMATVERSIONS")?,
    })
}

fn parse_start(value: &str, line: usize) -> Result<StartOffset, ParseError> {
    let attrs = TagAttrs::parse("EXT-X-START", value, line)?;
    Ok(StartOffset {
        time_offset: attrs.required_f64("TIME-OFFSET")?,
        precise: attrs.bool("PRECISE")?,
    })
}

fn parse_define(value: &str, line: usize) -> Result<Definition, ParseError> {
    let attrs = TagAttrs::parse("EXT-X-DEFINE", value, line)?;
    if let Some(name) = attrs.opt_str("IMPORT")? {
        return Ok(Definition::Import { name });
    }
    if let Some(name) = attrs.opt_str("QUERYPARAM")? {
        return Ok(Definition::QueryParam { name });
    }
    Ok(Definition::Inline {
        name: attrs.required_str("NAME")?,
        value: attrs.required_str("VALUE")?,
    })
}

fn parse_date_time(
    tag: &'static str,
    raw: &str,
) -> Result<chrono::DateTime<chrono::FixedOffset>, ParseError> {
    DateTime::parse_from_rfc3339(raw).map_err(|_| invalid_scalar(tag, raw))
}

#[derive(Default)]
struct PendingSegment {
    duration: Option<f64>,
    inf_line: usize,
    title: Option<String>,
    byte_range: Option<ByteRange>,
    discontinuity: bool,
    gap: bool,
    program_date_time: Option<chrono::DateTime<chrono::FixedOffset>>,
    date_ranges: Vec<DateRange>,
    bitrate: Option<u64>,
    parts: Vec<PartialSegment>,
}

/// Everything segment-scoped tags accumulate until the next URI line: the
/// pending segment plus the key/map in force.
#[derive(Default)]
struct SegmentState {
    pending: PendingSegment,
    key: Option<EncryptionKey>,
    map: Option<MapTag>,
    saw_fractional: bool,
}

fn parse_media(lines: &[Line]) -> Result<MediaPlaylist, ParseError> {
    let mut pl = MediaPlaylist::default();
    let mut state = SegmentState::default();

    for l in lines {
        match l {
            Line::Uri { uri, line } => {
                let Some(duration) = state.pending.duration.take() else {
                    return Err(ParseError::UnexpectedToken { line: *line, col: 1 });
                };
                let taken = std::mem::take(&mut state.pending);
                pl.segments.push(Segment {
                    uri: (*uri).to_string(),
                    duration,
                    title: taken.title,
                    byte_range: taken.byte_range,
                    map: state.map.clone(),
                    key: state.key.clone(),
                    discontinuity: taken.discontinuity,
                    program_date_time: taken.program_date_time,
                    date_ranges: taken.date_ranges,
                    gap: taken.gap,
                    bitrate: taken.bitrate,
                    parts: taken.parts,
                });
            }
            Line::Tag { name, value, line } => {
                let Some(tag) = lookup(name) else {
                    pl.unknown_tags.push(ExtTag {
                        tag: (*name).to_string(),
                        rest: value.map(|v| v.to_string()),
                    });
                    continue;
                };
                // the table's scope decides where the tag attaches
                match tag.scope {
                    TagScope::Playlist => media_playlist_tag(&mut pl, tag, *value, *line)?,
                    TagScope::Segment => media_segment_tag(&mut state, tag, *value, *line)?,
                }
            }
        }
    }

    if state.pending.duration.is_some() {
        return Err(ParseError::SegmentWithoutUri {
            line: state.pending.inf_line,
        });
    }
    pl.pending_parts = state.pending.parts;

    if state.saw_fractional {
        if let Some(declared) = pl.version {
            if declared < 3 {
                return Err(ParseError::VersionFeatureMismatch {
                    feature: "fractional EXTINF durations",
                    required: 3,
                    declared,
                });
            }
        }
    }

    Ok(pl)
}

/// Playlist-scoped tags of a media playlist.
fn media_playlist_tag(
    pl: &mut MediaPlaylist,
    tag: &TagSpec,
    value: Option<&str>,
    line: usize,
) -> Result<(), ParseError> {
    match tag.kind {
        TagKind::Version => {
            let raw = scalar(value, line)?;
            pl.version = Some(raw.parse().map_err(|_| invalid_scalar(tag.name, raw))?);
        }
        TagKind::TargetDuration => {
            let raw = scalar(value, line)?;
            pl.target_duration = raw.parse().map_err(|_| invalid_scalar(tag.name, raw))?;
        }
        TagKind::MediaSequence => {
            let raw = scalar(value, line)?;
            pl.media_sequence = raw.parse().map_err(|_| invalid_scalar(tag.name, raw))?;
        }
        TagKind::DiscontinuitySequence => {
            let raw = scalar(value, line)?;
            pl.discontinuity_sequence =
                raw.parse().map_err(|_| invalid_scalar(tag.name, raw))?;
        }
        TagKind::PlaylistType => {
            let raw = scalar(value, line)?;
            pl.playlist_type = Some(match raw {
                "VOD" => PlaylistType::Vod,
                "EVENT" => PlaylistType::Event,
                other => return Err(invalid_scalar(tag.name, other)),
            });
        }
        TagKind::EndList => pl.end_list = true,
        TagKind::IFramesOnly => pl.i_frames_only = true,
        TagKind::IndependentSegments => pl.independent_segments = true,
        TagKind::Start => {
            pl.start = Some(parse_start(scalar(value, line)?, line)?);
        }
        TagKind::Define => {
            pl.variables.push(parse_define(scalar(value, line)?, line)?);
        }
        TagKind::ServerControl => {
            let attrs = TagAttrs::parse(tag.name, scalar(value, line)?, line)?;
            pl.server_control = Some(ServerControl {
                can_block_reload: attrs.bool("CAN-BLOCK-RELOAD")?,
                can_skip_until: attrs.opt_f64("CAN-SKIP-UNTIL")?,
                can_skip_dateranges: attrs.bool("CAN-SKIP-DATERANGES")?,
                hold_back: attrs.opt_f64("HOLD-BACK")?,
                part_hold_back: attrs.opt_f64("PART-HOLD-BACK")?,
            });
        }
        TagKind::PartInf => {
            let attrs = TagAttrs::parse(tag.name, scalar(value, line)?, line)?;
            pl.part_inf = Some(PartInf {
                part_target: attrs.required_f64("PART-TARGET")?,
            });
        }
        TagKind::Skip => {
            let attrs = TagAttrs::parse(tag.name, scalar(value, line)?, line)?;
            pl.skip = Some(Skip {
                skipped_segments: attrs.required_u64("SKIPPED-SEGMENTS")?,
                recently_removed_dateranges: attrs.opt_str("RECENTLY-REMOVED-DATERANGES")?,
            });
        }
        TagKind::PreloadHint => {
            let attrs = TagAttrs::parse(tag.name, scalar(value, line)?, line)?;
            let type_raw = attrs.required_str("TYPE")?;
            let hint_type = match type_raw.as_str() {
                "PART" => PreloadHintType::Part,
                "MAP" => PreloadHintType::Map,
                other => {
                    return Err(ParseError::InvalidAttributeValue {
                        tag: tag.name,
                        attr: "TYPE".to_string(),
                        raw: other.to_string(),
                    })
                }
            };
            pl.preload_hints.push(PreloadHint {
                hint_type,
                uri: attrs.required_str("URI")?,
                byte_range_start: attrs.opt_u64("BYTERANGE-START")?,
                byte_range_length: attrs.opt_u64("BYTERANGE-LENGTH")?,
            });
        }
        TagKind::RenditionReport => {
            let attrs = TagAttrs::parse(tag.name, scalar(value, line)?, line)?;
            pl.rendition_reports.push(RenditionReport {
                uri: attrs.required_str("URI")?,
                last_msn: attrs.opt_u64("LAST-MSN")?,
                last_part: attrs.opt_u64("LAST-PART")?,
            });
        }
        // master-only tags cannot appear here: their presence routes the
        // document to parse_master
        _ => return Err(ParseError::UnexpectedToken { line, col: 1 }),
    }
    Ok(())
}

/// Segment-scoped tags: they mutate the state waiting for the next URI.
fn media_segment_tag(
    state: &mut SegmentState,
    tag: &TagSpec,
    value: Option<&str>,
    line: usize,
) -> Result<(), ParseError> {
    match tag.kind {
        TagKind::Inf => {
            if state.pending.duration.is_some() {
                return Err(ParseError::SegmentWithoutUri {
                    line: state.pending.inf_line,
                });
            }
            let raw = scalar(value, line)?;
            let (dur_raw, title) = match raw.split_once(',') {
                Some((d, t)) => (d.trim(), Some(t.trim())),
                None => (raw, None),
            };
            if dur_raw.contains('.') {
                state.saw_fractional = true;
            }
            state.pending.duration = Some(
                dur_raw
                    .parse()
                    .map_err(|_| invalid_scalar(tag.name, dur_raw))?,
            );
            state.pending.inf_line = line;
            state.pending.title = title.filter(|t| !t.is_empty()).map(str::to_string);
        }
        TagKind::ByteRange => {
            let raw = scalar(value, line)?;
            state.pending.byte_range =
                Some(ByteRange::parse(raw).ok_or_else(|| invalid_scalar(tag.name, raw))?);
        }
        TagKind::Discontinuity => state.pending.discontinuity = true,
        TagKind::Gap => state.pending.gap = true,
        TagKind::Bitrate => {
            let raw = scalar(value, line)?;
            state.pending.bitrate =
                Some(raw.parse().map_err(|_| invalid_scalar(tag.name, raw))?);
        }
        TagKind::Key => {
            let key = parse_key(tag.name, scalar(value, line)?, line)?;
            // METHOD=NONE ends the encrypted span
            state.key = (key.method != EncryptionMethod::None).then_some(key);
        }
        TagKind::Map => {
            let attrs = TagAttrs::parse(tag.name, scalar(value, line)?, line)?;
            state.map = Some(MapTag {
                uri: attrs.required_str("URI")?,
                byte_range: attrs.opt_byte_range("BYTERANGE")?,
            });
        }
        TagKind::ProgramDateTime => {
            let raw = scalar(value, line)?;
            state.pending.program_date_time = Some(parse_date_time(tag.name, raw)?);
        }
        TagKind::DateRange => {
            let attrs = TagAttrs::parse(tag.name, scalar(value, line)?, line)?;
            let start_date = match attrs.opt_str("START-DATE")? {
                Some(raw) => Some(parse_date_time(tag.name, &raw)?),
                None => None,
            };
            let end_date = match attrs.opt_str("END-DATE")? {
                Some(raw) => Some(parse_date_time(tag.name, &raw)?),
                None => None,
            };
            state.pending.date_ranges.push(DateRange {
                id: attrs.required_str("ID")?,
                class: attrs.opt_str("CLASS")?,
                start_date,
                end_date,
                duration: attrs.opt_f64("DURATION")?,
                planned_duration: attrs.opt_f64("PLANNED-DURATION")?,
                end_on_next: attrs.bool("END-ON-NEXT")?,
                scte35_cmd: attrs.opt_str("SCTE35-CMD")?,
                scte35_out: attrs.opt_str("SCTE35-OUT")?,
                scte35_in: attrs.opt_str("SCTE35-IN")?,
                client_attributes: attrs.client_attributes(),
            });
        }
        TagKind::Part => {
            let attrs = TagAttrs::parse(tag.name, scalar(value, line)?, line)?;
            state.pending.parts.push(PartialSegment {
                uri: attrs.required_str("URI")?,
                duration: attrs.required_f64("DURATION")?,
                independent: attrs.bool("INDEPENDENT")?,
                byte_range: attrs.opt_byte_range("BYTERANGE")?,
                gap: attrs.bool("GAP")?,
            });
        }
        // EXT-X-STREAM-INF is the only other segment-scoped tag and it is
        // master-only
        _ => return Err(ParseError::UnexpectedToken { line, col: 1 }),
    }
    Ok(())
}

fn parse_variant(tag: &'static str, value: &str, line: usize) -> Result<Variant, ParseError> {
    let attrs = TagAttrs::parse(tag, value, line)?;
    let hdcp = match attrs.opt_str("HDCP-LEVEL")? {
        Some(raw) => Some(HdcpLevel::from_str(&raw).ok_or_else(|| {
            ParseError::InvalidAttributeValue {
                tag,
                attr: "HDCP-LEVEL".to_string(),
                raw,
            }
        })?),
        None => None,
    };
    let video_range = match attrs.opt_str("VIDEO-RANGE")? {
        Some(raw) => Some(VideoRange::from_str(&raw).ok_or_else(|| {
            ParseError::InvalidAttributeValue {
                tag,
                attr: "VIDEO-RANGE".to_string(),
                raw,
            }
        })?),
        None => None,
    };
    let closed_captions = match attrs.get("CLOSED-CAPTIONS") {
        Some(AttrValue::Token(t)) if t == "NONE" => Some(ClosedCaptions::None),
        Some(v) => Some(ClosedCaptions::GroupId(v.as_str().to_string())),
        None => None,
    };
    Ok(Variant {
        uri: String::new(),
        bandwidth: attrs.required_u64("BANDWIDTH")?,
        average_bandwidth: attrs.opt_u64("AVERAGE-BANDWIDTH")?,
        codecs: attrs.opt_str("CODECS")?,
        supplemental_codecs: attrs.opt_str("SUPPLEMENTAL-CODECS")?,
        resolution: attrs.opt_resolution("RESOLUTION")?,
        frame_rate: attrs.opt_f64("FRAME-RATE")?,
        hdcp_level: hdcp,
        video_range,
        audio: attrs.opt_str("AUDIO")?,
        video: attrs.opt_str("VIDEO")?,
        subtitles: attrs.opt_str("SUBTITLES")?,
        closed_captions,
    })
}

fn parse_master(lines: &[Line]) -> Result<MasterPlaylist, ParseError> {
    let mut pl = MasterPlaylist::default();
    let mut pending_variant: Option<Variant> = None;

    for l in lines {
        match l {
            Line::Uri { uri, line } => {
                let Some(mut v) = pending_variant.take() else {
                    return Err(ParseError::UnexpectedToken { line: *line, col: 1 });
                };
                v.uri = (*uri).to_string();
                pl.variants.push(v);
            }
            Line::Tag { name, value, line } => {
                let Some(tag) = lookup(name) else {
                    pl.unknown_tags.push(ExtTag {
                        tag: (*name).to_string(),
                        rest: value.map(|v| v.to_string()),
                    });
                    continue;
                };
                match tag.scope {
                    // STREAM-INF is the only tag that attaches to a URI
                    // line in a master playlist
                    TagScope::Segment => {
                        if tag.kind != TagKind::StreamInf {
                            return Err(ParseError::UnexpectedToken { line: *line, col: 1 });
                        }
                        pending_variant =
                            Some(parse_variant(tag.name, scalar(*value, *line)?, *line)?);
                    }
                    TagScope::Playlist => master_playlist_tag(&mut pl, tag, *value, *line)?,
                }
            }
        }
    }

    if pending_variant.is_some() {
        return Err(ParseError::MissingRequiredAttribute {
            tag: "EXT-X-STREAM-INF",
            attr: "URI",
        });
    }

    Ok(pl)
}

/// Playlist-scoped tags of a master playlist.
fn master_playlist_tag(
    pl: &mut MasterPlaylist,
    tag: &TagSpec,
    value: Option<&str>,
    line: usize,
) -> Result<(), ParseError> {
    match tag.kind {
        TagKind::Version => {
            let raw = scalar(value, line)?;
            pl.version = Some(raw.parse().map_err(|_| invalid_scalar(tag.name, raw))?);
        }
        TagKind::IndependentSegments => pl.independent_segments = true,
        TagKind::Start => {
            pl.start = Some(parse_start(scalar(value, line)?, line)?);
        }
        TagKind::Define => {
            pl.variables.push(parse_define(scalar(value, line)?, line)?);
        }
        TagKind::IFrameStreamInf => {
            let attrs = TagAttrs::parse(tag.name, scalar(value, line)?, line)?;
            let hdcp = match attrs.opt_str("HDCP-LEVEL")? {
                Some(raw) => Some(HdcpLevel::from_str(&raw).ok_or_else(|| {
                    ParseError::InvalidAttributeValue {
                        tag: tag.name,
                        attr: "HDCP-LEVEL".to_string(),
                        raw,
                    }
                })?),
                None => None,
            };
            let video_range = match attrs.opt_str("VIDEO-RANGE")? {
                Some(raw) => Some(VideoRange::from_str(&raw).ok_or_else(|| {
                    ParseError::InvalidAttributeValue {
                        tag: tag.name,
                        attr: "VIDEO-RANGE".to_string(),
                        raw,
                    }
                })?),
                None => None,
            };
            pl.i_frame_variants.push(IFrameVariant {
                uri: attrs.required_str("URI")?,
                bandwidth: attrs.required_u64("BANDWIDTH")?,
                average_bandwidth: attrs.opt_u64("AVERAGE-BANDWIDTH")?,
                codecs: attrs.opt_str("CODECS")?,
                resolution: attrs.opt_resolution("RESOLUTION")?,
                hdcp_level: hdcp,
                video_range,
                video: attrs.opt_str("VIDEO")?,
            });
        }
        TagKind::Media => {
            let attrs = TagAttrs::parse(tag.name, scalar(value, line)?, line)?;
            let type_raw = attrs.required_str("TYPE")?;
            let media_type = MediaType::from_str(&type_raw).ok_or_else(|| {
                ParseError::InvalidAttributeValue {
                    tag: tag.name,
                    attr: "TYPE".to_string(),
                    raw: type_raw,
                }
            })?;
            pl.renditions.push(Rendition {
                media_type,
                group_id: attrs.required_str("GROUP-ID")?,
                name: attrs.required_str("NAME")?,
                language: attrs.opt_str("LANGUAGE")?,
                assoc_language: attrs.opt_str("ASSOC-LANGUAGE")?,
                uri: attrs.opt_str("URI")?,
                default: attrs.bool("DEFAULT")?,
                autoselect: attrs.bool("AUTOSELECT")?,
                forced: attrs.bool("FORCED")?,
                instream_id: attrs.opt_str("INSTREAM-ID")?,
                characteristics: attrs.opt_str("CHARACTERISTICS")?,
                channels: attrs.opt_str("CHANNELS")?,
            });
        }
        TagKind::SessionData => {
            let attrs = TagAttrs::parse(tag.name, scalar(value, line)?, line)?;
            pl.session_data.push(SessionData {
                data_id: attrs.required_str("DATA-ID")?,
                value: attrs.opt_str("VALUE")?,
                uri: attrs.opt_str("URI")?,
                language: attrs.opt_str("LANGUAGE")?,
            });
        }
        TagKind::SessionKey => {
            pl.session_keys
                .push(parse_key(tag.name, scalar(value, line)?, line)?);
        }
        TagKind::ContentSteering => {
            let attrs = TagAttrs::parse(tag.name, scalar(value, line)?, line)?;
            pl.content_steering = Some(ContentSteering {
                server_uri: attrs.required_str("SERVER-URI")?,
                pathway_id: attrs.opt_str("PATHWAY-ID")?,
            });
        }
        // media-playlist tags inside a master document
        _ => return Err(ParseError::UnexpectedToken { line, col: 1 }),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360,CODECS=\"avc1.4d401e,mp4a.40.2\"\n\
360p.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=2800000,RESOLUTION=1280x720,CODECS=\"avc1.4d401f,mp4a.40.2\"\n\
720p.m3u8\n";

    #[test]
    fn parses_two_variant_master() {
        let Manifest::Master(m) = parse(MASTER).unwrap() else {
            panic!("expected master playlist");
        };
        assert_eq!(m.variants.len(), 2);
        assert_eq!(m.variants[0].bandwidth, 800000);
        assert_eq!(m.variants[1].bandwidth, 2800000);
        assert_eq!(
            m.variants[0].resolution,
            Some(crate::manifest::Resolution {
                width: 640,
                height: 360
            })
        );
        assert_eq!(
            m.variants[1].resolution,
            Some(crate::manifest::Resolution {
                width: 1280,
                height: 720
            })
        );
        assert_eq!(
            m.variants[0].codecs.as_deref(),
            Some("avc1.4d401e,mp4a.40.2")
        );
        assert_eq!(
            m.variants[1].codecs.as_deref(),
            Some("avc1.4d401f,mp4a.40.2")
        );
        assert_eq!(m.variants[0].uri, "360p.m3u8");
    }

    #[test]
    fn missing_header_is_rejected() {
        assert_eq!(
            parse("#EXT-X-VERSION:3\n").unwrap_err(),
            ParseError::MalformedHeader
        );
        assert_eq!(parse("").unwrap_err(), ParseError::MalformedHeader);
    }

    #[test]
    fn key_applies_to_following_segments() {
        let text = "#EXTM3U\n\
#EXT-X-VERSION:3\n\
#EXT-X-TARGETDURATION:6\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x000102030405060708090a0b0c0d0e0f\n\
#EXTINF:6.006,\n\
s0.ts\n\
#EXTINF:5.839,\n\
s1.ts\n\
#EXT-X-KEY:METHOD=NONE\n\
#EXTINF:6.0,\n\
s2.ts\n";
        let Manifest::Media(m) = parse(text).unwrap() else {
            panic!("expected media playlist");
        };
        assert_eq!(m.segments.len(), 3);
        let k0 = m.segments[0].key.as_ref().unwrap();
        assert_eq!(k0.method, EncryptionMethod::Aes128);
        assert_eq!(k0.uri.as_deref(), Some("key.bin"));
        assert_eq!(k0.iv.unwrap()[15], 0x0f);
        assert_eq!(m.segments[1].key, m.segments[0].key);
        assert_eq!(m.segments[2].key, None);
    }

    #[test]
    fn ll_hls_tags_parse() {
        let text = "#EXTM3U\n\
#EXT-X-VERSION:9\n\
#EXT-X-TARGETDURATION:1\n\
#EXT-X-SERVER-CONTROL:CAN-BLOCK-RELOAD=YES,PART-HOLD-BACK=1.0,CAN-SKIP-UNTIL=12.0\n\
#EXT-X-PART-INF:PART-TARGET=0.33\n\
#EXT-X-PART:DURATION=0.33,URI=\"seg0.part0.m4s\",INDEPENDENT=YES\n\
#EXT-X-PART:DURATION=0.33,URI=\"seg0.part1.m4s\"\n\
#EXTINF:1.0,\n\
seg0.m4s\n\
#EXT-X-PART:DURATION=0.33,URI=\"seg1.part0.m4s\",INDEPENDENT=YES\n\
#EXT-X-PRELOAD-HINT:TYPE=PART,URI=\"seg1.part1.m4s\"\n\
#EXT-X-RENDITION-REPORT:URI=\"../low/live.m3u8\",LAST-MSN=0,LAST-PART=1\n";
        let Manifest::Media(m) = parse(text).unwrap() else {
            panic!("expected media playlist");
        };
        assert_eq!(m.part_inf.unwrap().part_target, 0.33);
        assert!(m.server_control.unwrap().can_block_reload);
        assert_eq!(m.segments[0].parts.len(), 2);
        assert!(m.segments[0].parts[0].independent);
        assert_eq!(m.pending_parts.len(), 1);
        assert_eq!(m.preload_hints.len(), 1);
        assert_eq!(m.rendition_reports[0].last_msn, Some(0));
    }

    #[test]
    fn uri_without_extinf_is_an_error() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:6\nstray.ts\n";
        assert_eq!(
            parse(text).unwrap_err(),
            ParseError::UnexpectedToken { line: 3, col: 1 }
        );
    }

    #[test]
    fn extinf_without_uri_is_an_error() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.0,\n";
        assert_eq!(
            parse(text).unwrap_err(),
            ParseError::SegmentWithoutUri { line: 3 }
        );
    }

    #[test]
    fn fractional_duration_below_v3_is_a_version_mismatch() {
        let text = "#EXTM3U\n\
#EXT-X-VERSION:2\n\
#EXT-X-TARGETDURATION:6\n\
#EXTINF:6.006,\n\
s0.ts\n";
        assert!(matches!(
            parse(text).unwrap_err(),
            ParseError::VersionFeatureMismatch { required: 3, .. }
        ));
    }

    #[test]
    fn unknown_tags_are_preserved() {
        let text = "#EXTM3U\n\
#EXT-X-TARGETDURATION:6\n\
#EXT-X-CUE-OUT:30\n\
#EXTINF:6,\n\
s0.ts\n";
        let Manifest::Media(m) = parse(text).unwrap() else {
            panic!("expected media playlist");
        };
        assert_eq!(m.unknown_tags.len(), 1);
        assert_eq!(m.unknown_tags[0].tag, "EXT-X-CUE-OUT");
        assert_eq!(m.unknown_tags[0].rest.as_deref(), Some("30"));
    }

    #[test]
    fn missing_required_attribute_is_reported() {
        let text = "#EXTM3U\n#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\"\n";
        assert_eq!(
            parse(text).unwrap_err(),
            ParseError::MissingRequiredAttribute {
                tag: "EXT-X-MEDIA",
                attr: "NAME"
            }
        );
    }

    #[test]
    fn media_tags_inside_a_master_are_rejected() {
        // EXT-X-MEDIA routes this to the master parser, where the
        // segment-scoped EXTINF has nothing to attach to
        let text = "#EXTM3U\n\
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"en\"\n\
#EXTINF:6.0,\n";
        assert_eq!(
            parse(text).unwrap_err(),
            ParseError::UnexpectedToken { line: 3, col: 1 }
        );
    }

    #[test]
    fn every_tag_has_one_table_entry() {
        for tag in TAG_TABLE {
            assert_eq!(
                TAG_TABLE.iter().filter(|t| t.name == tag.name).count(),
                1,
                "{} appears more than once",
                tag.name
            );
        }
    }

    #[test]
    fn daterange_client_attributes_survive() {
        let text = "#EXTM3U\n\
#EXT-X-TARGETDURATION:6\n\
#EXT-X-DATERANGE:ID=\"ad-1\",START-DATE=\"2026-01-01T00:00:00.000+00:00\",X-AD-ID=\"abc\"\n\
#EXTINF:6,\n\
s0.ts\n";
        let Manifest::Media(m) = parse(text).unwrap() else {
            panic!("expected media playlist");
        };
        let dr = &m.segments[0].date_ranges[0];
        assert_eq!(dr.id, "ad-1");
        assert_eq!(dr.client_attributes, vec![("X-AD-ID".to_string(), "abc".to_string())]);
    }
}
