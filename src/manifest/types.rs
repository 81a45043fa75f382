use chrono::{DateTime, FixedOffset};
use std::fmt::{Display, Formatter};

/// How media segments are encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionMethod {
    /// Segments are not encrypted (`METHOD=NONE`).
    #[default]
    None,
    /// Whole-segment AES-128-CBC with PKCS#7 padding.
    Aes128,
    /// Sample-based AES-CBC (FairPlay style).
    SampleAes,
    /// Sample-based AES-CTR (CENC / CBCS family).
    SampleAesCtr,
}

impl EncryptionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionMethod::None => "NONE",
            EncryptionMethod::Aes128 => "AES-128",
            EncryptionMethod::SampleAes => "SAMPLE-AES",
            EncryptionMethod::SampleAesCtr => "SAMPLE-AES-CTR",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "NONE" => EncryptionMethod::None,
            "AES-128" => EncryptionMethod::Aes128,
            "SAMPLE-AES" => EncryptionMethod::SampleAes,
            "SAMPLE-AES-CTR" => EncryptionMethod::SampleAesCtr,
            _ => return None,
        })
    }
}

impl Display for EncryptionMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `#EXT-X-KEY` / `#EXT-X-SESSION-KEY` attributes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncryptionKey {
    pub method: EncryptionMethod,
    pub uri: Option<String>,
    /// 16-byte IV carried as `IV=0x...`.
    pub iv: Option<[u8; 16]>,
    pub key_format: Option<String>,
    pub key_format_versions: Option<String>,
}

impl EncryptionKey {
    pub fn aes_128(uri: impl Into<String>) -> Self {
        Self {
            method: EncryptionMethod::Aes128,
            uri: Some(uri.into()),
            ..Default::default()
        }
    }
}

/// `#EXT-X-BYTERANGE` / `BYTERANGE=` value: `<n>[@<o>]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub length: u64,
    pub offset: Option<u64>,
}

impl Display for ByteRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.offset {
            Some(o) => write!(f, "{}@{}", self.length, o),
            None => write!(f, "{}", self.length),
        }
    }
}

impl ByteRange {
    pub fn parse(s: &str) -> Option<Self> {
        let mut it = s.splitn(2, '@');
        let length = it.next()?.parse().ok()?;
        let offset = match it.next() {
            Some(o) => Some(o.parse().ok()?),
            None => None,
        };
        Some(Self { length, offset })
    }
}

/// `#EXT-X-MAP` media initialization section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapTag {
    pub uri: String,
    pub byte_range: Option<ByteRange>,
}

/// `#EXT-X-PLAYLIST-TYPE` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistType {
    Vod,
    Event,
}

impl PlaylistType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaylistType::Vod => "VOD",
            PlaylistType::Event => "EVENT",
        }
    }
}

/// `#EXT-X-START` preferred playback start point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StartOffset {
    pub time_offset: f64,
    pub precise: bool,
}

/// `VIDEO-RANGE` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoRange {
    Sdr,
    Hlg,
    Pq,
}

impl VideoRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoRange::Sdr => "SDR",
            VideoRange::Hlg => "HLG",
            VideoRange::Pq => "PQ",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "SDR" => VideoRange::Sdr,
            "HLG" => VideoRange::Hlg,
            "PQ" => VideoRange::Pq,
            _ => return None,
        })
    }
}

/// `HDCP-LEVEL` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdcpLevel {
    None,
    Type0,
    Type1,
}

impl HdcpLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HdcpLevel::None => "NONE",
            HdcpLevel::Type0 => "TYPE-0",
            HdcpLevel::Type1 => "TYPE-1",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "NONE" => HdcpLevel::None,
            "TYPE-0" => HdcpLevel::Type0,
            "TYPE-1" => HdcpLevel::Type1,
            _ => return None,
        })
    }
}

/// `RESOLUTION=WxH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Display for Resolution {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl Resolution {
    pub fn parse(s: &str) -> Option<Self> {
        let (w, h) = s.split_once('x')?;
        Some(Self {
            width: w.parse().ok()?,
            height: h.parse().ok()?,
        })
    }
}

/// `#EXT-X-DEFINE` variable definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Definition {
    Inline { name: String, value: String },
    Import { name: String },
    QueryParam { name: String },
}

/// `#EXT-X-SERVER-CONTROL` delivery directives.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ServerControl {
    pub can_block_reload: bool,
    pub can_skip_until: Option<f64>,
    pub can_skip_dateranges: bool,
    pub hold_back: Option<f64>,
    pub part_hold_back: Option<f64>,
}

/// `#EXT-X-PART-INF`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartInf {
    pub part_target: f64,
}

/// `#EXT-X-PART` partial segment.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialSegment {
    pub uri: String,
    pub duration: f64,
    pub independent: bool,
    pub byte_range: Option<ByteRange>,
    pub gap: bool,
}

/// `#EXT-X-PRELOAD-HINT` hint type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadHintType {
    Part,
    Map,
}

impl PreloadHintType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreloadHintType::Part => "PART",
            PreloadHintType::Map => "MAP",
        }
    }
}

/// `#EXT-X-PRELOAD-HINT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadHint {
    pub hint_type: PreloadHintType,
    pub uri: String,
    pub byte_range_start: Option<u64>,
    pub byte_range_length: Option<u64>,
}

/// `#EXT-X-RENDITION-REPORT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenditionReport {
    pub uri: String,
    pub last_msn: Option<u64>,
    pub last_part: Option<u64>,
}

/// `#EXT-X-SKIP` delta playlist replacement for elided segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skip {
    pub skipped_segments: u64,
    pub recently_removed_dateranges: Option<String>,
}

/// `#EXT-X-SESSION-DATA`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionData {
    pub data_id: String,
    pub value: Option<String>,
    pub uri: Option<String>,
    pub language: Option<String>,
}

/// `#EXT-X-CONTENT-STEERING`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSteering {
    pub server_uri: String,
    pub pathway_id: Option<String>,
}

/// `#EXT-X-DATERANGE` metadata range.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DateRange {
    pub id: String,
    pub class: Option<String>,
    pub start_date: Option<DateTime<FixedOffset>>,
    pub end_date: Option<DateTime<FixedOffset>>,
    pub duration: Option<f64>,
    pub planned_duration: Option<f64>,
    pub end_on_next: bool,
    pub scte35_cmd: Option<String>,
    pub scte35_out: Option<String>,
    pub scte35_in: Option<String>,
    /// `X-`-prefixed client attributes, preserved in declaration order.
    pub client_attributes: Vec<(String, String)>,
}

/// A tag this crate does not model, preserved verbatim for round-trips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtTag {
    /// Full tag name without the leading `#`, e.g. `EXT-X-CUE-OUT`.
    pub tag: String,
    pub rest: Option<String>,
}

impl Display for ExtTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.tag)?;
        if let Some(rest) = &self.rest {
            write!(f, ":{}", rest)?;
        }
        Ok(())
    }
}
