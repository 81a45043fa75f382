use super::types::{
    ContentSteering, Definition, EncryptionKey, ExtTag, HdcpLevel, Resolution, SessionData,
    StartOffset, VideoRange,
};

/// `TYPE=` of an `#EXT-X-MEDIA` rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Audio,
    Video,
    Subtitles,
    ClosedCaptions,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Audio => "AUDIO",
            MediaType::Video => "VIDEO",
            MediaType::Subtitles => "SUBTITLES",
            MediaType::ClosedCaptions => "CLOSED-CAPTIONS",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "AUDIO" => MediaType::Audio,
            "VIDEO" => MediaType::Video,
            "SUBTITLES" => MediaType::Subtitles,
            "CLOSED-CAPTIONS" => MediaType::ClosedCaptions,
            _ => return None,
        })
    }
}

/// An alternative rendition (`#EXT-X-MEDIA`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendition {
    pub media_type: MediaType,
    pub group_id: String,
    pub name: String,
    pub language: Option<String>,
    pub assoc_language: Option<String>,
    /// Absent for closed captions, which live inside the media stream.
    pub uri: Option<String>,
    pub default: bool,
    pub autoselect: bool,
    /// Only meaningful for subtitles.
    pub forced: bool,
    /// `CC1`..`CC4` or `SERVICEn`; closed captions only.
    pub instream_id: Option<String>,
    pub characteristics: Option<String>,
    pub channels: Option<String>,
}

impl Rendition {
    pub fn new(media_type: MediaType, group_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            media_type,
            group_id: group_id.into(),
            name: name.into(),
            language: None,
            assoc_language: None,
            uri: None,
            default: false,
            autoselect: false,
            forced: false,
            instream_id: None,
            characteristics: None,
            channels: None,
        }
    }
}

/// `CLOSED-CAPTIONS=` on a variant: either a group id or the literal `NONE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClosedCaptions {
    GroupId(String),
    None,
}

/// A bitrate ladder entry (`#EXT-X-STREAM-INF` + URI line).
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub uri: String,
    pub bandwidth: u64,
    pub average_bandwidth: Option<u64>,
    /// Opaque comma-joined codec list.
    pub codecs: Option<String>,
    pub supplemental_codecs: Option<String>,
    pub resolution: Option<Resolution>,
    pub frame_rate: Option<f64>,
    pub hdcp_level: Option<HdcpLevel>,
    pub video_range: Option<VideoRange>,
    /// Rendition group references by GROUP-ID.
    pub audio: Option<String>,
    pub video: Option<String>,
    pub subtitles: Option<String>,
    pub closed_captions: Option<ClosedCaptions>,
}

impl Variant {
    pub fn new(uri: impl Into<String>, bandwidth: u64) -> Self {
        Self {
            uri: uri.into(),
            bandwidth,
            average_bandwidth: None,
            codecs: None,
            supplemental_codecs: None,
            resolution: None,
            frame_rate: None,
            hdcp_level: None,
            video_range: None,
            audio: None,
            video: None,
            subtitles: None,
            closed_captions: None,
        }
    }
}

/// `#EXT-X-I-FRAME-STREAM-INF`; the URI is an attribute, not a line.
#[derive(Debug, Clone, PartialEq)]
pub struct IFrameVariant {
    pub uri: String,
    pub bandwidth: u64,
    pub average_bandwidth: Option<u64>,
    pub codecs: Option<String>,
    pub resolution: Option<Resolution>,
    pub hdcp_level: Option<HdcpLevel>,
    pub video_range: Option<VideoRange>,
    pub video: Option<String>,
}

/// A multivariant (master) playlist.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MasterPlaylist {
    pub version: Option<u8>,
    pub independent_segments: bool,
    pub start: Option<StartOffset>,
    pub variables: Vec<Definition>,
    pub variants: Vec<Variant>,
    pub i_frame_variants: Vec<IFrameVariant>,
    pub renditions: Vec<Rendition>,
    pub session_data: Vec<SessionData>,
    pub session_keys: Vec<EncryptionKey>,
    pub content_steering: Option<ContentSteering>,
    pub unknown_tags: Vec<ExtTag>,
}

impl MasterPlaylist {
    /// Renditions belonging to a `(TYPE, GROUP-ID)` pair.
    pub fn group<'a>(
        &'a self,
        media_type: MediaType,
        group_id: &'a str,
    ) -> impl Iterator<Item = &'a Rendition> + 'a {
        self.renditions
            .iter()
            .filter(move |r| r.media_type == media_type && r.group_id == group_id)
    }

    /// The lowest protocol version the declared features require.
    pub fn required_version(&self) -> u8 {
        let mut v = 1;
        if !self.variables.is_empty() {
            v = v.max(8);
        }
        for key in &self.session_keys {
            if key.iv.is_some() {
                v = v.max(2);
            }
            if key.key_format.is_some() || key.key_format_versions.is_some() {
                v = v.max(5);
            }
        }
        if self
            .renditions
            .iter()
            .any(|r| matches!(&r.instream_id, Some(id) if id.starts_with("SERVICE")))
        {
            v = v.max(7);
        }
        v
    }
}
