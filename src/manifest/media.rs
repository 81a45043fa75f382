use super::types::{
    ByteRange, DateRange, Definition, EncryptionKey, ExtTag, MapTag, PartInf, PartialSegment,
    PlaylistType, PreloadHint, RenditionReport, ServerControl, Skip, StartOffset,
};
use chrono::{DateTime, FixedOffset};

/// One media segment and the tags applied to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub uri: String,
    /// Seconds; fractional only when the playlist declares version >= 3.
    pub duration: f64,
    pub title: Option<String>,
    pub byte_range: Option<ByteRange>,
    /// Media initialization section in force for this segment.
    pub map: Option<MapTag>,
    /// Encryption key in force for this segment (copied, not shared).
    pub key: Option<EncryptionKey>,
    pub discontinuity: bool,
    pub program_date_time: Option<DateTime<FixedOffset>>,
    /// Date ranges declared immediately before this segment.
    pub date_ranges: Vec<DateRange>,
    pub gap: bool,
    pub bitrate: Option<u64>,
    /// LL-HLS partial segments that make up this segment, in order.
    pub parts: Vec<PartialSegment>,
}

impl Segment {
    pub fn new(uri: impl Into<String>, duration: f64) -> Self {
        Self {
            uri: uri.into(),
            duration,
            title: None,
            byte_range: None,
            map: None,
            key: None,
            discontinuity: false,
            program_date_time: None,
            date_ranges: Vec::new(),
            gap: false,
            bitrate: None,
            parts: Vec::new(),
        }
    }
}

/// A media playlist: an ordered list of segments plus playlist-scoped state.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub version: Option<u8>,
    /// `#EXT-X-TARGETDURATION`, positive integer seconds.
    pub target_duration: u64,
    pub media_sequence: u64,
    pub discontinuity_sequence: u64,
    pub playlist_type: Option<PlaylistType>,
    pub end_list: bool,
    pub i_frames_only: bool,
    pub independent_segments: bool,
    pub start: Option<StartOffset>,
    pub variables: Vec<Definition>,
    pub server_control: Option<ServerControl>,
    pub part_inf: Option<PartInf>,
    pub skip: Option<Skip>,
    pub segments: Vec<Segment>,
    /// Completed partials of the not-yet-complete segment at the live edge.
    pub pending_parts: Vec<PartialSegment>,
    pub preload_hints: Vec<PreloadHint>,
    pub rendition_reports: Vec<RenditionReport>,
    pub unknown_tags: Vec<ExtTag>,
}

impl Default for MediaPlaylist {
    fn default() -> Self {
        Self {
            version: None,
            target_duration: 0,
            media_sequence: 0,
            discontinuity_sequence: 0,
            playlist_type: None,
            end_list: false,
            i_frames_only: false,
            independent_segments: false,
            start: None,
            variables: Vec::new(),
            server_control: None,
            part_inf: None,
            skip: None,
            segments: Vec::new(),
            pending_parts: Vec::new(),
            preload_hints: Vec::new(),
            rendition_reports: Vec::new(),
            unknown_tags: Vec::new(),
        }
    }
}

impl MediaPlaylist {
    pub fn builder() -> MediaPlaylistBuilder {
        MediaPlaylistBuilder::default()
    }

    /// Total seconds of content in the listed full segments.
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }

    /// MSN of the last listed segment, if any.
    pub fn last_msn(&self) -> Option<u64> {
        let skipped = self.skip.as_ref().map(|s| s.skipped_segments).unwrap_or(0);
        let n = self.segments.len() as u64 + skipped;
        n.checked_sub(1).map(|i| self.media_sequence + i)
    }

    /// True when the playlist uses any low-latency feature.
    pub fn is_low_latency(&self) -> bool {
        self.part_inf.is_some()
            || self.server_control.is_some()
            || !self.pending_parts.is_empty()
            || !self.preload_hints.is_empty()
            || self.segments.iter().any(|s| !s.parts.is_empty())
    }

    /// The lowest protocol version the declared features require.
    pub fn required_version(&self) -> u8 {
        let mut v = 1;
        if self
            .segments
            .iter()
            .any(|s| (s.duration - s.duration.round()).abs() > f64::EPSILON)
        {
            v = v.max(3);
        }
        if self.segments.iter().any(|s| s.byte_range.is_some()) {
            v = v.max(4);
        }
        if self.i_frames_only {
            v = v.max(4);
        }
        for key in self.segments.iter().filter_map(|s| s.key.as_ref()) {
            if key.iv.is_some() {
                v = v.max(2);
            }
            if key.key_format.is_some() || key.key_format_versions.is_some() {
                v = v.max(5);
            }
        }
        if !self.i_frames_only && self.segments.iter().any(|s| s.map.is_some()) {
            v = v.max(6);
        }
        if !self.variables.is_empty() {
            v = v.max(8);
        }
        if self.is_low_latency() || self.skip.is_some() {
            v = v.max(9);
        }
        v
    }
}

/// Chained construction for [`MediaPlaylist`], used by the publishers.
#[derive(Default)]
pub struct MediaPlaylistBuilder {
    playlist: MediaPlaylist,
}

impl MediaPlaylistBuilder {
    pub fn version(mut self, v: u8) -> Self {
        self.playlist.version = Some(v);
        self
    }

    pub fn target_duration(mut self, secs: u64) -> Self {
        self.playlist.target_duration = secs;
        self
    }

    pub fn media_sequence(mut self, msn: u64) -> Self {
        self.playlist.media_sequence = msn;
        self
    }

    pub fn playlist_type(mut self, t: PlaylistType) -> Self {
        self.playlist.playlist_type = Some(t);
        self
    }

    pub fn end_list(mut self, end: bool) -> Self {
        self.playlist.end_list = end;
        self
    }

    pub fn independent_segments(mut self, v: bool) -> Self {
        self.playlist.independent_segments = v;
        self
    }

    pub fn part_inf(mut self, part_target: f64) -> Self {
        self.playlist.part_inf = Some(PartInf { part_target });
        self
    }

    pub fn server_control(mut self, sc: ServerControl) -> Self {
        self.playlist.server_control = Some(sc);
        self
    }

    pub fn segment(mut self, segment: Segment) -> Self {
        self.playlist.segments.push(segment);
        self
    }

    pub fn segments(mut self, segments: impl IntoIterator<Item = Segment>) -> Self {
        self.playlist.segments.extend(segments);
        self
    }

    pub fn build(self) -> MediaPlaylist {
        self.playlist
    }
}
