//! Rolling playlist publication for live output: sliding-window, DVR and
//! event flavors, plus master playlist assembly for the origin.

use crate::manifest::{write, MasterPlaylist, MediaPlaylist, PlaylistType, Resolution, Segment, Variant};
use crate::media::nal::SpsInfo;
use log::debug;
use std::collections::VecDeque;

/// Per-variant media playlist name inside its directory.
pub const VARIANT_PLAYLIST_NAME: &str = "live.m3u8";

/// What the origin knows about one encoded variant.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantDescriptor {
    /// Directory name of the variant, e.g. `720p`.
    pub name: String,
    /// Encoder bitrate; zero means unknown and a pessimistic value is
    /// derived from the raw pixel rate so ordering still works.
    pub bandwidth: u64,
    pub video: Option<SpsInfo>,
    pub frame_rate: Option<f64>,
    pub audio_codec: Option<String>,
}

impl VariantDescriptor {
    fn effective_bandwidth(&self) -> u64 {
        if self.bandwidth > 0 {
            return self.bandwidth;
        }
        match &self.video {
            // raw 4:2:0 pixel rate; wildly high, which keeps copy streams
            // sorted above encoded ladder entries
            Some(sps) => u64::from(sps.width) * u64::from(sps.height) * 12,
            None => 128_000,
        }
    }

    fn codecs(&self) -> Option<String> {
        let mut codecs = Vec::new();
        if let Some(sps) = &self.video {
            codecs.push(sps.codec_string());
        }
        if let Some(audio) = &self.audio_codec {
            codecs.push(audio.clone());
        }
        if codecs.is_empty() {
            None
        } else {
            Some(codecs.join(","))
        }
    }
}

/// Assemble the origin's master playlist, one row per live variant.
pub fn build_master(variants: &[VariantDescriptor]) -> MasterPlaylist {
    let mut master = MasterPlaylist {
        independent_segments: true,
        ..Default::default()
    };
    for v in variants {
        let mut row = Variant::new(
            format!("{}/{}", v.name, VARIANT_PLAYLIST_NAME),
            v.effective_bandwidth(),
        );
        row.codecs = v.codecs();
        row.frame_rate = v.frame_rate;
        row.resolution = v.video.as_ref().map(|s| Resolution {
            width: s.width,
            height: s.height,
        });
        master.variants.push(row);
    }
    master
        .variants
        .sort_by_key(|v| v.bandwidth);
    master
}

/// How the published playlist retains segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishMode {
    /// Keep at most `window_size` segments; old ones are evicted and the
    /// media sequence advances.
    SlidingWindow { window_size: usize },
    /// Keep a bounded DVR horizon in seconds; `None` keeps everything.
    Dvr { horizon_seconds: Option<u64> },
    /// `EXT-X-PLAYLIST-TYPE:EVENT`: append-only until the stream ends.
    Event,
}

/// Owns the value-level playlist the live pipeline publishes after every
/// segment.
pub struct PlaylistPublisher {
    mode: PublishMode,
    target_duration: u64,
    media_sequence: u64,
    discontinuity_sequence: u64,
    independent_segments: bool,
    segments: VecDeque<Segment>,
    ended: bool,
}

impl PlaylistPublisher {
    pub fn new(mode: PublishMode, target_duration: u64) -> Self {
        Self {
            mode,
            target_duration,
            media_sequence: 0,
            discontinuity_sequence: 0,
            independent_segments: true,
            segments: VecDeque::new(),
            ended: false,
        }
    }

    /// Resume from a previously published playlist so CDN caches keep
    /// working across restarts.
    pub fn with_media_sequence(mut self, media_sequence: u64) -> Self {
        self.media_sequence = media_sequence;
        self
    }

    pub fn mode(&self) -> PublishMode {
        self.mode
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn media_sequence(&self) -> u64 {
        self.media_sequence
    }

    /// Append a finished segment and evict per the publish mode. Evicted
    /// segments are returned so callers can delete the files.
    pub fn add_segment(&mut self, segment: Segment) -> Vec<Segment> {
        self.segments.push_back(segment);
        let mut evicted = Vec::new();

        match self.mode {
            PublishMode::SlidingWindow { window_size } => {
                while self.segments.len() > window_size.max(1) {
                    let seg = self.segments.pop_front().expect("len checked");
                    if seg.discontinuity {
                        self.discontinuity_sequence += 1;
                    }
                    self.media_sequence += 1;
                    evicted.push(seg);
                }
            }
            PublishMode::Dvr { horizon_seconds } => {
                if let Some(horizon) = horizon_seconds {
                    loop {
                        let total: f64 = self.segments.iter().map(|s| s.duration).sum();
                        if total <= horizon as f64 || self.segments.len() <= 1 {
                            break;
                        }
                        let seg = self.segments.pop_front().expect("len checked");
                        if seg.discontinuity {
                            self.discontinuity_sequence += 1;
                        }
                        self.media_sequence += 1;
                        evicted.push(seg);
                    }
                }
            }
            PublishMode::Event => {}
        }

        if !evicted.is_empty() {
            debug!(
                "evicted {} segments, media sequence now {}",
                evicted.len(),
                self.media_sequence
            );
        }
        evicted
    }

    /// Mark the stream finished; the playlist gains `EXT-X-ENDLIST`.
    pub fn end(&mut self) {
        self.ended = true;
    }

    /// Snapshot the current playlist value.
    pub fn playlist(&self) -> MediaPlaylist {
        let playlist_type = match self.mode {
            PublishMode::Event => Some(PlaylistType::Event),
            PublishMode::SlidingWindow { .. } | PublishMode::Dvr { .. } => None,
        };
        let mut pl = MediaPlaylist {
            target_duration: self.target_duration,
            media_sequence: self.media_sequence,
            discontinuity_sequence: self.discontinuity_sequence,
            playlist_type,
            end_list: self.ended,
            independent_segments: self.independent_segments,
            segments: self.segments.iter().cloned().collect(),
            ..Default::default()
        };
        pl.version = Some(pl.required_version().max(3));
        pl
    }

    pub fn render(&self) -> String {
        write::write_media(&self.playlist())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(i: usize) -> Segment {
        Segment::new(format!("seg{i}.m4s"), 6.0)
    }

    #[test]
    fn sliding_window_bounds_segment_count() {
        let mut p = PlaylistPublisher::new(PublishMode::SlidingWindow { window_size: 3 }, 6);
        let mut evicted_total = 0;
        for i in 0..10 {
            evicted_total += p.add_segment(seg(i)).len();
            assert!(p.segment_count() <= 3);
        }
        assert_eq!(evicted_total, 7);
        assert_eq!(p.media_sequence(), 7);
        assert!(p.render().contains("#EXT-X-MEDIA-SEQUENCE:7"));
    }

    #[test]
    fn dvr_horizon_is_duration_based() {
        let mut p = PlaylistPublisher::new(
            PublishMode::Dvr {
                horizon_seconds: Some(30),
            },
            6,
        );
        for i in 0..10 {
            p.add_segment(seg(i));
        }
        // 10 x 6s capped at 30s
        assert_eq!(p.segment_count(), 5);
    }

    #[test]
    fn event_playlist_keeps_everything_and_ends() {
        let mut p = PlaylistPublisher::new(PublishMode::Event, 6);
        for i in 0..10 {
            assert!(p.add_segment(seg(i)).is_empty());
        }
        p.end();
        let text = p.render();
        assert!(text.contains("#EXT-X-PLAYLIST-TYPE:EVENT"));
        assert!(text.contains("#EXT-X-ENDLIST"));
        assert_eq!(text.matches("#EXTINF").count(), 10);
    }

    #[test]
    fn master_rows_are_sorted_and_carry_codecs() {
        let sps = crate::media::nal::SpsInfo {
            profile_idc: 0x42,
            constraint_flags: 0xc0,
            level_idc: 0x1e,
            width: 1280,
            height: 720,
        };
        let variants = vec![
            VariantDescriptor {
                name: "720p".into(),
                bandwidth: 2_800_000,
                video: Some(sps),
                frame_rate: Some(30.0),
                audio_codec: Some("mp4a.40.2".into()),
            },
            VariantDescriptor {
                name: "audio".into(),
                bandwidth: 128_000,
                video: None,
                frame_rate: None,
                audio_codec: Some("mp4a.40.2".into()),
            },
        ];
        let master = build_master(&variants);
        assert_eq!(master.variants[0].uri, "audio/live.m3u8");
        assert_eq!(master.variants[1].uri, "720p/live.m3u8");
        assert_eq!(
            master.variants[1].codecs.as_deref(),
            Some("avc1.42c01e,mp4a.40.2")
        );
        assert_eq!(
            master.variants[1].resolution,
            Some(crate::manifest::Resolution {
                width: 1280,
                height: 720
            })
        );
        assert!(crate::validate::validate(&crate::manifest::Manifest::Master(master)).is_valid());
    }

    #[test]
    fn evicting_a_discontinuity_bumps_the_sequence() {
        let mut p = PlaylistPublisher::new(PublishMode::SlidingWindow { window_size: 2 }, 6);
        p.add_segment(seg(0));
        let mut disc = seg(1);
        disc.discontinuity = true;
        p.add_segment(disc);
        p.add_segment(seg(2));
        p.add_segment(seg(3)); // evicts the discontinuity segment
        assert!(p.render().contains("#EXT-X-DISCONTINUITY-SEQUENCE:1"));
    }
}
