//! Live recording to VOD playlist conversion.

use super::recorder::RecordedSegment;
use crate::manifest::{MapTag, MediaPlaylist, PlaylistType, Segment};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VodConvertOptions {
    /// Rewrite segment URIs from `filename_template`, numbering from zero.
    pub renumber_segments: bool,
    pub include_date_time: bool,
    pub preserve_discontinuities: bool,
    /// Used when renumbering; `{index}` is replaced.
    pub filename_template: String,
    pub init_segment_filename: Option<String>,
    pub version: Option<u8>,
}

impl Default for VodConvertOptions {
    fn default() -> Self {
        Self {
            renumber_segments: false,
            include_date_time: false,
            preserve_discontinuities: true,
            filename_template: "seg{index}.m4s".to_string(),
            init_segment_filename: None,
            version: None,
        }
    }
}

/// Builds the final VOD playlist from the recorded segment list.
pub struct LiveToVodConverter {
    options: VodConvertOptions,
}

impl LiveToVodConverter {
    pub fn new(options: VodConvertOptions) -> Self {
        Self { options }
    }

    pub fn convert(&self, recorded: &[RecordedSegment]) -> MediaPlaylist {
        let target_duration = recorded
            .iter()
            .map(|s| s.duration)
            .fold(0.0f64, f64::max)
            .ceil() as u64;

        let map = self
            .options
            .init_segment_filename
            .as_ref()
            .map(|uri| MapTag {
                uri: uri.clone(),
                byte_range: None,
            });

        let mut pl = MediaPlaylist {
            target_duration,
            playlist_type: Some(PlaylistType::Vod),
            end_list: true,
            independent_segments: true,
            ..Default::default()
        };

        for (i, rec) in recorded.iter().enumerate() {
            let uri = if self.options.renumber_segments {
                self.options
                    .filename_template
                    .replace("{index}", &i.to_string())
            } else {
                rec.filename.clone()
            };
            let mut seg = Segment::new(uri, rec.duration);
            seg.map = map.clone();
            if self.options.preserve_discontinuities {
                seg.discontinuity = rec.discontinuity;
            }
            if self.options.include_date_time {
                seg.program_date_time = rec.program_date_time.map(|t| t.fixed_offset());
            }
            pl.segments.push(seg);
        }

        pl.version = Some(
            self.options
                .version
                .unwrap_or_else(|| pl.required_version().max(3)),
        );
        pl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn recorded(n: usize, duration: f64) -> Vec<RecordedSegment> {
        (0..n)
            .map(|i| RecordedSegment {
                index: i as u64,
                filename: format!("live-{i}.m4s"),
                duration,
                discontinuity: false,
                program_date_time: Some(Utc::now()),
                sha256: [0; 32],
                size: 1000,
            })
            .collect()
    }

    #[test]
    fn target_duration_is_ceiled_max() {
        let converter = LiveToVodConverter::new(VodConvertOptions::default());
        let pl = converter.convert(&recorded(3, 6.006));
        assert_eq!(pl.target_duration, 7);
        assert_eq!(pl.playlist_type, Some(PlaylistType::Vod));
        assert!(pl.end_list);
        assert_eq!(pl.segments.len(), 3);
    }

    #[test]
    fn renumbering_applies_the_template() {
        let converter = LiveToVodConverter::new(VodConvertOptions {
            renumber_segments: true,
            filename_template: "vod_{index}.m4s".to_string(),
            ..Default::default()
        });
        let pl = converter.convert(&recorded(2, 4.0));
        assert_eq!(pl.segments[0].uri, "vod_0.m4s");
        assert_eq!(pl.segments[1].uri, "vod_1.m4s");
    }

    #[test]
    fn init_segment_becomes_a_map_tag() {
        let converter = LiveToVodConverter::new(VodConvertOptions {
            init_segment_filename: Some("init.mp4".to_string()),
            ..Default::default()
        });
        let pl = converter.convert(&recorded(1, 6.0));
        assert_eq!(pl.segments[0].map.as_ref().unwrap().uri, "init.mp4");
        // MAP outside I-frames-only needs version 6
        assert_eq!(pl.version, Some(6));
    }

    #[test]
    fn date_time_is_opt_in() {
        let without = LiveToVodConverter::new(VodConvertOptions::default())
            .convert(&recorded(1, 6.0));
        assert!(without.segments[0].program_date_time.is_none());

        let with = LiveToVodConverter::new(VodConvertOptions {
            include_date_time: true,
            ..Default::default()
        })
        .convert(&recorded(1, 6.0));
        assert!(with.segments[0].program_date_time.is_some());
    }
}
