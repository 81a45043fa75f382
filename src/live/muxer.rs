//! Turns segmenter output into segment bytes, in either container.
//!
//! The segmenter decides boundaries; these muxers only package the frames
//! of one finished segment or partial. Both keep the little timing state a
//! container needs across segments (decode time, continuity counters) and
//! are otherwise pure.

use super::segmenter::{FrameKind, MediaFrame};
use crate::media::mp4::{Fmp4Writer, Mp4Sample, PsshBox, TrackConfig};
use crate::media::mpegts::{AdtsConfig, TsWriter};
use crate::media::nal::{annex_b_to_length_prefixed, VideoCodec};

/// 90 kHz, the HLS-conventional track timescale.
pub const DEFAULT_TIMESCALE: u32 = 90_000;

fn ticks(seconds: f64, timescale: u32) -> u64 {
    (seconds * f64::from(timescale)).round() as u64
}

/// Packages video frames into CMAF fMP4 media segments.
pub struct Fmp4SegmentMuxer {
    writer: Fmp4Writer,
    codec: VideoCodec,
    /// Fallback sample duration when a segment has a single frame.
    default_sample_duration: u32,
}

impl Fmp4SegmentMuxer {
    pub fn new(config: TrackConfig, codec: VideoCodec, frame_rate: f64) -> Self {
        let timescale = config.timescale;
        let default_sample_duration = if frame_rate > 0.0 {
            (f64::from(timescale) / frame_rate).round() as u32
        } else {
            timescale / 30
        };
        Self {
            writer: Fmp4Writer::new(config),
            codec,
            default_sample_duration,
        }
    }

    pub fn init_segment(&self, pssh: &[PsshBox]) -> Vec<u8> {
        self.writer.init_segment(pssh)
    }

    /// Package one segment's (or partial's) video frames.
    ///
    /// `msn` feeds the one-based `mfhd` sequence number; decode time comes
    /// from the first frame's DTS.
    pub fn write_segment(&mut self, msn: u64, frames: &[MediaFrame]) -> Vec<u8> {
        let timescale = self.writer.config().timescale;
        let video: Vec<&MediaFrame> = frames
            .iter()
            .filter(|f| matches!(f.kind, FrameKind::Video { .. }))
            .collect();

        let mut samples = Vec::with_capacity(video.len());
        for (i, frame) in video.iter().enumerate() {
            let duration = match video.get(i + 1) {
                Some(next) => ticks(next.dts - frame.dts, timescale) as u32,
                None => self.default_sample_duration,
            };
            samples.push(Mp4Sample {
                data: annex_b_to_length_prefixed(self.codec, &frame.data),
                duration,
                is_keyframe: frame.is_video_keyframe(),
                cts_offset: (ticks(frame.pts, timescale) as i64
                    - ticks(frame.dts, timescale) as i64) as i32,
                subsamples: None,
            });
        }

        let decode_time = video
            .first()
            .map(|f| ticks(f.dts, timescale))
            .unwrap_or_default();
        self.writer
            .media_segment(msn as u32 + 1, decode_time, &samples)
    }
}

/// Packages segment frames into MPEG-TS, video and audio interleaved.
pub struct TsSegmentMuxer {
    writer: TsWriter,
    adts: Option<AdtsConfig>,
}

impl TsSegmentMuxer {
    /// `adts` describes the audio frames; pass `None` for video-only
    /// streams or when frames already carry ADTS headers.
    pub fn new(codec: VideoCodec, adts: Option<AdtsConfig>) -> Self {
        Self {
            writer: TsWriter::new(codec, adts.is_some()),
            adts,
        }
    }

    pub fn write_segment(&mut self, frames: &[MediaFrame]) -> Vec<u8> {
        let mut out = Vec::new();
        self.writer.start_segment(&mut out);
        for frame in frames {
            let pts = ticks(frame.pts, DEFAULT_TIMESCALE);
            let dts = ticks(frame.dts, DEFAULT_TIMESCALE);
            match frame.kind {
                FrameKind::Video { is_keyframe } => {
                    self.writer
                        .write_video(&mut out, pts, dts, &frame.data, is_keyframe);
                }
                FrameKind::Audio => match &self.adts {
                    Some(cfg) => {
                        let framed = cfg.frame(&frame.data);
                        self.writer.write_audio(&mut out, pts, &framed);
                    }
                    None => self.writer.write_audio(&mut out, pts, &frame.data),
                },
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::mp4::{find_path, read_boxes, SampleEntry};
    use bytes::Bytes;

    fn video_frame(pts: f64, key: bool) -> MediaFrame {
        let mut data = vec![0, 0, 0, 1, if key { 0x65 } else { 0x41 }];
        data.extend_from_slice(&[0xaa; 32]);
        MediaFrame {
            kind: FrameKind::Video { is_keyframe: key },
            pts,
            dts: pts,
            data: Bytes::from(data),
        }
    }

    fn track() -> TrackConfig {
        TrackConfig {
            track_id: 1,
            timescale: DEFAULT_TIMESCALE,
            entry: SampleEntry::H264 {
                width: 640,
                height: 360,
                sps: vec![vec![0x67, 0x42, 0xc0, 0x1e]],
                pps: vec![vec![0x68, 0xce]],
            },
        }
    }

    #[test]
    fn fmp4_segment_counts_samples_and_time() {
        let mut muxer = Fmp4SegmentMuxer::new(track(), VideoCodec::H264, 30.0);
        let frames: Vec<MediaFrame> = (0..30)
            .map(|i| video_frame(1.0 + i as f64 / 30.0, i == 0))
            .collect();

        let seg = muxer.write_segment(0, &frames);
        let boxes = read_boxes(&seg).unwrap();
        let types: Vec<String> = boxes.iter().map(|b| b.type_str()).collect();
        assert_eq!(types, vec!["styp", "moof", "mdat"]);

        let tfdt = find_path(&seg, "moof/traf/tfdt").unwrap();
        let (_, _, payload) = tfdt.full_box_payload().unwrap();
        assert_eq!(
            u64::from_be_bytes(payload[..8].try_into().unwrap()),
            90_000
        );

        let trun = find_path(&seg, "moof/traf/trun").unwrap();
        let (_, _, payload) = trun.full_box_payload().unwrap();
        assert_eq!(u32::from_be_bytes(payload[..4].try_into().unwrap()), 30);

        // mdat holds length-prefixed NALs
        let mdat = boxes.last().unwrap();
        let first_len = u32::from_be_bytes(mdat.data[..4].try_into().unwrap());
        assert_eq!(first_len, 33); // header byte + 32 payload bytes
    }

    #[test]
    fn ts_segment_is_packet_aligned_and_self_contained() {
        let mut muxer = TsSegmentMuxer::new(VideoCodec::H264, None);
        let frames = vec![video_frame(0.0, true), video_frame(1.0 / 30.0, false)];
        let seg = muxer.write_segment(&frames);

        assert_eq!(seg.len() % 188, 0);
        assert_eq!(seg[0], 0x47);
        // PAT first, so every segment decodes on its own
        assert_eq!(seg[1] & 0x1f, 0);
        assert_eq!(seg[2], 0);
    }

    #[test]
    fn audio_frames_gain_adts_headers() {
        let cfg = AdtsConfig {
            object_type: 2,
            sample_rate_index: AdtsConfig::sample_rate_index_for(48_000).unwrap(),
            channels: 2,
        };
        let mut muxer = TsSegmentMuxer::new(VideoCodec::H264, Some(cfg));
        let frames = vec![
            video_frame(0.0, true),
            MediaFrame {
                kind: FrameKind::Audio,
                pts: 0.0,
                dts: 0.0,
                data: Bytes::from(vec![0x11; 200]),
            },
        ];
        let seg = muxer.write_segment(&frames);
        // the ADTS sync word appears in the audio PES payload
        assert!(seg.windows(2).any(|w| w == [0xff, 0xf1]));
    }
}
