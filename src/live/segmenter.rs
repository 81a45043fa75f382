//! Frame-level live segmentation.
//!
//! Frames are buffered in a bounded ring; a segment closes at the first
//! keyframe after the target duration elapses, a partial closes whenever
//! the part target elapses. The buffer never drops frames silently: when
//! it is full the producer sees [`SegmentationError::RingBufferOverflow`].

use crate::media::mp4::Mp4Error;
use bytes::Bytes;
use log::{debug, trace};
use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("live frame buffer is full")]
    RingBufferOverflow,
    #[error("video must start with a keyframe")]
    FrameWithoutKeyframe,
    #[error(transparent)]
    Container(#[from] Mp4Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Video { is_keyframe: bool },
    Audio,
}

/// One encoded frame entering the live pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFrame {
    pub kind: FrameKind,
    /// Presentation time in seconds from stream start.
    pub pts: f64,
    /// Decode time in seconds from stream start.
    pub dts: f64,
    pub data: Bytes,
}

impl MediaFrame {
    pub fn is_video_keyframe(&self) -> bool {
        matches!(self.kind, FrameKind::Video { is_keyframe: true })
    }
}

/// A finished partial segment and the frames it owns.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedPartial {
    /// Index within the parent segment, dense from zero.
    pub index: u64,
    pub duration: f64,
    /// Starts with a keyframe, so it can be a decoder re-entry point.
    pub independent: bool,
    pub frames: Vec<MediaFrame>,
}

/// A finished full segment.
///
/// With partials enabled the frames were already handed out through
/// [`CompletedPartial`] events and `frames` is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedSegment {
    pub index: u64,
    pub duration: f64,
    pub partial_count: u64,
    pub frames: Vec<MediaFrame>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SegmenterEvent {
    Partial(CompletedPartial),
    Segment(CompletedSegment),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmenterConfig {
    pub target_duration: f64,
    /// Enables LL-HLS partial production when set.
    pub part_target: Option<f64>,
    /// Ring buffer capacity in frames.
    pub capacity: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            target_duration: 6.0,
            part_target: None,
            capacity: 1024,
        }
    }
}

/// Splits a live frame stream into segments and partials.
pub struct LiveSegmenter {
    config: SegmenterConfig,
    buffer: HeapRb<MediaFrame>,
    segment_index: u64,
    partial_index: u64,
    segment_start: f64,
    partial_start: f64,
    /// Next partial begins on a keyframe.
    next_partial_independent: bool,
    started: bool,
    has_video: bool,
}

impl LiveSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            config,
            buffer: HeapRb::new(capacity),
            segment_index: 0,
            partial_index: 0,
            segment_start: 0.0,
            partial_start: 0.0,
            next_partial_independent: false,
            started: false,
            has_video: false,
        }
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    pub fn buffered_frames(&self) -> usize {
        self.buffer.occupied_len()
    }

    /// Ingest one frame; returns the segmentation events it triggered, in
    /// order (a partial close may immediately precede a segment close).
    pub fn push_frame(&mut self, frame: MediaFrame) -> Result<Vec<SegmenterEvent>, SegmentationError> {
        let mut events = Vec::new();

        if !self.started {
            if matches!(frame.kind, FrameKind::Video { is_keyframe: false }) {
                return Err(SegmentationError::FrameWithoutKeyframe);
            }
            self.started = true;
            self.segment_start = frame.pts;
            self.partial_start = frame.pts;
        }
        if matches!(frame.kind, FrameKind::Video { .. }) {
            self.has_video = true;
        }

        // boundary decisions happen before the frame is buffered, so the
        // closing frame starts the next segment
        let is_key = frame.is_video_keyframe();
        let is_video = matches!(frame.kind, FrameKind::Video { .. });
        if is_video && self.buffer.occupied_len() > 0 {
            let segment_elapsed = frame.pts - self.segment_start;
            let split_segment = is_key && segment_elapsed >= self.config.target_duration;

            if let Some(part_target) = self.config.part_target {
                let partial_elapsed = frame.pts - self.partial_start;
                if partial_elapsed >= part_target || split_segment {
                    events.push(SegmenterEvent::Partial(self.close_partial(frame.pts)));
                    self.next_partial_independent = is_key;
                }
            }
            if split_segment {
                events.push(SegmenterEvent::Segment(self.close_segment(frame.pts)));
            }
        }

        self.buffer
            .try_push(frame)
            .map_err(|_| SegmentationError::RingBufferOverflow)?;
        Ok(events)
    }

    /// Flush the trailing segment at end of stream.
    pub fn finish(&mut self, end_pts: f64) -> Option<SegmenterEvent> {
        if !self.started || (self.buffer.occupied_len() == 0 && self.partial_index == 0) {
            return None;
        }
        Some(SegmenterEvent::Segment(self.close_segment(end_pts)))
    }

    fn close_partial(&mut self, boundary_pts: f64) -> CompletedPartial {
        let frames: Vec<MediaFrame> = self.buffer.pop_iter().collect();
        let partial = CompletedPartial {
            index: self.partial_index,
            duration: boundary_pts - self.partial_start,
            independent: if self.partial_index == 0 {
                true // a segment opens on a keyframe
            } else {
                self.next_partial_independent
            },
            frames,
        };
        trace!(
            "partial {}.{} closed [{:.3}s]",
            self.segment_index,
            partial.index,
            partial.duration
        );
        self.partial_index += 1;
        self.partial_start = boundary_pts;
        self.next_partial_independent = false;
        partial
    }

    fn close_segment(&mut self, boundary_pts: f64) -> CompletedSegment {
        // with partials enabled the buffer was drained by the partial that
        // closed on the same boundary, so this is normally empty then
        let frames: Vec<MediaFrame> = self.buffer.pop_iter().collect();

        let segment = CompletedSegment {
            index: self.segment_index,
            duration: boundary_pts - self.segment_start,
            partial_count: self.partial_index,
            frames,
        };
        debug!(
            "segment {} closed [{:.3}s, {} partials]",
            segment.index, segment.duration, segment.partial_count
        );
        self.segment_index += 1;
        self.partial_index = 0;
        self.segment_start = boundary_pts;
        self.partial_start = boundary_pts;
        segment
    }
}
