//! The live pipeline: frame segmentation, rolling playlist publication and
//! the LL-HLS origin actor.

pub mod llhls;
pub mod muxer;
pub mod playlist;
pub mod segmenter;

pub use llhls::{
    BlockingPlaylistRequest, LlhlsConfig, LlhlsError, LlhlsManager, PartialRecord, SegmentRecord,
};
pub use muxer::{Fmp4SegmentMuxer, TsSegmentMuxer, DEFAULT_TIMESCALE};
pub use playlist::{
    build_master, PlaylistPublisher, PublishMode, VariantDescriptor, VARIANT_PLAYLIST_NAME,
};
pub use segmenter::{
    CompletedPartial, CompletedSegment, FrameKind, LiveSegmenter, MediaFrame, SegmenterConfig,
    SegmenterEvent, SegmentationError,
};
