//! Container and bitstream layers: NAL access units, fMP4 and MPEG-TS.

pub mod mp4;
pub mod mpegts;
pub mod nal;
