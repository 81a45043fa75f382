//! Annex-B NAL scanning and access-unit assembly for H.264 and H.265.

use crate::bytesio::{BitReader, BytesError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NalError {
    #[error("no start code found in SPS payload")]
    MissingStartCode,
    #[error("SPS too short")]
    SpsTooShort,
    #[error(transparent)]
    Bits(#[from] BytesError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    H265,
}

impl VideoCodec {
    /// NAL type from the first header byte.
    pub(crate) fn nal_type(&self, header: u8) -> u8 {
        match self {
            VideoCodec::H264 => header & 0x1f,
            VideoCodec::H265 => (header >> 1) & 0x3f,
        }
    }

    pub(crate) fn is_vcl(&self, nal_type: u8) -> bool {
        match self {
            VideoCodec::H264 => (1..=5).contains(&nal_type),
            VideoCodec::H265 => nal_type <= 31,
        }
    }

    fn is_keyframe_nal(&self, nal_type: u8) -> bool {
        match self {
            VideoCodec::H264 => nal_type == 5,
            VideoCodec::H265 => (19..=21).contains(&nal_type),
        }
    }
}

/// H.264 parameter-set NAL types.
pub const H264_NAL_SPS: u8 = 7;
pub const H264_NAL_PPS: u8 = 8;
pub const H264_NAL_AUD: u8 = 9;

/// One decodable frame: its byte window in the scanned buffer plus the NAL
/// types it contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    /// Offset of the first start code of the unit.
    pub offset: usize,
    pub length: usize,
    pub is_keyframe: bool,
    pub nal_types: Vec<u8>,
}

/// One NAL located in an Annex-B buffer; the single source of truth for
/// start-code positions, shared with the sample encryptor.
pub(crate) struct NalRef {
    /// Offset of the start code introducing this NAL.
    pub(crate) start: usize,
    /// Offset of the first payload byte (after the start code).
    pub(crate) payload: usize,
    pub(crate) nal_type: u8,
}

pub(crate) fn scan_nals(codec: VideoCodec, data: &[u8]) -> Vec<NalRef> {
    let mut out = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let start = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };
            let payload = i + 3;
            if payload < data.len() {
                out.push(NalRef {
                    start,
                    payload,
                    nal_type: codec.nal_type(data[payload]),
                });
            }
            i = payload;
        } else {
            i += 1;
        }
    }
    out
}

/// Incremental Annex-B access-unit parser.
///
/// `parse` yields every access unit that is provably complete in the given
/// buffer and reports how many bytes it consumed; the caller keeps the tail
/// and prepends it to the next read. `flush` closes the final unit once the
/// stream ends.
pub struct AccessUnitParser {
    codec: VideoCodec,
}

impl AccessUnitParser {
    pub fn new(codec: VideoCodec) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> VideoCodec {
        self.codec
    }

    /// Scan `data` and return the complete access units plus the number of
    /// bytes consumed.
    ///
    /// An access unit is closed by its VCL NAL; it is only emitted once a
    /// further start code proves the VCL payload is complete.
    pub fn parse(&self, data: &[u8]) -> (Vec<AccessUnit>, usize) {
        let nals = scan_nals(self.codec, data);
        let mut units = Vec::new();

        let mut au_start: Option<usize> = None;
        let mut nal_types: Vec<u8> = Vec::new();
        let mut keyframe = false;
        let mut consumed = if let Some(first) = nals.first() {
            first.start
        } else {
            // no start code yet, nothing to consume
            return (units, 0);
        };

        for (i, nal) in nals.iter().enumerate() {
            let start = *au_start.get_or_insert(nal.start);
            nal_types.push(nal.nal_type);
            if self.codec.is_keyframe_nal(nal.nal_type) {
                keyframe = true;
            }
            if self.codec.is_vcl(nal.nal_type) {
                // closed by this VCL; complete only if another NAL follows
                if let Some(next) = nals.get(i + 1) {
                    units.push(AccessUnit {
                        offset: start,
                        length: next.start - start,
                        is_keyframe: keyframe,
                        nal_types: std::mem::take(&mut nal_types),
                    });
                    consumed = next.start;
                    au_start = None;
                    keyframe = false;
                }
            }
        }

        (units, consumed)
    }

    /// Close the trailing access unit at end of stream.
    pub fn flush(&self, data: &[u8]) -> Option<AccessUnit> {
        let nals = scan_nals(self.codec, data);
        let first = nals.first()?;
        let nal_types: Vec<u8> = nals.iter().map(|n| n.nal_type).collect();
        let is_keyframe = nal_types
            .iter()
            .any(|t| self.codec.is_keyframe_nal(*t));
        Some(AccessUnit {
            offset: first.start,
            length: data.len() - first.start,
            is_keyframe,
            nal_types,
        })
    }

    /// Extract the raw payloads (without start codes) of every NAL of the
    /// given type, e.g. to collect SPS/PPS for an `avcC` box.
    pub fn payloads_of_type<'a>(&self, data: &'a [u8], wanted: u8) -> Vec<&'a [u8]> {
        let nals = scan_nals(self.codec, data);
        let mut out = Vec::new();
        for (i, nal) in nals.iter().enumerate() {
            if nal.nal_type != wanted {
                continue;
            }
            let end = nals
                .get(i + 1)
                .map(|n| n.start)
                .unwrap_or(data.len());
            // strip trailing zero padding left by the next start code scan
            let mut slice = &data[nal.payload..end];
            while let [rest @ .., 0] = slice {
                slice = rest;
            }
            out.push(slice);
        }
        out
    }
}

/// Convert an Annex-B stream to 4-byte length-prefixed NAL units, the
/// sample layout fMP4 expects.
pub fn annex_b_to_length_prefixed(codec: VideoCodec, data: &[u8]) -> Vec<u8> {
    let nals = scan_nals(codec, data);
    let mut out = Vec::with_capacity(data.len());
    for (i, nal) in nals.iter().enumerate() {
        let end = nals.get(i + 1).map(|n| n.start).unwrap_or(data.len());
        let payload = &data[nal.payload..end];
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
    }
    out
}

/// Basic H.264 sequence-parameter-set fields used for codec strings and
/// variant attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpsInfo {
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub width: u32,
    pub height: u32,
}

impl SpsInfo {
    /// RFC 6381 codec string, e.g. `avc1.4d401f`.
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02x}{:02x}{:02x}",
            self.profile_idc, self.constraint_flags, self.level_idc
        )
    }
}

fn strip_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0u32;
    for &b in data {
        if zeros >= 2 && b == 3 {
            zeros = 0;
            continue;
        }
        if b == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        out.push(b);
    }
    out
}

/// Parse an H.264 SPS payload (without start code, including the NAL
/// header byte).
pub fn parse_h264_sps(payload: &[u8]) -> Result<SpsInfo, NalError> {
    if payload.len() < 4 {
        return Err(NalError::SpsTooShort);
    }
    let profile_idc = payload[1];
    let constraint_flags = payload[2];
    let level_idc = payload[3];

    let rbsp = strip_emulation_prevention(&payload[4..]);
    let mut r = BitReader::new(&rbsp);

    let _seq_parameter_set_id = r.read_ue()?;
    let mut chroma_format_idc = 1;
    let mut separate_colour_plane = 0;
    if matches!(profile_idc, 100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128) {
        chroma_format_idc = r.read_ue()?;
        if chroma_format_idc == 3 {
            separate_colour_plane = r.read_bit()?;
        }
        let _bit_depth_luma = r.read_ue()?;
        let _bit_depth_chroma = r.read_ue()?;
        let _qpprime = r.read_bit()?;
        let seq_scaling_matrix_present = r.read_bit()?;
        if seq_scaling_matrix_present == 1 {
            let lists = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..lists {
                if r.read_bit()? == 1 {
                    skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }
    let _log2_max_frame_num = r.read_ue()?;
    let pic_order_cnt_type = r.read_ue()?;
    if pic_order_cnt_type == 0 {
        let _log2_max_pic_order_cnt = r.read_ue()?;
    } else if pic_order_cnt_type == 1 {
        let _delta_pic_order_always_zero = r.read_bit()?;
        let _offset_for_non_ref_pic = r.read_se()?;
        let _offset_for_top_to_bottom = r.read_se()?;
        let cycles = r.read_ue()?;
        for _ in 0..cycles {
            let _offset = r.read_se()?;
        }
    }
    let _max_num_ref_frames = r.read_ue()?;
    let _gaps_allowed = r.read_bit()?;
    let pic_width_in_mbs = r.read_ue()? + 1;
    let pic_height_in_map_units = r.read_ue()? + 1;
    let frame_mbs_only = r.read_bit()?;
    if frame_mbs_only == 0 {
        let _mb_adaptive = r.read_bit()?;
    }
    let _direct_8x8 = r.read_bit()?;

    let mut width = pic_width_in_mbs as u32 * 16;
    let mut height = pic_height_in_map_units as u32 * 16 * (2 - frame_mbs_only as u32);

    let frame_cropping = r.read_bit()?;
    if frame_cropping == 1 {
        let left = r.read_ue()? as u32;
        let right = r.read_ue()? as u32;
        let top = r.read_ue()? as u32;
        let bottom = r.read_ue()? as u32;
        let chroma_array_type = if separate_colour_plane == 1 {
            0
        } else {
            chroma_format_idc
        };
        let (crop_x, crop_y) = match chroma_array_type {
            0 => (1, 2 - frame_mbs_only as u32),
            1 => (2, 2 * (2 - frame_mbs_only as u32)),
            2 => (2, 2 - frame_mbs_only as u32),
            _ => (1, 2 - frame_mbs_only as u32),
        };
        width -= (left + right) * crop_x;
        height -= (top + bottom) * crop_y;
    }

    Ok(SpsInfo {
        profile_idc,
        constraint_flags,
        level_idc,
        width,
        height,
    })
}

fn skip_scaling_list(r: &mut BitReader, size: usize) -> Result<(), BytesError> {
    let mut last_scale = 8i64;
    let mut next_scale = 8i64;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = r.read_se()?;
            next_scale = (last_scale + delta + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}
