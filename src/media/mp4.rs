//! ISO-14496-12 box reading and CMAF fMP4 writing.
//!
//! The reader is a thin borrowing walk over the box tree, enough to probe
//! brands and pull track parameters out of an init segment. The writer
//! produces an init segment (`ftyp` + `moov`) and independent media
//! segments (`styp` + `moof` + `mdat`) with a single track per file, the
//! shape HLS wants.

use crate::bytesio::{ByteReader, ByteWriter, BytesError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Mp4Error {
    #[error("input is not ISO-BMFF: {0}")]
    NotIsobmff(&'static str),
    #[error("truncated box {0:?}")]
    Truncated(String),
    #[error("missing box {0}")]
    Missing(&'static str),
    #[error(transparent)]
    Bytes(#[from] BytesError),
}

/// A borrowed box: type plus payload (children for containers).
#[derive(Debug, Clone, Copy)]
pub struct Mp4Box<'a> {
    pub box_type: [u8; 4],
    pub data: &'a [u8],
}

impl<'a> Mp4Box<'a> {
    pub fn type_str(&self) -> String {
        String::from_utf8_lossy(&self.box_type).into_owned()
    }

    pub fn children(&self) -> Result<Vec<Mp4Box<'a>>, Mp4Error> {
        read_boxes(self.data)
    }

    /// Skip the FullBox version/flags prefix.
    pub fn full_box_payload(&self) -> Result<(u8, u32, &'a [u8]), Mp4Error> {
        let mut r = ByteReader::new(self.data);
        let version = r.read_u8()?;
        let flags = r.read_u24()?;
        Ok((version, flags, &self.data[4..]))
    }
}

/// Read a flat sequence of boxes from `data`.
pub fn read_boxes(data: &[u8]) -> Result<Vec<Mp4Box<'_>>, Mp4Error> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        let mut r = ByteReader::new(&data[pos..]);
        let size32 = r.read_u32()?;
        let box_type = r.read_fourcc()?;
        let (header, size) = match size32 {
            0 => (8usize, data.len() - pos), // box extends to end of file
            1 => (16usize, r.read_u64()? as usize),
            n => (8usize, n as usize),
        };
        if size < header || pos + size > data.len() {
            return Err(Mp4Error::Truncated(
                String::from_utf8_lossy(&box_type).into_owned(),
            ));
        }
        out.push(Mp4Box {
            box_type,
            data: &data[pos + header..pos + size],
        });
        pos += size;
    }
    Ok(out)
}

/// Walk a `/`-separated path of box types, e.g. `moov/trak/mdia/mdhd`.
pub fn find_path<'a>(data: &'a [u8], path: &'static str) -> Result<Mp4Box<'a>, Mp4Error> {
    let mut current = data;
    let mut found = None;
    for name in path.split('/') {
        let boxes = read_boxes(current)?;
        let hit = boxes
            .into_iter()
            .find(|b| b.box_type == name.as_bytes()[..4])
            .ok_or(Mp4Error::Missing(path))?;
        current = hit.data;
        found = Some(hit);
    }
    found.ok_or(Mp4Error::Missing(path))
}

/// Track parameters recovered from an fMP4 init segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitInfo {
    pub major_brand: [u8; 4],
    pub track_id: u32,
    pub timescale: u32,
    /// `vide`, `soun` etc. from the handler box.
    pub handler: [u8; 4],
}

/// Probe an init segment for its track layout.
pub fn parse_init_info(data: &[u8]) -> Result<InitInfo, Mp4Error> {
    let boxes = read_boxes(data)?;
    let ftyp = boxes
        .iter()
        .find(|b| &b.box_type == b"ftyp")
        .ok_or(Mp4Error::NotIsobmff("no ftyp box"))?;
    let mut r = ByteReader::new(ftyp.data);
    let major_brand = r.read_fourcc()?;

    let tkhd = find_path(data, "moov/trak/tkhd")?;
    let (version, _, payload) = tkhd.full_box_payload()?;
    let mut r = ByteReader::new(payload);
    // creation + modification time
    r.skip(if version == 1 { 16 } else { 8 })?;
    let track_id = r.read_u32()?;

    let mdhd = find_path(data, "moov/trak/mdia/mdhd")?;
    let (version, _, payload) = mdhd.full_box_payload()?;
    let mut r = ByteReader::new(payload);
    r.skip(if version == 1 { 16 } else { 8 })?;
    let timescale = r.read_u32()?;

    let hdlr = find_path(data, "moov/trak/mdia/hdlr")?;
    let (_, _, payload) = hdlr.full_box_payload()?;
    let mut r = ByteReader::new(payload);
    r.skip(4)?; // pre_defined
    let handler = r.read_fourcc()?;

    Ok(InitInfo {
        major_brand,
        track_id,
        timescale,
        handler,
    })
}

/// Codec-private data for the sample entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleEntry {
    /// `avc1` + `avcC` from H.264 parameter sets.
    H264 {
        width: u16,
        height: u16,
        sps: Vec<Vec<u8>>,
        pps: Vec<Vec<u8>>,
    },
    /// `hvc1` + `hvcC` from H.265 parameter sets.
    H265 {
        width: u16,
        height: u16,
        vps: Vec<Vec<u8>>,
        sps: Vec<Vec<u8>>,
        pps: Vec<Vec<u8>>,
    },
    /// `mp4a` + `esds` for AAC-LC.
    Aac {
        sample_rate: u32,
        channels: u16,
        /// AudioSpecificConfig bytes.
        config: Vec<u8>,
    },
}

impl SampleEntry {
    fn handler(&self) -> &'static [u8; 4] {
        match self {
            SampleEntry::H264 { .. } | SampleEntry::H265 { .. } => b"vide",
            SampleEntry::Aac { .. } => b"soun",
        }
    }
}

/// One track's static configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackConfig {
    pub track_id: u32,
    /// Ticks per second for `tfdt`/`trun` timing.
    pub timescale: u32,
    pub entry: SampleEntry,
}

/// `pssh` payload for one CENC system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsshBox {
    pub system_id: [u8; 16],
    pub data: Vec<u8>,
}

/// A clear/encrypted byte split within one sample (SAMPLE-AES).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsampleRange {
    pub clear_bytes: u16,
    pub encrypted_bytes: u32,
}

/// One media sample handed to the segment writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp4Sample {
    pub data: Vec<u8>,
    /// Duration in track timescale ticks.
    pub duration: u32,
    pub is_keyframe: bool,
    /// Composition-time offset (pts - dts) in ticks.
    pub cts_offset: i32,
    /// Present only for encrypted samples.
    pub subsamples: Option<Vec<SubsampleRange>>,
}

fn boxed(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(payload.len() + 8);
    w.put_u32((payload.len() + 8) as u32);
    w.put_fourcc(box_type);
    w.put_slice(payload);
    w.into_inner()
}

fn full_box(box_type: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut inner = ByteWriter::with_capacity(payload.len() + 4);
    inner.put_u8(version);
    inner.put_u24(flags);
    inner.put_slice(payload);
    boxed(box_type, inner.as_slice())
}

fn avc_c(sps: &[Vec<u8>], pps: &[Vec<u8>]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    let first_sps = sps.first().map(|s| s.as_slice()).unwrap_or(&[0, 0, 0, 0]);
    w.put_u8(1); // configurationVersion
    w.put_u8(first_sps.get(1).copied().unwrap_or(0));
    w.put_u8(first_sps.get(2).copied().unwrap_or(0));
    w.put_u8(first_sps.get(3).copied().unwrap_or(0));
    w.put_u8(0xff); // 4-byte NALU lengths
    w.put_u8(0xe0 | sps.len() as u8);
    for s in sps {
        w.put_u16(s.len() as u16);
        w.put_slice(s);
    }
    w.put_u8(pps.len() as u8);
    for p in pps {
        w.put_u16(p.len() as u16);
        w.put_slice(p);
    }
    boxed(b"avcC", w.as_slice())
}

fn hvc_c(vps: &[Vec<u8>], sps: &[Vec<u8>], pps: &[Vec<u8>]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    // profile-tier-level sits at byte 3 of the SPS payload
    let ptl: &[u8] = sps
        .first()
        .map(|s| s.as_slice())
        .filter(|s| s.len() >= 15)
        .map(|s| &s[3..15])
        .unwrap_or(&[0; 12]);
    w.put_u8(1); // configurationVersion
    w.put_u8(ptl[0]); // general_profile_space/tier/idc
    w.put_slice(&ptl[1..5]); // compatibility flags
    w.put_slice(&ptl[5..11]); // constraint indicator flags
    w.put_u8(ptl[11]); // general_level_idc
    w.put_u16(0xf000); // min_spatial_segmentation_idc
    w.put_u8(0xfc); // parallelismType
    w.put_u8(0xfd); // chroma_format_idc 1
    w.put_u8(0xf8); // bit_depth_luma_minus8
    w.put_u8(0xf8); // bit_depth_chroma_minus8
    w.put_u16(0); // avgFrameRate
    w.put_u8(0x0f); // lengthSizeMinusOne 3, numTemporalLayers 0
    let arrays: [(u8, &[Vec<u8>]); 3] = [(32, vps), (33, sps), (34, pps)];
    w.put_u8(arrays.iter().filter(|(_, v)| !v.is_empty()).count() as u8);
    for (nal_type, sets) in arrays {
        if sets.is_empty() {
            continue;
        }
        w.put_u8(0x80 | nal_type); // array_completeness set
        w.put_u16(sets.len() as u16);
        for s in sets {
            w.put_u16(s.len() as u16);
            w.put_slice(s);
        }
    }
    boxed(b"hvcC", w.as_slice())
}

fn esds(config: &[u8]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    // ES_Descriptor
    w.put_u8(0x03);
    w.put_u8((config.len() + 20) as u8);
    w.put_u16(1); // ES_ID
    w.put_u8(0); // flags
    // DecoderConfigDescriptor
    w.put_u8(0x04);
    w.put_u8((config.len() + 15) as u8);
    w.put_u8(0x40); // AAC
    w.put_u8(0x15); // audio stream
    w.put_u24(0); // buffer size
    w.put_u32(0); // max bitrate
    w.put_u32(0); // avg bitrate
    // DecoderSpecificInfo
    w.put_u8(0x05);
    w.put_u8(config.len() as u8);
    w.put_slice(config);
    // SLConfigDescriptor
    w.put_u8(0x06);
    w.put_u8(1);
    w.put_u8(0x02);
    full_box(b"esds", 0, 0, w.as_slice())
}

fn visual_sample_entry(fourcc: &[u8; 4], width: u16, height: u16, config: Vec<u8>) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.put_slice(&[0; 6]); // reserved
    w.put_u16(1); // data_reference_index
    w.put_slice(&[0; 16]); // pre_defined + reserved
    w.put_u16(width);
    w.put_u16(height);
    w.put_u32(0x0048_0000); // 72 dpi
    w.put_u32(0x0048_0000);
    w.put_u32(0);
    w.put_u16(1); // frame_count
    w.put_slice(&[0; 32]); // compressorname
    w.put_u16(0x0018); // depth
    w.put_i16(-1); // pre_defined
    w.put_slice(&config);
    boxed(fourcc, w.as_slice())
}

fn audio_sample_entry(sample_rate: u32, channels: u16, config: &[u8]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.put_slice(&[0; 6]);
    w.put_u16(1); // data_reference_index
    w.put_slice(&[0; 8]); // reserved
    w.put_u16(channels);
    w.put_u16(16); // sample size
    w.put_u32(0); // pre_defined + reserved
    w.put_u32(sample_rate << 16);
    w.put_slice(&esds(config));
    boxed(b"mp4a", w.as_slice())
}

fn stsd(entry: &SampleEntry) -> Vec<u8> {
    let entry_bytes = match entry {
        SampleEntry::H264 {
            width,
            height,
            sps,
            pps,
        } => visual_sample_entry(b"avc1", *width, *height, avc_c(sps, pps)),
        SampleEntry::H265 {
            width,
            height,
            vps,
            sps,
            pps,
        } => visual_sample_entry(b"hvc1", *width, *height, hvc_c(vps, sps, pps)),
        SampleEntry::Aac {
            sample_rate,
            channels,
            config,
        } => audio_sample_entry(*sample_rate, *channels, config),
    };
    let mut w = ByteWriter::new();
    w.put_u32(1); // entry_count
    w.put_slice(&entry_bytes);
    full_box(b"stsd", 0, 0, w.as_slice())
}

fn empty_full_box(box_type: &[u8; 4], extra_zero_u32s: usize) -> Vec<u8> {
    let mut w = ByteWriter::new();
    for _ in 0..extra_zero_u32s {
        w.put_u32(0);
    }
    full_box(box_type, 0, 0, w.as_slice())
}

/// CMAF fMP4 writer for a single track.
pub struct Fmp4Writer {
    config: TrackConfig,
}

impl Fmp4Writer {
    pub fn new(config: TrackConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrackConfig {
        &self.config
    }

    /// `ftyp` + `moov`, with one `pssh` per enabled CENC system.
    pub fn init_segment(&self, pssh: &[PsshBox]) -> Vec<u8> {
        let mut ftyp = ByteWriter::new();
        ftyp.put_fourcc(b"iso6");
        ftyp.put_u32(0); // minor version
        ftyp.put_fourcc(b"iso6");
        ftyp.put_fourcc(b"cmfc");
        let ftyp = boxed(b"ftyp", ftyp.as_slice());

        let mut out = ftyp;
        out.extend_from_slice(&boxed(b"moov", &self.moov(pssh)));
        out
    }

    fn moov(&self, pssh: &[PsshBox]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.mvhd());
        out.extend_from_slice(&boxed(b"trak", &self.trak()));
        out.extend_from_slice(&boxed(b"mvex", &self.trex()));
        for p in pssh {
            out.extend_from_slice(&write_pssh(p));
        }
        out
    }

    fn mvhd(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.put_u32(0); // creation_time
        w.put_u32(0); // modification_time
        w.put_u32(self.config.timescale);
        w.put_u32(0); // duration unknown (fragmented)
        w.put_u32(0x0001_0000); // rate 1.0
        w.put_u16(0x0100); // volume 1.0
        w.put_u16(0);
        w.put_u64(0);
        // unity matrix
        for v in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
            w.put_u32(v);
        }
        for _ in 0..6 {
            w.put_u32(0); // pre_defined
        }
        w.put_u32(self.config.track_id + 1); // next_track_ID
        full_box(b"mvhd", 0, 0, w.as_slice())
    }

    fn trak(&self) -> Vec<u8> {
        let (width, height) = match &self.config.entry {
            SampleEntry::H264 { width, height, .. }
            | SampleEntry::H265 { width, height, .. } => (*width, *height),
            SampleEntry::Aac { .. } => (0, 0),
        };

        let mut tkhd = ByteWriter::new();
        tkhd.put_u32(0);
        tkhd.put_u32(0);
        tkhd.put_u32(self.config.track_id);
        tkhd.put_u32(0); // reserved
        tkhd.put_u32(0); // duration
        tkhd.put_u64(0);
        tkhd.put_u16(0); // layer
        tkhd.put_u16(0); // alternate_group
        tkhd.put_u16(if width == 0 { 0x0100 } else { 0 }); // volume
        tkhd.put_u16(0);
        for v in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
            tkhd.put_u32(v);
        }
        tkhd.put_u32(u32::from(width) << 16);
        tkhd.put_u32(u32::from(height) << 16);
        // flags: enabled + in movie
        let tkhd = full_box(b"tkhd", 0, 0x000003, tkhd.as_slice());

        let mut out = tkhd;
        out.extend_from_slice(&boxed(b"mdia", &self.mdia()));
        out
    }

    fn mdia(&self) -> Vec<u8> {
        let mut mdhd = ByteWriter::new();
        mdhd.put_u32(0);
        mdhd.put_u32(0);
        mdhd.put_u32(self.config.timescale);
        mdhd.put_u32(0);
        mdhd.put_u16(0x55c4); // language 'und'
        mdhd.put_u16(0);
        let mdhd = full_box(b"mdhd", 0, 0, mdhd.as_slice());

        let handler = self.config.entry.handler();
        let mut hdlr = ByteWriter::new();
        hdlr.put_u32(0); // pre_defined
        hdlr.put_fourcc(handler);
        hdlr.put_slice(&[0; 12]);
        hdlr.put_slice(b"hls-origin\0");
        let hdlr = full_box(b"hdlr", 0, 0, hdlr.as_slice());

        let mut out = mdhd;
        out.extend_from_slice(&hdlr);
        out.extend_from_slice(&boxed(b"minf", &self.minf()));
        out
    }

    fn minf(&self) -> Vec<u8> {
        let header = match &self.config.entry {
            SampleEntry::Aac { .. } => {
                let mut w = ByteWriter::new();
                w.put_u32(0); // balance + reserved
                full_box(b"smhd", 0, 0, w.as_slice())
            }
            _ => {
                let mut w = ByteWriter::new();
                w.put_u64(0); // graphicsmode + opcolor
                full_box(b"vmhd", 0, 1, &w.as_slice()[..8])
            }
        };

        let url = full_box(b"url ", 0, 1, &[]); // self-contained
        let mut dref = ByteWriter::new();
        dref.put_u32(1);
        dref.put_slice(&url);
        let dref = full_box(b"dref", 0, 0, dref.as_slice());
        let dinf = boxed(b"dinf", &dref);

        let mut stbl = stsd(&self.config.entry);
        stbl.extend_from_slice(&empty_full_box(b"stts", 1));
        stbl.extend_from_slice(&empty_full_box(b"stsc", 1));
        stbl.extend_from_slice(&empty_full_box(b"stsz", 2));
        stbl.extend_from_slice(&empty_full_box(b"stco", 1));
        let stbl = boxed(b"stbl", &stbl);

        let mut out = header;
        out.extend_from_slice(&dinf);
        out.extend_from_slice(&stbl);
        out
    }

    fn trex(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.put_u32(self.config.track_id);
        w.put_u32(1); // default_sample_description_index
        w.put_u32(0); // default_sample_duration
        w.put_u32(0); // default_sample_size
        w.put_u32(0); // default_sample_flags
        full_box(b"trex", 0, 0, w.as_slice())
    }

    /// `styp` + `moof` + `mdat` for one segment or partial segment.
    ///
    /// `sequence_number` is the MSN + 1 (the `mfhd` counter is one-based);
    /// `decode_time` is the 64-bit baseMediaDecodeTime in track timescale.
    pub fn media_segment(
        &self,
        sequence_number: u32,
        decode_time: u64,
        samples: &[Mp4Sample],
    ) -> Vec<u8> {
        let mut styp = ByteWriter::new();
        styp.put_fourcc(b"msdh");
        styp.put_u32(0);
        styp.put_fourcc(b"msdh");
        styp.put_fourcc(b"msix");
        let styp = boxed(b"styp", styp.as_slice());

        let mfhd = {
            let mut w = ByteWriter::new();
            w.put_u32(sequence_number);
            full_box(b"mfhd", 0, 0, w.as_slice())
        };

        let tfhd = {
            let mut w = ByteWriter::new();
            w.put_u32(self.config.track_id);
            // default-base-is-moof
            full_box(b"tfhd", 0, 0x020000, w.as_slice())
        };

        let tfdt = {
            let mut w = ByteWriter::new();
            w.put_u64(decode_time);
            full_box(b"tfdt", 1, 0, w.as_slice())
        };

        let has_cts = samples.iter().any(|s| s.cts_offset != 0);
        // data-offset, sample-duration, sample-size, sample-flags (+ cts)
        let trun_flags = 0x000001 | 0x000100 | 0x000200 | 0x000400 | if has_cts { 0x000800 } else { 0 };
        let trun = {
            let mut w = ByteWriter::new();
            w.put_u32(samples.len() as u32);
            w.put_i32(0); // data_offset, patched below
            for s in samples {
                w.put_u32(s.duration);
                w.put_u32(s.data.len() as u32);
                // sync / non-sync sample flags
                w.put_u32(if s.is_keyframe { 0x0200_0000 } else { 0x0101_0000 });
                if has_cts {
                    w.put_i32(s.cts_offset);
                }
            }
            full_box(b"trun", 1, trun_flags, w.as_slice())
        };

        let senc_boxes = self.sample_encryption(samples);

        // moof layout: [8 hdr][mfhd][8 traf hdr][tfhd][tfdt][trun][senc..]
        // data_offset lives right after the trun header, version/flags and
        // sample_count
        let data_offset_pos =
            8 + mfhd.len() + 8 + tfhd.len() + tfdt.len() + 8 + 4 + 4;

        let mut traf = tfhd;
        traf.extend_from_slice(&tfdt);
        traf.extend_from_slice(&trun);
        traf.extend_from_slice(&senc_boxes);

        let mut moof_payload = mfhd;
        moof_payload.extend_from_slice(&boxed(b"traf", &traf));
        let mut moof = boxed(b"moof", &moof_payload);

        // patch trun data_offset now that the moof size is known
        let moof_len = moof.len();
        moof[data_offset_pos..data_offset_pos + 4]
            .copy_from_slice(&((moof_len + 8) as i32).to_be_bytes());

        let mut mdat_payload = Vec::with_capacity(samples.iter().map(|s| s.data.len()).sum());
        for s in samples {
            mdat_payload.extend_from_slice(&s.data);
        }

        let mut out = styp;
        out.extend_from_slice(&moof);
        out.extend_from_slice(&boxed(b"mdat", &mdat_payload));
        out
    }

    /// `senc` + `saiz` + `saio` for subsample-encrypted samples.
    fn sample_encryption(&self, samples: &[Mp4Sample]) -> Vec<u8> {
        if samples.iter().all(|s| s.subsamples.is_none()) {
            return Vec::new();
        }

        let mut senc = ByteWriter::new();
        senc.put_u32(samples.len() as u32);
        let mut sizes = Vec::with_capacity(samples.len());
        for s in samples {
            let subs = s.subsamples.as_deref().unwrap_or(&[]);
            senc.put_u16(subs.len() as u16);
            for sub in subs {
                senc.put_u16(sub.clear_bytes);
                senc.put_u32(sub.encrypted_bytes);
            }
            sizes.push((2 + subs.len() * 6) as u8);
        }
        // subsample information present
        let senc = full_box(b"senc", 0, 0x000002, senc.as_slice());

        let mut saiz = ByteWriter::new();
        saiz.put_u8(0); // default_sample_info_size varies
        saiz.put_u32(sizes.len() as u32);
        for size in &sizes {
            saiz.put_u8(*size);
        }
        let saiz = full_box(b"saiz", 0, 0, saiz.as_slice());

        let mut saio = ByteWriter::new();
        saio.put_u32(1);
        // offset of the first entry inside senc, relative to moof; the
        // consumer re-derives it, a zero placeholder keeps readers lenient
        saio.put_u32(0);
        let saio = full_box(b"saio", 0, 0, saio.as_slice());

        let mut out = senc;
        out.extend_from_slice(&saiz);
        out.extend_from_slice(&saio);
        out
    }
}

/// Standard CENC `pssh` v0 box.
pub fn write_pssh(pssh: &PsshBox) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.put_slice(&pssh.system_id);
    w.put_u32(pssh.data.len() as u32);
    w.put_slice(&pssh.data);
    full_box(b"pssh", 0, 0, w.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_config() -> TrackConfig {
        TrackConfig {
            track_id: 1,
            timescale: 90_000,
            entry: SampleEntry::H264 {
                width: 640,
                height: 360,
                sps: vec![vec![0x67, 0x42, 0xc0, 0x1e, 0x96]],
                pps: vec![vec![0x68, 0xce, 0x3c, 0x80]],
            },
        }
    }

    #[test]
    fn init_segment_structure() {
        let writer = Fmp4Writer::new(video_config());
        let init = writer.init_segment(&[]);

        let boxes = read_boxes(&init).unwrap();
        assert_eq!(boxes[0].type_str(), "ftyp");
        assert_eq!(boxes[1].type_str(), "moov");
        assert_eq!(&boxes[0].data[..4], b"iso6");

        let info = parse_init_info(&init).unwrap();
        assert_eq!(
            info,
            InitInfo {
                major_brand: *b"iso6",
                track_id: 1,
                timescale: 90_000,
                handler: *b"vide",
            }
        );

        // trex present under mvex
        find_path(&init, "moov/mvex/trex").unwrap();
        // avcC reachable through the sample table
        let stsd = find_path(&init, "moov/trak/mdia/minf/stbl/stsd").unwrap();
        let avc1 = read_boxes(&stsd.data[8..]).unwrap();
        assert_eq!(avc1[0].type_str(), "avc1");
    }

    #[test]
    fn init_segment_carries_pssh() {
        let writer = Fmp4Writer::new(video_config());
        let pssh = PsshBox {
            system_id: [0xed; 16],
            data: vec![1, 2, 3, 4],
        };
        let init = writer.init_segment(&[pssh.clone()]);
        let moov = find_path(&init, "moov").unwrap();
        let found = moov
            .children()
            .unwrap()
            .into_iter()
            .find(|b| &b.box_type == b"pssh")
            .expect("pssh in moov");
        let (version, _, payload) = found.full_box_payload().unwrap();
        assert_eq!(version, 0);
        assert_eq!(&payload[..16], &pssh.system_id);
        assert_eq!(&payload[20..], &pssh.data[..]);
    }

    #[test]
    fn media_segment_structure() {
        let writer = Fmp4Writer::new(video_config());
        let samples = vec![
            Mp4Sample {
                data: vec![1; 100],
                duration: 3000,
                is_keyframe: true,
                cts_offset: 0,
                subsamples: None,
            },
            Mp4Sample {
                data: vec![2; 50],
                duration: 3000,
                is_keyframe: false,
                cts_offset: 0,
                subsamples: None,
            },
        ];
        let seg = writer.media_segment(7, 180_000, &samples);

        let boxes = read_boxes(&seg).unwrap();
        let types: Vec<String> = boxes.iter().map(|b| b.type_str()).collect();
        assert_eq!(types, vec!["styp", "moof", "mdat"]);

        let mfhd = find_path(&seg, "moof/mfhd").unwrap();
        let (_, _, payload) = mfhd.full_box_payload().unwrap();
        assert_eq!(u32::from_be_bytes(payload[..4].try_into().unwrap()), 7);

        let tfdt = find_path(&seg, "moof/traf/tfdt").unwrap();
        let (version, _, payload) = tfdt.full_box_payload().unwrap();
        assert_eq!(version, 1);
        assert_eq!(u64::from_be_bytes(payload[..8].try_into().unwrap()), 180_000);

        // mdat payload is the concatenated sample data
        let mdat = boxes.last().unwrap();
        assert_eq!(mdat.data.len(), 150);
        assert_eq!(mdat.data[0], 1);
        assert_eq!(mdat.data[100], 2);

        // trun data_offset points at the first mdat payload byte
        let trun = find_path(&seg, "moof/traf/trun").unwrap();
        let (_, flags, payload) = trun.full_box_payload().unwrap();
        assert_ne!(flags & 0x000001, 0);
        let data_offset = i32::from_be_bytes(payload[4..8].try_into().unwrap());
        let moof_start = boxes[0].data.len() + 8;
        let mdat_payload_start = seg.len() - 150;
        assert_eq!(moof_start + data_offset as usize, mdat_payload_start);
    }

    #[test]
    fn encrypted_samples_get_senc_saiz_saio() {
        let writer = Fmp4Writer::new(video_config());
        let samples = vec![Mp4Sample {
            data: vec![0; 64],
            duration: 3000,
            is_keyframe: true,
            cts_offset: 0,
            subsamples: Some(vec![SubsampleRange {
                clear_bytes: 16,
                encrypted_bytes: 48,
            }]),
        }];
        let seg = writer.media_segment(1, 0, &samples);
        let traf = find_path(&seg, "moof/traf").unwrap();
        let children: Vec<String> = traf
            .children()
            .unwrap()
            .iter()
            .map(|b| b.type_str())
            .collect();
        assert!(children.contains(&"senc".to_string()));
        assert!(children.contains(&"saiz".to_string()));
        assert!(children.contains(&"saio".to_string()));
    }

    #[test]
    fn truncated_box_is_rejected() {
        let writer = Fmp4Writer::new(video_config());
        let init = writer.init_segment(&[]);
        assert!(matches!(
            read_boxes(&init[..init.len() - 3]),
            Err(Mp4Error::Truncated(_))
        ));
    }
}
