//! MPEG-TS segment writing: PAT/PMT, PES packetization, ADTS framing and
//! Annex-B conversion.
//!
//! One program, fixed PIDs: PAT on 0x0000, PMT on 0x1000, video on 0x0100,
//! audio on 0x0101. PCR rides the video PID and is inserted at least every
//! 100 ms. Every segment starts with PAT + PMT so segments are
//! independently decodable.

pub const TS_PACKET_SIZE: usize = 188;
pub const PID_PAT: u16 = 0x0000;
pub const PID_PMT: u16 = 0x1000;
pub const PID_VIDEO: u16 = 0x0100;
pub const PID_AUDIO: u16 = 0x0101;

const STREAM_TYPE_H264: u8 = 0x1b;
const STREAM_TYPE_H265: u8 = 0x24;
const STREAM_TYPE_AAC_ADTS: u8 = 0x0f;

/// 90 kHz ticks in 100 ms, the maximum PCR interval.
const PCR_INTERVAL: u64 = 9_000;

use super::nal::VideoCodec;

/// MPEG-2 PSI CRC-32 (poly 0x04C11DB7, no reflection, no final xor).
fn crc32_mpeg(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xffff_ffff;
    for &b in data {
        crc ^= u32::from(b) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04c1_1db7
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// AAC parameters needed for ADTS headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsConfig {
    /// MPEG-4 audio object type minus implied profile, 2 = AAC-LC.
    pub object_type: u8,
    /// Index into the standard sampling-frequency table.
    pub sample_rate_index: u8,
    pub channels: u8,
}

impl AdtsConfig {
    pub const SAMPLE_RATES: [u32; 13] = [
        96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025,
        8_000, 7_350,
    ];

    pub fn sample_rate_index_for(rate: u32) -> Option<u8> {
        Self::SAMPLE_RATES
            .iter()
            .position(|r| *r == rate)
            .map(|i| i as u8)
    }

    /// The 7-byte ADTS header for a raw AAC frame of `frame_len` bytes.
    pub fn header(&self, frame_len: usize) -> [u8; 7] {
        let full_len = (frame_len + 7) as u16;
        let profile = self.object_type - 1; // ADTS carries object type - 1
        [
            0xff,
            0xf1, // MPEG-4, no CRC
            (profile << 6) | (self.sample_rate_index << 2) | (self.channels >> 2),
            ((self.channels & 0x3) << 6) | ((full_len >> 11) as u8 & 0x3),
            (full_len >> 3) as u8,
            ((full_len as u8 & 0x7) << 5) | 0x1f,
            0xfc,
        ]
    }

    /// Wrap a raw AAC frame in an ADTS header.
    pub fn frame(&self, raw: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(raw.len() + 7);
        out.extend_from_slice(&self.header(raw.len()));
        out.extend_from_slice(raw);
        out
    }
}

/// Convert length-prefixed (AVCC/HVCC) NAL units to an Annex-B stream.
pub fn length_prefixed_to_annex_b(data: &[u8], length_size: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 16);
    let mut pos = 0;
    while pos + length_size <= data.len() {
        let mut len = 0usize;
        for i in 0..length_size {
            len = (len << 8) | data[pos + i] as usize;
        }
        pos += length_size;
        if pos + len > data.len() {
            break;
        }
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(&data[pos..pos + len]);
        pos += len;
    }
    out
}

/// Stateful single-program TS muxer. Continuity counters survive across
/// segments; PAT/PMT are re-emitted at every segment start.
pub struct TsWriter {
    video_codec: VideoCodec,
    has_audio: bool,
    continuity: [u8; 4], // pat, pmt, video, audio
    last_pcr: Option<u64>,
}

enum Pid {
    Pat = 0,
    Pmt = 1,
    Video = 2,
    Audio = 3,
}

impl TsWriter {
    pub fn new(video_codec: VideoCodec, has_audio: bool) -> Self {
        Self {
            video_codec,
            has_audio,
            continuity: [0; 4],
            last_pcr: None,
        }
    }

    fn next_cc(&mut self, pid: Pid) -> u8 {
        let slot = &mut self.continuity[pid as usize];
        let cc = *slot;
        *slot = (*slot + 1) & 0x0f;
        cc
    }

    /// Begin a new segment: emit PAT and PMT and force a PCR on the next
    /// video access unit.
    pub fn start_segment(&mut self, out: &mut Vec<u8>) {
        self.last_pcr = None;
        let pat = self.pat_section();
        let cc = self.next_cc(Pid::Pat);
        write_psi_packet(out, PID_PAT, cc, &pat);
        let pmt = self.pmt_section();
        let cc = self.next_cc(Pid::Pmt);
        write_psi_packet(out, PID_PMT, cc, &pmt);
    }

    fn pat_section(&self) -> Vec<u8> {
        let mut s = vec![
            0x00, // table_id
            0xb0, // section_syntax + length high (patched)
            0x00, // length low (patched)
            0x00, 0x01, // transport_stream_id
            0xc1, // version 0, current_next 1
            0x00, // section_number
            0x00, // last_section_number
            0x00, 0x01, // program_number
            0xe0 | (PID_PMT >> 8) as u8,
            (PID_PMT & 0xff) as u8,
        ];
        finish_section(&mut s);
        s
    }

    fn pmt_section(&self) -> Vec<u8> {
        let mut s = vec![
            0x02, // table_id
            0xb0,
            0x00, // length (patched)
            0x00,
            0x01, // program_number
            0xc1,
            0x00,
            0x00,
            0xe0 | (PID_VIDEO >> 8) as u8, // PCR PID
            (PID_VIDEO & 0xff) as u8,
            0xf0,
            0x00, // program_info_length
        ];
        let video_type = match self.video_codec {
            VideoCodec::H264 => STREAM_TYPE_H264,
            VideoCodec::H265 => STREAM_TYPE_H265,
        };
        s.extend_from_slice(&[
            video_type,
            0xe0 | (PID_VIDEO >> 8) as u8,
            (PID_VIDEO & 0xff) as u8,
            0xf0,
            0x00,
        ]);
        if self.has_audio {
            s.extend_from_slice(&[
                STREAM_TYPE_AAC_ADTS,
                0xe0 | (PID_AUDIO >> 8) as u8,
                (PID_AUDIO & 0xff) as u8,
                0xf0,
                0x00,
            ]);
        }
        finish_section(&mut s);
        s
    }

    /// Write one video access unit (Annex-B) as a PES packet.
    ///
    /// `pts`/`dts` are 90 kHz ticks. PCR is inserted when due or when the
    /// unit starts a segment.
    pub fn write_video(
        &mut self,
        out: &mut Vec<u8>,
        pts: u64,
        dts: u64,
        annex_b: &[u8],
        is_keyframe: bool,
    ) {
        let with_pcr = match self.last_pcr {
            None => true,
            Some(last) => dts.saturating_sub(last) >= PCR_INTERVAL,
        };
        if with_pcr {
            self.last_pcr = Some(dts);
        }
        let pes = pes_header(0xe0, pts, Some(dts), None);
        let mut payload = pes;
        payload.extend_from_slice(annex_b);
        self.write_pes_packets(
            out,
            Pid::Video,
            PID_VIDEO,
            &payload,
            is_keyframe,
            with_pcr.then_some(dts),
        );
    }

    /// Write one ADTS audio frame as a PES packet.
    pub fn write_audio(&mut self, out: &mut Vec<u8>, pts: u64, adts_frame: &[u8]) {
        let pes = pes_header(0xc0, pts, None, Some(adts_frame.len()));
        let mut payload = pes;
        payload.extend_from_slice(adts_frame);
        self.write_pes_packets(out, Pid::Audio, PID_AUDIO, &payload, false, None);
    }

    fn write_pes_packets(
        &mut self,
        out: &mut Vec<u8>,
        pid_slot: Pid,
        pid: u16,
        payload: &[u8],
        random_access: bool,
        pcr: Option<u64>,
    ) {
        let mut pos = 0;
        let mut first = true;
        let pid_slot = pid_slot as usize;
        while pos < payload.len() {
            let cc = {
                let slot = &mut self.continuity[pid_slot];
                let cc = *slot;
                *slot = (*slot + 1) & 0x0f;
                cc
            };

            let mut pkt = Vec::with_capacity(TS_PACKET_SIZE);
            pkt.push(0x47);
            let pusi = if first { 0x40 } else { 0x00 };
            pkt.push(pusi | (pid >> 8) as u8);
            pkt.push((pid & 0xff) as u8);

            let remaining = payload.len() - pos;
            let mut af_content = Vec::new();
            let mut af_flags = 0u8;
            if first {
                if random_access {
                    af_flags |= 0x40;
                }
                if pcr.is_some() {
                    af_flags |= 0x10;
                }
                if af_flags != 0 {
                    af_content.push(af_flags);
                    if let Some(base) = pcr {
                        af_content.push((base >> 25) as u8);
                        af_content.push((base >> 17) as u8);
                        af_content.push((base >> 9) as u8);
                        af_content.push((base >> 1) as u8);
                        // PCR extension zero
                        af_content.push(((base & 1) as u8) << 7 | 0x7e);
                        af_content.push(0);
                    }
                }
            }

            // total adaptation bytes including the length byte; grows to
            // absorb stuffing when the payload cannot fill the packet
            let min_af_total = if af_content.is_empty() {
                0
            } else {
                1 + af_content.len()
            };
            let space_without_stuffing = TS_PACKET_SIZE - 4 - min_af_total;
            let af_total = if remaining >= space_without_stuffing {
                min_af_total
            } else {
                TS_PACKET_SIZE - 4 - remaining
            };

            if af_total == 0 {
                pkt.push(0x10 | cc); // payload only
            } else {
                pkt.push(0x30 | cc); // adaptation + payload
                let af_len = af_total - 1;
                pkt.push(af_len as u8);
                if af_len > 0 {
                    if af_content.is_empty() {
                        af_content.push(0x00); // flags byte, no indicators
                    }
                    let stuffing = af_len - af_content.len();
                    pkt.extend_from_slice(&af_content);
                    pkt.extend(std::iter::repeat(0xff).take(stuffing));
                }
            }

            let take = remaining.min(TS_PACKET_SIZE - pkt.len());
            pkt.extend_from_slice(&payload[pos..pos + take]);
            pos += take;

            debug_assert_eq!(pkt.len(), TS_PACKET_SIZE);
            out.extend_from_slice(&pkt);
            first = false;
        }
    }
}

fn finish_section(section: &mut Vec<u8>) {
    // patch section_length: bytes after the length field, including CRC
    let len = section.len() - 3 + 4;
    section[1] = 0xb0 | ((len >> 8) as u8 & 0x0f);
    section[2] = (len & 0xff) as u8;
    let crc = crc32_mpeg(section);
    section.extend_from_slice(&crc.to_be_bytes());
}

fn write_psi_packet(out: &mut Vec<u8>, pid: u16, cc: u8, section: &[u8]) {
    let mut pkt = Vec::with_capacity(TS_PACKET_SIZE);
    pkt.push(0x47);
    pkt.push(0x40 | (pid >> 8) as u8); // PUSI set
    pkt.push((pid & 0xff) as u8);
    pkt.push(0x10 | cc);
    pkt.push(0x00); // pointer_field
    pkt.extend_from_slice(section);
    pkt.resize(TS_PACKET_SIZE, 0xff);
    out.extend_from_slice(&pkt);
}

fn pes_header(stream_id: u8, pts: u64, dts: Option<u64>, payload_len: Option<usize>) -> Vec<u8> {
    let header_data_len = if dts.is_some() { 10 } else { 5 };
    let mut out = Vec::with_capacity(9 + header_data_len);
    out.extend_from_slice(&[0x00, 0x00, 0x01, stream_id]);
    let pes_len = match payload_len {
        // 3 bytes of flags/length plus the timestamp fields
        Some(len) => (len + 3 + header_data_len) as u16,
        None => 0, // unbounded, allowed for video
    };
    out.extend_from_slice(&pes_len.to_be_bytes());
    out.push(0x80); // marker bits
    out.push(if dts.is_some() { 0xc0 } else { 0x80 }); // PTS / PTS+DTS
    out.push(header_data_len as u8);
    write_timestamp(&mut out, if dts.is_some() { 0x3 } else { 0x2 }, pts);
    if let Some(dts) = dts {
        write_timestamp(&mut out, 0x1, dts);
    }
    out
}

fn write_timestamp(out: &mut Vec<u8>, prefix: u8, ts: u64) {
    let ts = ts & 0x1_ffff_ffff;
    out.push((prefix << 4) | ((ts >> 29) as u8 & 0x0e) | 0x01);
    out.push((ts >> 22) as u8);
    out.push(((ts >> 14) as u8 & 0xfe) | 0x01);
    out.push((ts >> 7) as u8);
    out.push(((ts << 1) as u8) | 0x01);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packets(data: &[u8]) -> Vec<&[u8]> {
        assert_eq!(data.len() % TS_PACKET_SIZE, 0, "not packet aligned");
        data.chunks(TS_PACKET_SIZE).collect()
    }

    fn pid_of(pkt: &[u8]) -> u16 {
        (u16::from(pkt[1] & 0x1f) << 8) | u16::from(pkt[2])
    }

    #[test]
    fn segment_starts_with_pat_and_pmt() {
        let mut w = TsWriter::new(VideoCodec::H264, true);
        let mut out = Vec::new();
        w.start_segment(&mut out);
        w.write_video(&mut out, 90_000, 90_000, &[0, 0, 0, 1, 0x65, 0xaa], true);

        let pkts = packets(&out);
        assert!(pkts.len() >= 3);
        assert!(pkts.iter().all(|p| p[0] == 0x47));
        assert_eq!(pid_of(pkts[0]), PID_PAT);
        assert_eq!(pid_of(pkts[1]), PID_PMT);
        assert_eq!(pid_of(pkts[2]), PID_VIDEO);
        // PUSI on all three
        assert!(pkts[..3].iter().all(|p| p[1] & 0x40 != 0));
    }

    #[test]
    fn pat_references_pmt_pid() {
        let mut w = TsWriter::new(VideoCodec::H264, false);
        let mut out = Vec::new();
        w.start_segment(&mut out);
        let pat = packets(&out)[0];
        // pointer_field at offset 4, section starts at 5
        let section = &pat[5..];
        assert_eq!(section[0], 0x00);
        let pmt_pid = (u16::from(section[10] & 0x1f) << 8) | u16::from(section[11]);
        assert_eq!(pmt_pid, PID_PMT);
    }

    #[test]
    fn pmt_lists_elementary_streams() {
        let mut w = TsWriter::new(VideoCodec::H264, true);
        let mut out = Vec::new();
        w.start_segment(&mut out);
        let pmt = packets(&out)[1];
        let section = &pmt[5..];
        assert_eq!(section[0], 0x02);
        // first stream entry after the 12-byte fixed part
        assert_eq!(section[12], 0x1b);
        let video_pid = (u16::from(section[13] & 0x1f) << 8) | u16::from(section[14]);
        assert_eq!(video_pid, PID_VIDEO);
        assert_eq!(section[17], 0x0f);
        let audio_pid = (u16::from(section[18] & 0x1f) << 8) | u16::from(section[19]);
        assert_eq!(audio_pid, PID_AUDIO);
    }

    #[test]
    fn continuity_counters_advance_per_pid() {
        let mut w = TsWriter::new(VideoCodec::H264, false);
        let mut out = Vec::new();
        w.start_segment(&mut out);
        let payload = vec![0xab; 1000];
        w.write_video(&mut out, 0, 0, &payload, false);

        let mut last_video_cc: Option<u8> = None;
        for pkt in packets(&out) {
            if pid_of(pkt) == PID_VIDEO {
                let cc = pkt[3] & 0x0f;
                if let Some(prev) = last_video_cc {
                    assert_eq!(cc, (prev + 1) & 0x0f);
                }
                last_video_cc = Some(cc);
            }
        }
        assert!(last_video_cc.is_some());
    }

    #[test]
    fn keyframe_sets_random_access_and_pcr() {
        let mut w = TsWriter::new(VideoCodec::H264, false);
        let mut out = Vec::new();
        w.start_segment(&mut out);
        w.write_video(&mut out, 90_000, 90_000, &[0, 0, 0, 1, 0x65, 0xaa], true);

        let pkts = packets(&out);
        let video = pkts
            .iter()
            .find(|p| pid_of(p) == PID_VIDEO)
            .expect("video packet");
        // adaptation field present
        assert_eq!(video[3] & 0x30, 0x30);
        let flags = video[5];
        assert_ne!(flags & 0x40, 0, "random access indicator");
        assert_ne!(flags & 0x10, 0, "PCR flag");
    }

    #[test]
    fn pcr_respects_interval() {
        let mut w = TsWriter::new(VideoCodec::H264, false);
        let mut out = Vec::new();
        w.start_segment(&mut out);
        // first unit carries PCR, one 50 ms later must not, one 150 ms later must
        w.write_video(&mut out, 0, 0, &[0, 0, 1, 0x41, 0xaa], false);
        let after_first = out.len();
        w.write_video(&mut out, 4_500, 4_500, &[0, 0, 1, 0x41, 0xaa], false);
        let after_second = out.len();
        w.write_video(&mut out, 13_500, 13_500, &[0, 0, 1, 0x41, 0xaa], false);

        let has_pcr = |range: &[u8]| {
            packets(range)
                .iter()
                .filter(|p| pid_of(p) == PID_VIDEO && p[3] & 0x20 != 0)
                .any(|p| p[5] & 0x10 != 0)
        };
        assert!(has_pcr(&out[..after_first]));
        assert!(!has_pcr(&out[after_first..after_second]));
        assert!(has_pcr(&out[after_second..]));
    }

    #[test]
    fn adts_header_round_trip_fields() {
        let cfg = AdtsConfig {
            object_type: 2,
            sample_rate_index: AdtsConfig::sample_rate_index_for(48_000).unwrap(),
            channels: 2,
        };
        let frame = cfg.frame(&[0u8; 100]);
        assert_eq!(frame.len(), 107);
        assert_eq!(frame[0], 0xff);
        assert_eq!(frame[1] & 0xf6, 0xf0);
        let len = (usize::from(frame[3] & 0x3) << 11)
            | (usize::from(frame[4]) << 3)
            | (usize::from(frame[5]) >> 5);
        assert_eq!(len, 107);
    }

    #[test]
    fn avcc_conversion() {
        let data = [0, 0, 0, 2, 0x65, 0xaa, 0, 0, 0, 1, 0x41];
        let out = length_prefixed_to_annex_b(&data, 4);
        assert_eq!(out, vec![0, 0, 0, 1, 0x65, 0xaa, 0, 0, 0, 1, 0x41]);
    }
}
