//! SAMPLE-AES subsample encryption for video NAL units and ADTS audio.
//!
//! Video VCL NAL payloads keep the start code, NAL header and a 32-byte
//! slice-header leader in the clear, then apply the standard 1:9 pattern:
//! one encrypted 16-byte block followed by nine clear blocks. Audio frames
//! keep the ADTS header and a 16-byte leader clear and encrypt the
//! remaining whole blocks. The CBC flavor chains within one sample; the
//! CTR flavor (`SAMPLE-AES-CTR`, the CENC family) runs one keystream per
//! sample.

use super::{aes::derive_iv, EncryptionError};
use crate::media::mp4::SubsampleRange;
use crate::media::nal::{scan_nals, VideoCodec};
use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::Aes128;
use ctr::Ctr128BE;

const BLOCK: usize = 16;
/// Clear slice-header leader inside a VCL NAL.
const VCL_CLEAR_LEADER: usize = 32;
/// Clear leader inside an audio frame payload.
const AUDIO_CLEAR_LEADER: usize = 16;
/// 1 encrypted block, then this many clear blocks.
const PATTERN_CLEAR_BLOCKS: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleAesMode {
    /// `SAMPLE-AES`: AES-CBC per protected block run.
    Cbc,
    /// `SAMPLE-AES-CTR`: AES-CTR keystream over the protected blocks.
    Ctr,
}

/// An encrypted sample plus the clear/encrypted split the fMP4 writer
/// records in `senc`/`saiz`/`saio`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedSample {
    pub data: Vec<u8>,
    pub subsamples: Vec<SubsampleRange>,
}

/// Pure per-sample encryptor. Construct once per key epoch and reuse.
///
/// When the caller omits the IV it is derived from the media-sequence
/// number exactly as for AES-128 (big-endian MSN in the low eight bytes of
/// a zeroed IV); the same rule is applied for the CTR flavor.
pub struct SampleAesEncryptor {
    cipher: Aes128,
    key: [u8; 16],
    iv: [u8; 16],
    mode: SampleAesMode,
}

impl SampleAesEncryptor {
    pub fn new(
        key: &[u8],
        iv: Option<&[u8]>,
        media_sequence: u64,
        mode: SampleAesMode,
    ) -> Result<Self, EncryptionError> {
        let key: [u8; 16] = key
            .try_into()
            .map_err(|_| EncryptionError::BadKeyLength(key.len()))?;
        let iv = match iv {
            Some(iv) => iv
                .try_into()
                .map_err(|_| EncryptionError::BadIvLength(iv.len()))?,
            None => derive_iv(media_sequence),
        };
        Ok(Self {
            cipher: Aes128::new(&key.into()),
            key,
            iv,
            mode,
        })
    }

    pub fn mode(&self) -> SampleAesMode {
        self.mode
    }

    /// Encrypt the protected blocks of `data[start..]` in place following
    /// the 1:9 pattern. Returns the protected run length (bytes actually
    /// covered by the pattern, a multiple of the block size).
    fn encrypt_patterned(&self, data: &mut [u8], start: usize) -> usize {
        let run = (data.len() - start) / BLOCK * BLOCK;
        if run == 0 {
            return 0;
        }
        match self.mode {
            SampleAesMode::Cbc => {
                let mut prev = self.iv;
                let mut block_idx = 0;
                let mut off = start;
                while off + BLOCK <= start + run {
                    if block_idx % (1 + PATTERN_CLEAR_BLOCKS) == 0 {
                        let mut block = [0u8; BLOCK];
                        block.copy_from_slice(&data[off..off + BLOCK]);
                        for (b, p) in block.iter_mut().zip(prev.iter()) {
                            *b ^= p;
                        }
                        self.cipher.encrypt_block((&mut block).into());
                        data[off..off + BLOCK].copy_from_slice(&block);
                        prev = block;
                    }
                    block_idx += 1;
                    off += BLOCK;
                }
            }
            SampleAesMode::Ctr => {
                let mut ks = Ctr128BE::<Aes128>::new((&self.key).into(), (&self.iv).into());
                let mut block_idx = 0;
                let mut off = start;
                while off + BLOCK <= start + run {
                    if block_idx % (1 + PATTERN_CLEAR_BLOCKS) == 0 {
                        ks.apply_keystream(&mut data[off..off + BLOCK]);
                    }
                    block_idx += 1;
                    off += BLOCK;
                }
            }
        }
        run
    }

    /// Encrypt every VCL NAL of an Annex-B access unit, leaving parameter
    /// sets and slice headers clear. NAL boundaries and classification come
    /// from [`crate::media::nal`], the same scanner the access-unit parser
    /// uses.
    pub fn encrypt_video_au(&self, codec: VideoCodec, annex_b: &[u8]) -> EncryptedSample {
        let mut data = annex_b.to_vec();
        let nals = scan_nals(codec, &data);
        let mut subsamples = Vec::new();
        // bytes before the first start code stay clear
        let mut clear_run = nals.first().map(|n| n.start).unwrap_or(data.len());

        let header_len = match codec {
            VideoCodec::H264 => 1,
            VideoCodec::H265 => 2,
        };
        for (idx, nal) in nals.iter().enumerate() {
            let nal_end = nals.get(idx + 1).map(|n| n.start).unwrap_or(data.len());
            let protect_from = nal.payload + header_len + VCL_CLEAR_LEADER;
            if codec.is_vcl(nal.nal_type) && protect_from + BLOCK <= nal_end {
                let run = self.encrypt_patterned(&mut data[..nal_end], protect_from);
                subsamples.push(SubsampleRange {
                    clear_bytes: (clear_run + (protect_from - nal.start)) as u16,
                    encrypted_bytes: run as u32,
                });
                clear_run = nal_end - (protect_from + run);
            } else {
                clear_run += nal_end - nal.start;
            }
        }

        if clear_run > 0 {
            subsamples.push(SubsampleRange {
                clear_bytes: clear_run as u16,
                encrypted_bytes: 0,
            });
        }
        EncryptedSample { data, subsamples }
    }

    /// Encrypt the payload of one ADTS frame, header and leader kept clear.
    pub fn encrypt_audio_frame(&self, adts_frame: &[u8]) -> EncryptedSample {
        let mut data = adts_frame.to_vec();
        // protection_absent bit decides the header length
        let header_len = if data.len() >= 2 && data[1] & 0x01 == 0 {
            9
        } else {
            7
        };
        let protect_from = header_len + AUDIO_CLEAR_LEADER;
        let mut subsamples = Vec::new();
        if protect_from + BLOCK <= data.len() {
            let run = self.encrypt_full_blocks(&mut data, protect_from);
            subsamples.push(SubsampleRange {
                clear_bytes: protect_from as u16,
                encrypted_bytes: run as u32,
            });
            let tail = data.len() - protect_from - run;
            if tail > 0 {
                subsamples.push(SubsampleRange {
                    clear_bytes: tail as u16,
                    encrypted_bytes: 0,
                });
            }
        } else {
            subsamples.push(SubsampleRange {
                clear_bytes: data.len() as u16,
                encrypted_bytes: 0,
            });
        }
        EncryptedSample { data, subsamples }
    }

    /// Audio uses contiguous blocks rather than the 1:9 pattern.
    fn encrypt_full_blocks(&self, data: &mut [u8], start: usize) -> usize {
        let run = (data.len() - start) / BLOCK * BLOCK;
        match self.mode {
            SampleAesMode::Cbc => {
                let mut prev = self.iv;
                let mut off = start;
                while off + BLOCK <= start + run {
                    let mut block = [0u8; BLOCK];
                    block.copy_from_slice(&data[off..off + BLOCK]);
                    for (b, p) in block.iter_mut().zip(prev.iter()) {
                        *b ^= p;
                    }
                    self.cipher.encrypt_block((&mut block).into());
                    data[off..off + BLOCK].copy_from_slice(&block);
                    prev = block;
                    off += BLOCK;
                }
            }
            SampleAesMode::Ctr => {
                let mut ks = Ctr128BE::<Aes128>::new((&self.key).into(), (&self.iv).into());
                ks.apply_keystream(&mut data[start..start + run]);
            }
        }
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vcl_nal(len: usize) -> Vec<u8> {
        let mut data = vec![0, 0, 0, 1, 0x65];
        data.extend((0..len).map(|i| i as u8));
        data
    }

    #[test]
    fn slice_header_leader_stays_clear() {
        let enc =
            SampleAesEncryptor::new(&[7u8; 16], Some(&[9u8; 16]), 0, SampleAesMode::Cbc).unwrap();
        let au = vcl_nal(200);
        let out = enc.encrypt_video_au(VideoCodec::H264, &au);

        // start code + nal header + 32-byte leader untouched
        assert_eq!(&out.data[..5 + 32], &au[..5 + 32]);
        // first protected block changed
        assert_ne!(&out.data[37..53], &au[37..53]);
        assert_eq!(out.data.len(), au.len());

        let first = &out.subsamples[0];
        assert_eq!(first.clear_bytes, 37);
        assert_eq!(first.encrypted_bytes as usize, (200 - 32) / 16 * 16);
    }

    #[test]
    fn pattern_keeps_nine_of_ten_blocks_clear() {
        let enc =
            SampleAesEncryptor::new(&[7u8; 16], Some(&[9u8; 16]), 0, SampleAesMode::Cbc).unwrap();
        // big enough for 12 protected blocks
        let au = vcl_nal(32 + 12 * 16);
        let out = enc.encrypt_video_au(VideoCodec::H264, &au);

        let start = 5 + 32;
        for block in 0..12 {
            let range = start + block * 16..start + (block + 1) * 16;
            if block % 10 == 0 {
                assert_ne!(&out.data[range.clone()], &au[range], "block {block}");
            } else {
                assert_eq!(&out.data[range.clone()], &au[range], "block {block}");
            }
        }
    }

    #[test]
    fn non_vcl_nals_stay_clear() {
        let enc =
            SampleAesEncryptor::new(&[7u8; 16], Some(&[9u8; 16]), 0, SampleAesMode::Cbc).unwrap();
        let mut au = vec![0, 0, 0, 1, 0x67];
        au.extend(std::iter::repeat(0x11).take(100));
        let out = enc.encrypt_video_au(VideoCodec::H264, &au);
        assert_eq!(out.data, au);
        assert_eq!(out.subsamples.len(), 1);
        assert_eq!(out.subsamples[0].encrypted_bytes, 0);
    }

    #[test]
    fn short_vcl_nal_is_left_clear() {
        let enc =
            SampleAesEncryptor::new(&[7u8; 16], Some(&[9u8; 16]), 0, SampleAesMode::Cbc).unwrap();
        let au = vcl_nal(20); // below leader + one block
        let out = enc.encrypt_video_au(VideoCodec::H264, &au);
        assert_eq!(out.data, au);
    }

    #[test]
    fn audio_header_and_leader_stay_clear() {
        let enc =
            SampleAesEncryptor::new(&[7u8; 16], Some(&[9u8; 16]), 0, SampleAesMode::Ctr).unwrap();
        let mut frame = vec![0xff, 0xf1, 0x50, 0x80, 0x0d, 0x5f, 0xfc];
        frame.extend((0..100).map(|i| i as u8));
        let out = enc.encrypt_audio_frame(&frame);

        assert_eq!(&out.data[..7 + 16], &frame[..7 + 16]);
        assert_ne!(&out.data[23..39], &frame[23..39]);
        assert_eq!(out.subsamples[0].clear_bytes, 23);
        assert_eq!(out.subsamples[0].encrypted_bytes as usize, (100 - 16) / 16 * 16);
    }

    #[test]
    fn ctr_is_self_inverse() {
        let enc =
            SampleAesEncryptor::new(&[7u8; 16], Some(&[9u8; 16]), 0, SampleAesMode::Ctr).unwrap();
        let au = vcl_nal(200);
        let once = enc.encrypt_video_au(VideoCodec::H264, &au);
        let twice = enc.encrypt_video_au(VideoCodec::H264, &once.data);
        assert_eq!(twice.data, au);
    }

    #[test]
    fn derived_iv_matches_aes128_rule() {
        let with_derived = SampleAesEncryptor::new(&[7u8; 16], None, 5, SampleAesMode::Cbc).unwrap();
        let explicit =
            SampleAesEncryptor::new(&[7u8; 16], Some(&derive_iv(5)), 0, SampleAesMode::Cbc)
                .unwrap();
        let au = vcl_nal(100);
        assert_eq!(
            with_derived.encrypt_video_au(VideoCodec::H264, &au),
            explicit.encrypt_video_au(VideoCodec::H264, &au)
        );
    }
}
