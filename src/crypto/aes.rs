//! Whole-segment AES-128-CBC, the `METHOD=AES-128` mode.

use super::EncryptionError;
use cipher::block_padding::Pkcs7;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Default IV for a segment: the media-sequence number as a big-endian
/// 16-byte integer, per RFC 8216 §5.2.
pub fn derive_iv(media_sequence: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[8..].copy_from_slice(&media_sequence.to_be_bytes());
    iv
}

fn check_lengths(key: &[u8], iv: &[u8]) -> Result<([u8; 16], [u8; 16]), EncryptionError> {
    let key = key
        .try_into()
        .map_err(|_| EncryptionError::BadKeyLength(key.len()))?;
    let iv = iv
        .try_into()
        .map_err(|_| EncryptionError::BadIvLength(iv.len()))?;
    Ok((key, iv))
}

/// Encrypt a whole segment with PKCS#7 padding. Pure function of its
/// inputs; safe to call from any task.
pub fn encrypt_segment(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    let (key, iv) = check_lengths(key, iv)?;
    let cipher = Aes128CbcEnc::new(&key.into(), &iv.into());
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// Inverse of [`encrypt_segment`].
pub fn decrypt_segment(
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let (key, iv) = check_lengths(key, iv)?;
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(EncryptionError::BadCiphertextLength(ciphertext.len()));
    }
    let cipher = Aes128CbcDec::new(&key.into(), &iv.into());
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| EncryptionError::PaddingFailure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = [0x01u8; 16];
        let iv = [0x02u8; 16];
        let plaintext = [0x03u8; 100];

        let ciphertext = encrypt_segment(&key, &iv, &plaintext).unwrap();
        assert_eq!(ciphertext.len() % 16, 0);
        assert!(ciphertext.len() >= 112);

        let decrypted = decrypt_segment(&key, &iv, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn exact_block_input_gains_a_padding_block() {
        let key = [0u8; 16];
        let iv = [0u8; 16];
        let plaintext = [0xaau8; 32];
        let ciphertext = encrypt_segment(&key, &iv, &plaintext).unwrap();
        assert_eq!(ciphertext.len(), 48);
        assert_eq!(decrypt_segment(&key, &iv, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn bad_lengths_are_rejected() {
        assert_eq!(
            encrypt_segment(&[0; 8], &[0; 16], &[1]),
            Err(EncryptionError::BadKeyLength(8))
        );
        assert_eq!(
            encrypt_segment(&[0; 16], &[0; 4], &[1]),
            Err(EncryptionError::BadIvLength(4))
        );
        assert_eq!(
            decrypt_segment(&[0; 16], &[0; 16], &[1, 2, 3]),
            Err(EncryptionError::BadCiphertextLength(3))
        );
    }

    #[test]
    fn tampered_padding_fails() {
        let key = [0x01u8; 16];
        let iv = [0x02u8; 16];
        let mut ciphertext = encrypt_segment(&key, &iv, &[0x03; 20]).unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xff;
        assert_eq!(
            decrypt_segment(&key, &iv, &ciphertext),
            Err(EncryptionError::PaddingFailure)
        );
    }

    #[test]
    fn iv_derivation_is_big_endian_msn() {
        let iv = derive_iv(0x0102);
        assert_eq!(&iv[..14], &[0; 14]);
        assert_eq!(iv[14], 0x01);
        assert_eq!(iv[15], 0x02);
    }
}
