//! Segment encryption: AES-128 whole-segment, SAMPLE-AES subsample modes
//! and live key management.

pub mod aes;
pub mod keys;
pub mod sample_aes;

pub use aes::{decrypt_segment, derive_iv, encrypt_segment};
pub use keys::{KeyManagerStats, KeyProvider, KeyRotationPolicy, LiveEncryptionKey, LiveKeyManager};
pub use sample_aes::{EncryptedSample, SampleAesEncryptor, SampleAesMode};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("key must be 16 bytes, got {0}")]
    BadKeyLength(usize),
    #[error("IV must be 16 bytes, got {0}")]
    BadIvLength(usize),
    #[error("ciphertext padding is invalid")]
    PaddingFailure,
    #[error("ciphertext length {0} is not a multiple of the block size")]
    BadCiphertextLength(usize),
}
