//! Multi-system CENC plumbing: system ids, `pssh` fan-out and session-key
//! emission for master playlists.
//!
//! The license exchange itself is out of scope; this module only produces
//! the manifest attributes and init-segment metadata players need to start
//! one.

use crate::crypto::LiveEncryptionKey;
use crate::manifest::{EncryptionKey, EncryptionMethod};
use crate::media::mp4::PsshBox;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DrmSystem {
    Widevine,
    PlayReady,
    FairPlay,
}

impl DrmSystem {
    /// The registered protection-system UUID.
    pub fn system_id(&self) -> [u8; 16] {
        match self {
            // edef8ba9-79d6-4ace-a3c8-27dcd51d21ed
            DrmSystem::Widevine => [
                0xed, 0xef, 0x8b, 0xa9, 0x79, 0xd6, 0x4a, 0xce, 0xa3, 0xc8, 0x27, 0xdc, 0xd5,
                0x1d, 0x21, 0xed,
            ],
            // 9a04f079-9840-4286-ab92-e65be0885f95
            DrmSystem::PlayReady => [
                0x9a, 0x04, 0xf0, 0x79, 0x98, 0x40, 0x42, 0x86, 0xab, 0x92, 0xe6, 0x5b, 0xe0,
                0x88, 0x5f, 0x95,
            ],
            // 94ce86fb-07ff-4f43-adb8-93d2fa968ca2
            DrmSystem::FairPlay => [
                0x94, 0xce, 0x86, 0xfb, 0x07, 0xff, 0x4f, 0x43, 0xad, 0xb8, 0x93, 0xd2, 0xfa,
                0x96, 0x8c, 0xa2,
            ],
        }
    }

    /// `KEYFORMAT` attribute value for session keys.
    pub fn key_format(&self) -> &'static str {
        match self {
            DrmSystem::Widevine => "urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed",
            DrmSystem::PlayReady => "com.microsoft.playready",
            DrmSystem::FairPlay => "com.apple.streamingkeydelivery",
        }
    }
}

/// One enabled DRM system with its opaque `pssh` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrmSystemConfig {
    pub system: DrmSystem,
    /// System-specific init data the license server handed out.
    pub pssh_data: Vec<u8>,
    /// Key/license acquisition URI advertised in the playlist.
    pub license_uri: String,
}

/// Fans the current live key out to every enabled CENC system.
pub struct DrmPipeline {
    systems: Vec<DrmSystemConfig>,
}

impl DrmPipeline {
    pub fn new(systems: Vec<DrmSystemConfig>) -> Self {
        Self { systems }
    }

    pub fn systems(&self) -> &[DrmSystemConfig] {
        &self.systems
    }

    /// `pssh` boxes for the init segment, one per system.
    pub fn pssh_boxes(&self) -> Vec<PsshBox> {
        self.systems
            .iter()
            .map(|s| PsshBox {
                system_id: s.system.system_id(),
                data: s.pssh_data.clone(),
            })
            .collect()
    }

    /// `#EXT-X-SESSION-KEY` entries for the master playlist.
    pub fn session_keys(&self, key: &LiveEncryptionKey) -> Vec<EncryptionKey> {
        self.systems
            .iter()
            .map(|s| EncryptionKey {
                method: EncryptionMethod::SampleAesCtr,
                uri: Some(s.license_uri.clone()),
                iv: key.iv,
                key_format: Some(s.system.key_format().to_string()),
                key_format_versions: Some("1".to_string()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn system_ids_match_registered_uuids() {
        assert_eq!(
            Uuid::from_bytes(DrmSystem::Widevine.system_id()).to_string(),
            "edef8ba9-79d6-4ace-a3c8-27dcd51d21ed"
        );
        assert_eq!(
            Uuid::from_bytes(DrmSystem::PlayReady.system_id()).to_string(),
            "9a04f079-9840-4286-ab92-e65be0885f95"
        );
        assert_eq!(
            Uuid::from_bytes(DrmSystem::FairPlay.system_id()).to_string(),
            "94ce86fb-07ff-4f43-adb8-93d2fa968ca2"
        );
    }

    #[test]
    fn session_keys_cover_every_system() {
        let pipeline = DrmPipeline::new(vec![
            DrmSystemConfig {
                system: DrmSystem::Widevine,
                pssh_data: vec![1, 2, 3],
                license_uri: "https://license.example/wv".into(),
            },
            DrmSystemConfig {
                system: DrmSystem::FairPlay,
                pssh_data: vec![],
                license_uri: "skd://license.example/fp".into(),
            },
        ]);

        let key = LiveEncryptionKey {
            id: Uuid::new_v4(),
            key: [0; 16],
            iv: Some([1; 16]),
            uri: "unused".into(),
            key_format: None,
        };
        let keys = pipeline.session_keys(&key);
        assert_eq!(keys.len(), 2);
        assert_eq!(
            keys[0].key_format.as_deref(),
            Some("urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed")
        );
        assert_eq!(
            keys[1].key_format.as_deref(),
            Some("com.apple.streamingkeydelivery")
        );
        assert!(keys
            .iter()
            .all(|k| k.method == EncryptionMethod::SampleAesCtr));

        let pssh = pipeline.pssh_boxes();
        assert_eq!(pssh.len(), 2);
        assert_eq!(pssh[0].data, vec![1, 2, 3]);
    }
}
