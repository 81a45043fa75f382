use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginSettings {
    /// Output directory for playlists and segments
    pub output_dir: String,

    /// Segmentation parameters
    pub segmenter: SegmenterSettings,

    /// LL-HLS origin parameters; omit for plain live HLS
    #[serde(default)]
    pub low_latency: Option<LowLatencySettings>,

    /// Segment encryption; omit for clear output
    #[serde(default)]
    pub encryption: Option<EncryptionSettings>,

    /// Delivery endpoints, e.g.
    ///
    /// - https://origin.example/live/
    /// - rtmp://ingest.example/app
    #[serde(default)]
    pub destinations: Vec<DestinationSettings>,

    /// Recording configuration; omit to disable recording
    #[serde(default)]
    pub recording: Option<RecordingSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterSettings {
    /// Target segment length in seconds
    pub target_duration: f64,
    /// Partial segment target in seconds; enables LL-HLS output
    #[serde(default)]
    pub part_target: Option<f64>,
    /// Frame ring buffer capacity
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LowLatencySettings {
    /// Number of full segments kept in the playlist
    pub window_size: usize,
    /// CAN-SKIP-UNTIL skip boundary in seconds
    #[serde(default)]
    pub can_skip_until: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionSettings {
    /// NONE, AES-128, SAMPLE-AES or SAMPLE-AES-CTR
    pub method: String,
    /// Key URI advertised to players
    pub key_uri: String,
    /// Segments between rotations; 0 disables rotation
    #[serde(default)]
    pub rotate_every_segments: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationSettings {
    pub id: String,
    pub url: String,
    /// PUT or POST for HTTP destinations
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub stream_key: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSettings {
    pub directory: String,
    #[serde(default = "default_playlist_name")]
    pub playlist_name: String,
    #[serde(default)]
    pub incremental_playlist: bool,
}

fn default_playlist_name() -> String {
    "playlist.m3u8".to_string()
}

impl OriginSettings {
    /// Load from a YAML/JSON/TOML file with environment overrides
    /// (`HLS_ORIGIN__SEGMENTER__TARGET_DURATION=4` style).
    pub fn from_file(path: &str) -> Result<Self> {
        let settings: Self = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("HLS_ORIGIN").separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn retry_policy_for(&self, destination: &DestinationSettings) -> crate::push::RetryPolicy {
        let mut policy = crate::push::RetryPolicy::default();
        if let Some(max) = destination.max_retries {
            policy.max_retries = max;
        }
        policy
    }

    pub fn segmenter_config(&self) -> crate::live::SegmenterConfig {
        crate::live::SegmenterConfig {
            target_duration: self.segmenter.target_duration,
            part_target: self.segmenter.part_target,
            capacity: self.segmenter.capacity,
        }
    }

    pub fn llhls_config(&self) -> Option<crate::live::LlhlsConfig> {
        let ll = self.low_latency.as_ref()?;
        Some(crate::live::LlhlsConfig {
            target_duration: self.segmenter.target_duration,
            part_target: self.segmenter.part_target.unwrap_or(0.0),
            window_size: ll.window_size,
            can_skip_until: ll.can_skip_until,
        })
    }

    pub fn key_rotation_policy(&self) -> crate::crypto::KeyRotationPolicy {
        match &self.encryption {
            Some(enc) if enc.rotate_every_segments == 1 => {
                crate::crypto::KeyRotationPolicy::EverySegment
            }
            Some(enc) if enc.rotate_every_segments > 1 => {
                crate::crypto::KeyRotationPolicy::EveryNSegments(enc.rotate_every_segments)
            }
            Some(_) | None => crate::crypto::KeyRotationPolicy::None,
        }
    }
}
