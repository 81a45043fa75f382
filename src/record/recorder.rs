//! Simultaneous recording of a live stream through the storage trait.

use super::vod::{LiveToVodConverter, VodConvertOptions};
use super::{RecordingStorage, StorageError};
use crate::manifest::{write, MediaPlaylist, PlaylistType, Segment};
use chrono::{DateTime, Utc};
use log::{debug, info};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

/// One persisted segment, hashed so a resumed recording can skip
/// re-uploading unchanged files.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSegment {
    pub index: u64,
    pub filename: String,
    pub duration: f64,
    pub discontinuity: bool,
    pub program_date_time: Option<DateTime<Utc>>,
    pub sha256: [u8; 32],
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderConfig {
    /// Directory under the storage root; empty means the root itself.
    pub directory: String,
    pub playlist_name: String,
    /// Rewrite the event playlist after every segment.
    pub incremental_playlist: bool,
    pub target_duration: u64,
    /// `{index}` is replaced with the segment index.
    pub segment_template: String,
    pub init_segment_name: Option<String>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            directory: String::new(),
            playlist_name: "playlist.m3u8".to_string(),
            incremental_playlist: true,
            target_duration: 6,
            segment_template: "seg{index}.m4s".to_string(),
            init_segment_name: None,
        }
    }
}

struct RecorderState {
    segments: Vec<RecordedSegment>,
    finalized: bool,
}

/// Persists every live segment next to the live pipeline and keeps an
/// event playlist current; `finalize` turns the recording into VOD.
pub struct SimultaneousRecorder<S> {
    storage: S,
    config: RecorderConfig,
    state: Mutex<RecorderState>,
}

impl<S: RecordingStorage> SimultaneousRecorder<S> {
    pub fn new(storage: S, config: RecorderConfig) -> Self {
        Self {
            storage,
            config,
            state: Mutex::new(RecorderState {
                segments: Vec::new(),
                finalized: false,
            }),
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Store the fMP4 init segment under its configured name.
    pub async fn record_init_segment(&self, bytes: &[u8]) -> Result<(), StorageError> {
        let name = self
            .config
            .init_segment_name
            .clone()
            .unwrap_or_else(|| "init.mp4".to_string());
        self.storage
            .write_segment(bytes, &name, &self.config.directory)
            .await?;
        info!("recorded init segment {name} ({} bytes)", bytes.len());
        Ok(())
    }

    /// Persist one segment. State is only updated after the storage write
    /// succeeds, so a failure leaves the recorder unchanged.
    pub async fn record_segment(
        &self,
        bytes: &[u8],
        duration: f64,
        discontinuity: bool,
    ) -> Result<RecordedSegment, StorageError> {
        let index = {
            let state = self.state.lock().await;
            state.segments.len() as u64
        };
        let filename = self
            .config
            .segment_template
            .replace("{index}", &index.to_string());

        self.storage
            .write_segment(bytes, &filename, &self.config.directory)
            .await?;

        let record = RecordedSegment {
            index,
            filename,
            duration,
            discontinuity,
            program_date_time: Some(Utc::now()),
            sha256: Sha256::digest(bytes).into(),
            size: bytes.len() as u64,
        };

        let snapshot = {
            let mut state = self.state.lock().await;
            state.segments.push(record.clone());
            state.segments.clone()
        };
        debug!(
            "recorded segment {} [{:.3}s, {} bytes]",
            record.index, record.duration, record.size
        );

        if self.config.incremental_playlist {
            let text = self.event_playlist(&snapshot);
            self.storage
                .write_playlist(&text, &self.config.playlist_name, &self.config.directory)
                .await?;
        }
        Ok(record)
    }

    fn event_playlist(&self, segments: &[RecordedSegment]) -> String {
        let mut pl = MediaPlaylist {
            target_duration: self.config.target_duration,
            playlist_type: Some(PlaylistType::Event),
            independent_segments: true,
            ..Default::default()
        };
        for rec in segments {
            pl.segments.push(Segment::new(rec.filename.clone(), rec.duration));
        }
        pl.version = Some(pl.required_version().max(3));
        write::write_media(&pl)
    }

    pub async fn segments(&self) -> Vec<RecordedSegment> {
        self.state.lock().await.segments.clone()
    }

    /// Write `chapters.json` / `chapters.vtt` next to the recording.
    pub async fn write_chapters(
        &self,
        generator: &super::chapters::AutoChapterGenerator,
        format: super::chapters::ChapterFormat,
    ) -> Result<(), StorageError> {
        use super::chapters::ChapterFormat;

        let total: f64 = {
            let state = self.state.lock().await;
            state.segments.iter().map(|s| s.duration).sum()
        };
        let text = generator.render(total, format);
        let filename = match format {
            ChapterFormat::PodcastJson => "chapters.json",
            ChapterFormat::WebVtt => "chapters.vtt",
        };
        self.storage
            .write_chapters(&text, filename, &self.config.directory)
            .await?;
        Ok(())
    }

    /// Write the final VOD playlist and return its text.
    pub async fn finalize(&self, options: VodConvertOptions) -> Result<String, StorageError> {
        let segments = {
            let mut state = self.state.lock().await;
            state.finalized = true;
            state.segments.clone()
        };
        let vod = LiveToVodConverter::new(options).convert(&segments);
        let text = write::write_media(&vod);
        self.storage
            .write_playlist(&text, &self.config.playlist_name, &self.config.directory)
            .await?;
        info!(
            "finalized recording: {} segments, {:.3}s total",
            segments.len(),
            vod.total_duration()
        );
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::super::FsStorage;
    use super::*;
    use crate::manifest::Manifest;

    fn recorder(dir: &tempfile::TempDir) -> SimultaneousRecorder<FsStorage> {
        SimultaneousRecorder::new(
            FsStorage::new(dir.path()),
            RecorderConfig {
                target_duration: 7,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn record_and_finalize_round_trips_as_vod() {
        let _ = pretty_env_logger::try_init();
        let dir = tempfile::tempdir().unwrap();
        let rec = recorder(&dir);

        for _ in 0..3 {
            rec.record_segment(&[0xab; 1024], 6.006, false).await.unwrap();
        }
        let text = rec.finalize(VodConvertOptions::default()).await.unwrap();

        let Manifest::Media(pl) = Manifest::parse(&text).unwrap() else {
            panic!("expected media playlist");
        };
        assert_eq!(pl.segments.len(), 3);
        assert_eq!(pl.target_duration, 7);
        assert!(pl.end_list);
        assert_eq!(pl.playlist_type, Some(PlaylistType::Vod));

        // files exist under the configured layout
        let storage = FsStorage::new(dir.path());
        assert!(storage.file_exists("seg0.m4s", "").await.unwrap());
        assert!(storage.file_exists("seg2.m4s", "").await.unwrap());
        assert!(storage.file_exists("playlist.m3u8", "").await.unwrap());
    }

    #[tokio::test]
    async fn incremental_playlist_is_event_typed() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recorder(&dir);
        rec.record_segment(&[1; 100], 6.0, false).await.unwrap();

        let text = tokio::fs::read_to_string(dir.path().join("playlist.m3u8"))
            .await
            .unwrap();
        assert!(text.contains("#EXT-X-PLAYLIST-TYPE:EVENT"));
        assert!(!text.contains("#EXT-X-ENDLIST"));
    }

    #[tokio::test]
    async fn chapters_land_next_to_the_recording() {
        use super::super::chapters::{AutoChapterGenerator, ChapterFormat};

        let dir = tempfile::tempdir().unwrap();
        let rec = recorder(&dir);
        rec.record_segment(&[1; 100], 6.0, false).await.unwrap();
        rec.record_segment(&[2; 100], 6.0, false).await.unwrap();

        let mut chapters = AutoChapterGenerator::new(1.0);
        chapters.add_chapter("Intro", 0.0);
        chapters.add_chapter("Main", 6.0);
        rec.write_chapters(&chapters, ChapterFormat::PodcastJson)
            .await
            .unwrap();

        let json = tokio::fs::read_to_string(dir.path().join("chapters.json"))
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        // the last chapter ends at the recording's total duration
        assert_eq!(value["chapters"][1]["endTime"], 12.0);
    }

    #[tokio::test]
    async fn segment_hashes_differ_by_content() {
        let dir = tempfile::tempdir().unwrap();
        let rec = recorder(&dir);
        let a = rec.record_segment(&[1; 64], 6.0, false).await.unwrap();
        let b = rec.record_segment(&[2; 64], 6.0, false).await.unwrap();
        assert_ne!(a.sha256, b.sha256);
        assert_eq!(a.index, 0);
        assert_eq!(b.index, 1);
    }

    #[tokio::test]
    async fn storage_failure_leaves_state_unchanged() {
        struct FailingStorage;
        #[async_trait::async_trait]
        impl RecordingStorage for FailingStorage {
            async fn write_segment(&self, _: &[u8], _: &str, _: &str) -> anyhow::Result<()> {
                anyhow::bail!("disk full")
            }
            async fn write_playlist(&self, _: &str, _: &str, _: &str) -> anyhow::Result<()> {
                anyhow::bail!("disk full")
            }
            async fn write_chapters(&self, _: &str, _: &str, _: &str) -> anyhow::Result<()> {
                anyhow::bail!("disk full")
            }
            async fn list_files(&self, _: &str) -> anyhow::Result<Vec<String>> {
                Ok(Vec::new())
            }
            async fn file_exists(&self, _: &str, _: &str) -> anyhow::Result<bool> {
                Ok(false)
            }
        }

        let rec = SimultaneousRecorder::new(FailingStorage, RecorderConfig::default());
        assert!(rec.record_segment(&[0; 10], 6.0, false).await.is_err());
        assert!(rec.segments().await.is_empty());
    }
}
