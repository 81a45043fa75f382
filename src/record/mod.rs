//! Recording: simultaneous persistence of the live stream, live-to-VOD
//! conversion and chapter generation.

pub mod chapters;
pub mod recorder;
pub mod vod;

pub use chapters::{AutoChapterGenerator, Chapter, ChapterFormat};
pub use recorder::{RecordedSegment, RecorderConfig, SimultaneousRecorder};
pub use vod::{LiveToVodConverter, VodConvertOptions};

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// A storage trait failure; the recorder's in-memory state is unchanged
/// when this surfaces.
#[derive(Debug, Error)]
#[error("storage failure: {0}")]
pub struct StorageError(#[from] pub anyhow::Error);

/// Injected still-image extraction for recording posters and chapter art;
/// the codec work behind it is not this crate's concern.
#[async_trait]
pub trait ThumbnailImageProvider: Send + Sync {
    /// JPEG bytes for the frame nearest `timestamp` seconds into the
    /// segment, scaled to `(width, height)`.
    async fn extract_thumbnail(
        &self,
        segment_bytes: &[u8],
        timestamp: f64,
        size: (u32, u32),
    ) -> anyhow::Result<Vec<u8>>;
}

/// Where recordings land. Implementations may suspend; atomicity of a
/// partially written file is the implementation's contract.
#[async_trait]
pub trait RecordingStorage: Send + Sync {
    async fn write_segment(&self, bytes: &[u8], filename: &str, directory: &str)
        -> anyhow::Result<()>;
    async fn write_playlist(&self, text: &str, filename: &str, directory: &str)
        -> anyhow::Result<()>;
    async fn write_chapters(&self, text: &str, filename: &str, directory: &str)
        -> anyhow::Result<()>;
    async fn list_files(&self, directory: &str) -> anyhow::Result<Vec<String>>;
    async fn file_exists(&self, filename: &str, directory: &str) -> anyhow::Result<bool>;
}

/// Plain filesystem layout under a base directory.
pub struct FsStorage {
    base: PathBuf,
}

impl FsStorage {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn dir(&self, directory: &str) -> PathBuf {
        if directory.is_empty() {
            self.base.clone()
        } else {
            self.base.join(directory)
        }
    }

    async fn write(&self, bytes: &[u8], filename: &str, directory: &str) -> anyhow::Result<()> {
        let dir = self.dir(directory);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(filename), bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordingStorage for FsStorage {
    async fn write_segment(
        &self,
        bytes: &[u8],
        filename: &str,
        directory: &str,
    ) -> anyhow::Result<()> {
        self.write(bytes, filename, directory).await
    }

    async fn write_playlist(
        &self,
        text: &str,
        filename: &str,
        directory: &str,
    ) -> anyhow::Result<()> {
        self.write(text.as_bytes(), filename, directory).await
    }

    async fn write_chapters(
        &self,
        text: &str,
        filename: &str,
        directory: &str,
    ) -> anyhow::Result<()> {
        self.write(text.as_bytes(), filename, directory).await
    }

    async fn list_files(&self, directory: &str) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(self.dir(directory)).await?;
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn file_exists(&self, filename: &str, directory: &str) -> anyhow::Result<bool> {
        Ok(tokio::fs::try_exists(self.dir(directory).join(filename)).await?)
    }
}
