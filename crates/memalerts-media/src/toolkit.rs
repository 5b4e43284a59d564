//! Media operations behind a trait so the pipeline can be exercised without FFmpeg.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::audio::{extract_audio, AudioExtraction};
use crate::error::MediaResult;
use crate::frames::sample_frames;
use crate::hash::sha256_file;
use crate::probe::{probe_media, MediaInfo};

/// Media operations used by the analysis pipeline.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Inspect streams and duration.
    async fn probe(&self, input: &Path) -> MediaResult<MediaInfo>;

    /// Extract the audio track into `work_dir`.
    async fn extract_audio(&self, input: &Path, work_dir: &Path) -> MediaResult<AudioExtraction>;

    /// Sample up to `count` frames into `work_dir`.
    async fn sample_frames(
        &self,
        input: &Path,
        work_dir: &Path,
        duration_secs: f64,
        count: usize,
    ) -> MediaResult<Vec<PathBuf>>;

    /// Compute the content hash of a file.
    async fn hash_file(&self, input: &Path) -> MediaResult<String>;
}

/// [`MediaToolkit`] backed by the FFmpeg/FFprobe CLIs.
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    /// Deadline for each FFmpeg invocation
    pub command_timeout_secs: u64,
}

impl Default for FfmpegToolkit {
    fn default() -> Self {
        Self {
            command_timeout_secs: 120,
        }
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe(&self, input: &Path) -> MediaResult<MediaInfo> {
        probe_media(input).await
    }

    async fn extract_audio(&self, input: &Path, work_dir: &Path) -> MediaResult<AudioExtraction> {
        extract_audio(input, work_dir, self.command_timeout_secs).await
    }

    async fn sample_frames(
        &self,
        input: &Path,
        work_dir: &Path,
        duration_secs: f64,
        count: usize,
    ) -> MediaResult<Vec<PathBuf>> {
        sample_frames(input, work_dir, duration_secs, count, self.command_timeout_secs).await
    }

    async fn hash_file(&self, input: &Path) -> MediaResult<String> {
        sha256_file(input).await
    }
}
