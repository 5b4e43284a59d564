//! Audio track extraction for transcription.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::probe::probe_media;

/// Output file name inside the working directory.
const AUDIO_FILE_NAME: &str = "audio.mp3";

/// Result of an audio extraction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioExtraction {
    /// Mono 16 kHz MP3 written to this path
    Extracted(PathBuf),
    /// The media has no audio stream; not an error
    NoAudio,
}

impl AudioExtraction {
    pub fn path(&self) -> Option<&Path> {
        match self {
            AudioExtraction::Extracted(path) => Some(path),
            AudioExtraction::NoAudio => None,
        }
    }
}

/// Extract the audio track of `input` into `work_dir`.
///
/// Media without an audio stream yields [`AudioExtraction::NoAudio`].
pub async fn extract_audio(
    input: impl AsRef<Path>,
    work_dir: impl AsRef<Path>,
    timeout_secs: u64,
) -> MediaResult<AudioExtraction> {
    let input = input.as_ref();
    let output = work_dir.as_ref().join(AUDIO_FILE_NAME);

    let info = probe_media(input).await?;
    if !info.has_audio {
        debug!("No audio stream in {}", input.display());
        return Ok(AudioExtraction::NoAudio);
    }

    let cmd = FfmpegCommand::new(input, &output)
        .no_video()
        .output_args(["-ac", "1", "-ar", "16000", "-b:a", "64k"])
        .audio_codec("libmp3lame");

    match FfmpegRunner::new().with_timeout(timeout_secs).run(&cmd).await {
        Ok(()) => {}
        Err(e) if e.is_missing_stream() => return Ok(AudioExtraction::NoAudio),
        Err(e) => return Err(e),
    }

    let size = tokio::fs::metadata(&output).await.map(|m| m.len()).unwrap_or(0);
    if size == 0 {
        return Ok(AudioExtraction::NoAudio);
    }

    info!("Extracted audio from {} ({} bytes)", input.display(), size);
    Ok(AudioExtraction::Extracted(output))
}
