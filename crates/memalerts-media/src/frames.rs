//! Frame sampling for vision analysis.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

/// Width frames are scaled to before being sent to the backend.
const FRAME_SCALE_WIDTH: u32 = 512;

/// Evenly spaced sample timestamps, avoiding the very first and last frame.
pub fn sample_timestamps(duration_secs: f64, count: usize) -> Vec<f64> {
    if count == 0 {
        return Vec::new();
    }
    if duration_secs <= 0.0 {
        return vec![0.0];
    }

    let step = duration_secs / (count as f64 + 1.0);
    (1..=count).map(|i| step * i as f64).collect()
}

/// Extract up to `count` JPEG frames from `input` into `work_dir`.
///
/// Frames that fail to decode are skipped; an empty result is not an error.
pub async fn sample_frames(
    input: impl AsRef<Path>,
    work_dir: impl AsRef<Path>,
    duration_secs: f64,
    count: usize,
    timeout_secs: u64,
) -> MediaResult<Vec<PathBuf>> {
    let input = input.as_ref();
    let work_dir = work_dir.as_ref();
    let filter = format!("scale={}:-2", FRAME_SCALE_WIDTH);
    let mut frames = Vec::new();

    for (idx, ts) in sample_timestamps(duration_secs, count).into_iter().enumerate() {
        let output = work_dir.join(format!("frame_{:02}.jpg", idx));
        let cmd = FfmpegCommand::new(input, &output)
            .seek(ts)
            .single_frame()
            .video_filter(&filter);

        match FfmpegRunner::new().with_timeout(timeout_secs).run(&cmd).await {
            Ok(()) if output.exists() => frames.push(output),
            Ok(()) => debug!("No frame produced at {:.2}s", ts),
            Err(e) => warn!("Frame extraction at {:.2}s failed: {}", ts, e),
        }
    }

    Ok(frames)
}
