//! FFmpeg CLI wrapper for the moderation pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with timeouts
//! - FFprobe stream inspection (duration, audio presence)
//! - Audio extraction for transcription
//! - Frame sampling for vision analysis
//! - Streaming SHA-256 content hashing

pub mod audio;
pub mod command;
pub mod error;
pub mod frames;
pub mod hash;
pub mod probe;
pub mod toolkit;

pub use audio::{extract_audio, AudioExtraction};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use frames::sample_frames;
pub use hash::{is_content_hash, sha256_file};
pub use probe::{probe_media, MediaInfo};
pub use toolkit::{FfmpegToolkit, MediaToolkit};
