//! Client for the analysis service.
//!
//! The service wraps the transcription, text moderation and vision/metadata
//! models. The moderation pipeline talks to it through the
//! [`AnalysisBackend`] trait so it can be replaced by fakes in tests.

pub mod client;
pub mod error;
pub mod types;

pub use client::{AnalysisBackend, MlClient, MlClientConfig};
pub use error::{MlError, MlResult};
pub use types::{
    encode_file_base64, MetadataHints, MetadataSuggestion, ModerationResult, Transcription,
};
