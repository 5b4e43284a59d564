//! Analysis pipeline for one piece of media.
//!
//! Stages run in order: probe, audio extraction, transcription, text
//! moderation, optional vision frames and metadata synthesis. Missing audio
//! or frames only skip their stage. A policy block from the backend (quota,
//! region, credentials) at any stage switches the whole analysis to the
//! keyword heuristic; every other backend error propagates to the retry
//! bookkeeping.

use std::path::Path;
use std::sync::Arc;

use memalerts_media::{AudioExtraction, MediaInfo, MediaToolkit};
use memalerts_ml_client::{encode_file_base64, AnalysisBackend, MetadataHints, MlError};
use memalerts_models::text::{build_search_text, normalize_tags, truncate_chars};
use memalerts_models::{
    AiDecision, AnalysisOutcome, FallbackReason, ModelVersions, Submission, PIPELINE_VERSION,
    PIPELINE_VERSION_HEURISTIC,
};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::heuristics::KeywordHeuristics;
use crate::logging::SubmissionLogger;
use crate::metrics;

/// Stored transcript cap.
pub const TRANSCRIPT_MAX_CHARS: usize = 20_000;
/// Stored description cap, transcript excerpt included.
pub const DESCRIPTION_MAX_CHARS: usize = 2_000;
/// Suggested title cap.
pub const TITLE_MAX_CHARS: usize = 120;
/// Search text cap.
pub const SEARCH_TEXT_MAX_CHARS: usize = 4_000;

/// Pipeline tunables.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub medium_threshold: f64,
    pub high_threshold: f64,
    pub tag_limit: usize,
    pub vision_enabled: bool,
    pub metadata_enabled: bool,
    pub vision_frames: usize,
}

impl From<&WorkerConfig> for PipelineSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            medium_threshold: config.medium_threshold,
            high_threshold: config.high_threshold,
            tag_limit: config.tag_limit,
            vision_enabled: config.vision_enabled,
            metadata_enabled: config.metadata_enabled,
            vision_frames: config.vision_frames,
        }
    }
}

/// Result of a pipeline run.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub outcome: AnalysisOutcome,
    /// Duration measured by the probe
    pub duration_ms: Option<i64>,
}

/// Fallback reason for a policy-blocked backend error.
pub fn fallback_reason_for(error: &MlError) -> Option<FallbackReason> {
    match error {
        MlError::QuotaExceeded(_) => Some(FallbackReason::Quota),
        MlError::RegionBlocked(_) => Some(FallbackReason::RegionBlocked),
        MlError::MissingCredentials(_) => Some(FallbackReason::MissingCredentials),
        _ => None,
    }
}

/// Description capped at `max_chars`, with as many transcript words
/// appended as still fit.
pub fn compose_description(
    description: Option<&str>,
    transcript: Option<&str>,
    max_chars: usize,
) -> Option<String> {
    let mut out = truncate_chars(description.map(str::trim).unwrap_or(""), max_chars);
    let mut len = out.chars().count();

    if let Some(transcript) = transcript.map(str::trim).filter(|t| !t.is_empty()) {
        let mut first = true;
        for word in transcript.split_whitespace() {
            let sep = match (first, out.is_empty()) {
                (_, true) => "",
                (true, false) => "\n\n",
                (false, false) => " ",
            };
            let added = sep.chars().count() + word.chars().count();
            if len + added > max_chars {
                break;
            }
            out.push_str(sep);
            out.push_str(word);
            len += added;
            first = false;
        }
    }

    (!out.is_empty()).then_some(out)
}

/// Moderation half of the analysis.
struct Moderation {
    risk_score: f64,
    labels: Vec<String>,
    model: Option<String>,
    fallback: Option<FallbackReason>,
}

/// Metadata half of the analysis.
#[derive(Default)]
struct Metadata {
    title: Option<String>,
    tags: Vec<String>,
    description: Option<String>,
    model: Option<String>,
}

/// Runs the analysis stages against a local media file.
#[derive(Clone)]
pub struct AnalysisPipeline {
    backend: Option<Arc<dyn AnalysisBackend>>,
    media: Arc<dyn MediaToolkit>,
    heuristics: KeywordHeuristics,
    settings: PipelineSettings,
}

impl AnalysisPipeline {
    pub fn new(
        backend: Option<Arc<dyn AnalysisBackend>>,
        media: Arc<dyn MediaToolkit>,
        heuristics: KeywordHeuristics,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            backend,
            media,
            heuristics,
            settings,
        }
    }

    /// Analyze the media of `submission`, using `work_dir` for scratch files.
    pub async fn analyze(
        &self,
        submission: &Submission,
        media_path: &Path,
        work_dir: &Path,
        logger: &SubmissionLogger,
    ) -> WorkerResult<Analysis> {
        let info = self.media.probe(media_path).await?;
        let duration_ms = info.duration_ms();
        logger.log_stage(
            "probe",
            &format!(
                "duration={:.1}s video={} audio={}",
                info.duration, info.has_video, info.has_audio
            ),
        );

        let Some(backend) = self.backend.as_ref() else {
            let outcome = self.heuristic_outcome(submission, FallbackReason::BackendDisabled);
            return Ok(Analysis {
                outcome,
                duration_ms,
            });
        };

        let outcome = match self
            .run_backend(backend.as_ref(), submission, media_path, work_dir, &info, logger)
            .await
        {
            Ok(outcome) => outcome,
            Err(WorkerError::Ml(e)) if e.is_policy_block() => {
                let reason = fallback_reason_for(&e).unwrap_or(FallbackReason::BackendDisabled);
                logger.log_warning(
                    "fallback",
                    &format!("Backend refused service ({}), using keyword heuristic: {}", reason, e),
                );
                self.heuristic_outcome(submission, reason)
            }
            Err(e) => return Err(e),
        };

        Ok(Analysis {
            outcome,
            duration_ms,
        })
    }

    async fn run_backend(
        &self,
        backend: &dyn AnalysisBackend,
        submission: &Submission,
        media_path: &Path,
        work_dir: &Path,
        info: &MediaInfo,
        logger: &SubmissionLogger,
    ) -> WorkerResult<AnalysisOutcome> {
        let (transcript, transcription_model) = match self
            .transcribe(backend, media_path, work_dir, info, logger)
            .await?
        {
            Some((text, model)) => (Some(text), model),
            None => (None, None),
        };

        let moderation = match transcript.as_deref() {
            Some(text) => {
                let result = backend.moderate_text(text).await?.normalized();
                Moderation {
                    risk_score: result.risk_score,
                    labels: result.labels,
                    model: result.model,
                    fallback: None,
                }
            }
            None => {
                let score = self.heuristics.assess(&self.context_texts(submission));
                let mut labels = score.labels;
                labels.push(FallbackReason::NoAudio.label());
                Moderation {
                    risk_score: score.risk_score,
                    labels,
                    model: None,
                    fallback: Some(FallbackReason::NoAudio),
                }
            }
        };
        logger.log_stage(
            "moderation",
            &format!("risk={:.3} labels={:?}", moderation.risk_score, moderation.labels),
        );

        let metadata = if self.settings.metadata_enabled {
            let frames = self.sample_frames(media_path, work_dir, info, logger).await;
            let hints = MetadataHints {
                title: submission.title.clone(),
                notes: submission.notes.clone(),
                transcript: transcript.clone(),
                labels: moderation.labels.clone(),
                frames,
                max_tags: self.settings.tag_limit,
            };
            let suggestion = backend.synthesize_metadata(&hints).await?;
            Metadata {
                title: suggestion.title,
                tags: suggestion.tags,
                description: suggestion.description,
                model: suggestion.model,
            }
        } else {
            Metadata::default()
        };

        let mut versions = ModelVersions::pipeline(if moderation.fallback.is_some() {
            PIPELINE_VERSION_HEURISTIC
        } else {
            PIPELINE_VERSION
        });
        versions.transcription_model = transcription_model;
        versions.moderation_model = moderation.model.clone();
        versions.metadata_model = metadata.model.clone();
        versions.fallback_reason = moderation.fallback;

        Ok(self.finish(submission, moderation, metadata, transcript, versions))
    }

    /// Extract and transcribe audio into `(text, model)`. `None` when there
    /// is nothing to score.
    async fn transcribe(
        &self,
        backend: &dyn AnalysisBackend,
        media_path: &Path,
        work_dir: &Path,
        info: &MediaInfo,
        logger: &SubmissionLogger,
    ) -> WorkerResult<Option<(String, Option<String>)>> {
        if !info.has_audio {
            logger.log_stage("audio", "No audio stream");
            return Ok(None);
        }

        let audio = match self.media.extract_audio(media_path, work_dir).await {
            Ok(AudioExtraction::Extracted(path)) => path,
            Ok(AudioExtraction::NoAudio) => {
                logger.log_stage("audio", "Audio stream is empty");
                return Ok(None);
            }
            Err(e) => {
                logger.log_warning("audio", &format!("Audio extraction failed, skipping: {}", e));
                return Ok(None);
            }
        };

        let transcription = backend.transcribe(&audio).await?;
        let text = transcription.text.trim();
        logger.log_stage("transcribe", &format!("{} chars", text.chars().count()));
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some((
            truncate_chars(text, TRANSCRIPT_MAX_CHARS),
            transcription.model.clone(),
        )))
    }

    /// Base64 frames for vision. Failures leave the list empty.
    async fn sample_frames(
        &self,
        media_path: &Path,
        work_dir: &Path,
        info: &MediaInfo,
        logger: &SubmissionLogger,
    ) -> Vec<String> {
        if !self.settings.vision_enabled || !info.has_video || self.settings.vision_frames == 0 {
            return Vec::new();
        }

        let paths = match self
            .media
            .sample_frames(media_path, work_dir, info.duration, self.settings.vision_frames)
            .await
        {
            Ok(paths) => paths,
            Err(e) => {
                logger.log_warning("vision", &format!("Frame sampling failed, skipping: {}", e));
                return Vec::new();
            }
        };

        let mut frames = Vec::with_capacity(paths.len());
        for path in paths {
            match encode_file_base64(&path).await {
                Ok(encoded) => frames.push(encoded),
                Err(e) => logger.log_warning("vision", &format!("Skipping frame: {}", e)),
            }
        }
        frames
    }

    fn context_texts<'a>(&self, submission: &'a Submission) -> Vec<&'a str> {
        let mut texts = vec![submission.title.as_str()];
        if let Some(notes) = submission.notes.as_deref() {
            texts.push(notes);
        }
        texts
    }

    /// Analysis produced without the backend.
    pub fn heuristic_outcome(
        &self,
        submission: &Submission,
        reason: FallbackReason,
    ) -> AnalysisOutcome {
        let score = self.heuristics.assess(&self.context_texts(submission));
        let mut labels = score.labels;
        labels.push(reason.label());

        let moderation = Moderation {
            risk_score: score.risk_score,
            labels,
            model: None,
            fallback: Some(reason),
        };
        let mut versions = ModelVersions::pipeline(PIPELINE_VERSION_HEURISTIC);
        versions.fallback_reason = Some(reason);

        self.finish(submission, moderation, Metadata::default(), None, versions)
    }

    fn finish(
        &self,
        submission: &Submission,
        moderation: Moderation,
        metadata: Metadata,
        transcript: Option<String>,
        versions: ModelVersions,
    ) -> AnalysisOutcome {
        if let Some(reason) = moderation.fallback {
            metrics::record_fallback(reason.as_str());
        }

        let limit = self.settings.tag_limit;
        let mut tags = normalize_tags(&metadata.tags, limit);
        if tags.is_empty() {
            tags = self.heuristics.fallback_tags(
                &submission.title,
                submission.notes.as_deref(),
                transcript.as_deref(),
                &moderation.labels,
                limit,
            );
        }

        let auto_title = metadata
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| truncate_chars(t, TITLE_MAX_CHARS));
        let auto_description = compose_description(
            metadata.description.as_deref(),
            transcript.as_deref(),
            DESCRIPTION_MAX_CHARS,
        );
        let search_text = build_search_text(
            Some(auto_title.as_deref().unwrap_or(&submission.title)),
            &tags,
            auto_description.as_deref(),
            SEARCH_TEXT_MAX_CHARS,
        );

        let decision = AiDecision::from_risk(
            moderation.risk_score,
            self.settings.medium_threshold,
            self.settings.high_threshold,
        );

        AnalysisOutcome {
            decision,
            risk_score: moderation.risk_score,
            labels: moderation.labels,
            transcript,
            auto_title,
            auto_tags: tags,
            auto_description,
            search_text,
            model_versions: versions,
        }
    }
}
