//! Reuse of completed analyses for identical content.
//!
//! A prior result is only worth copying if it carries information beyond
//! the submitter's own title. Descriptions and tags that are blank, made of
//! placeholder words, or merely repeat the title are skipped so that a
//! low-information result is never locked in as a permanent `done`.

use std::collections::BTreeSet;

use memalerts_db::PriorAnalysis;
use memalerts_models::text::{normalize_text, token_set};
use memalerts_models::{AnalysisOutcome, ModelVersions, PIPELINE_VERSION_REUSE};

/// Why a prior analysis was not reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No decision or score recorded
    Incomplete,
    /// Produced by the heuristic because the backend was unavailable
    BackendFallback,
    /// Description and tags are blank
    Empty,
    /// Only placeholder words
    Placeholder,
    /// Only words from the title
    TitleEcho,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Incomplete => "incomplete",
            SkipReason::BackendFallback => "backend_fallback",
            SkipReason::Empty => "empty",
            SkipReason::Placeholder => "placeholder",
            SkipReason::TitleEcho => "title_echo",
        }
    }
}

/// Decides which prior analyses may be copied.
#[derive(Debug, Clone)]
pub struct ReusePolicy {
    placeholder_words: BTreeSet<String>,
}

impl ReusePolicy {
    pub fn new(placeholder_words: &[String]) -> Self {
        Self {
            placeholder_words: placeholder_words
                .iter()
                .flat_map(|w| token_set(&normalize_text(w)))
                .collect(),
        }
    }

    /// Check one prior analysis against the current submission title.
    pub fn check(&self, prior: &PriorAnalysis, current_title: &str) -> Result<(), SkipReason> {
        if prior.decision.is_none() || prior.risk_score.is_none() {
            return Err(SkipReason::Incomplete);
        }

        let fallback_blocked = prior
            .model_versions
            .as_ref()
            .and_then(|v| serde_json::from_value::<ModelVersions>(v.clone()).ok())
            .and_then(|v| v.fallback_reason)
            .is_some_and(|r| r.is_backend_unavailable());
        if fallback_blocked {
            return Err(SkipReason::BackendFallback);
        }

        let mut tokens = BTreeSet::new();
        if let Some(description) = prior.auto_description.as_deref() {
            tokens.extend(token_set(&normalize_text(description)));
        }
        for tag in &prior.auto_tags {
            tokens.extend(token_set(&normalize_text(tag)));
        }
        if tokens.is_empty() {
            return Err(SkipReason::Empty);
        }

        tokens.retain(|t| !self.placeholder_words.contains(t));
        if tokens.is_empty() {
            return Err(SkipReason::Placeholder);
        }

        let mut title_tokens = token_set(&normalize_text(current_title));
        if let Some(source_title) = prior.source_title.as_deref() {
            title_tokens.extend(token_set(&normalize_text(source_title)));
        }
        tokens.retain(|t| !title_tokens.contains(t));
        if tokens.is_empty() {
            return Err(SkipReason::TitleEcho);
        }

        Ok(())
    }

    /// First reusable prior analysis, in the order given.
    pub fn select<'a>(
        &self,
        priors: &'a [PriorAnalysis],
        current_title: &str,
    ) -> Option<&'a PriorAnalysis> {
        priors.iter().find(|p| self.check(p, current_title).is_ok())
    }
}

/// Turn a reusable prior analysis into this submission's outcome.
///
/// Returns `None` if the prior lacks a decision or score.
pub fn reuse_outcome(prior: &PriorAnalysis) -> Option<AnalysisOutcome> {
    let decision = prior.decision?;
    let risk_score = prior.risk_score?;

    let previous = prior
        .model_versions
        .as_ref()
        .and_then(|v| serde_json::from_value::<ModelVersions>(v.clone()).ok());
    let mut model_versions = ModelVersions::pipeline(PIPELINE_VERSION_REUSE);
    if let Some(previous) = previous {
        model_versions.transcription_model = previous.transcription_model;
        model_versions.moderation_model = previous.moderation_model;
        model_versions.metadata_model = previous.metadata_model;
    }

    Some(AnalysisOutcome {
        decision,
        risk_score,
        labels: prior.labels.clone(),
        transcript: prior.transcript.clone(),
        auto_title: prior.auto_title.clone(),
        auto_tags: prior.auto_tags.clone(),
        auto_description: prior.auto_description.clone(),
        search_text: prior.search_text.clone(),
        model_versions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use memalerts_models::{AiDecision, FallbackReason, PIPELINE_VERSION_HEURISTIC};

    fn policy() -> ReusePolicy {
        ReusePolicy::new(&["мем".to_string(), "funny video".to_string()])
    }

    fn prior(description: Option<&str>, tags: &[&str]) -> PriorAnalysis {
        PriorAnalysis {
            source: "asset:a1".to_string(),
            source_title: None,
            decision: Some(AiDecision::Low),
            risk_score: Some(0.1),
            labels: vec![],
            transcript: None,
            auto_title: None,
            auto_tags: tags.iter().map(|t| t.to_string()).collect(),
            auto_description: description.map(String::from),
            search_text: None,
            model_versions: None,
        }
    }

    #[test]
    fn test_informative_prior_is_reusable() {
        let p = prior(Some("Кот готовит борщ на кухне"), &["кот", "кухня"]);
        assert_eq!(policy().check(&p, "Смешной кот"), Ok(()));
    }

    #[test]
    fn test_blank_prior_is_skipped() {
        let p = prior(Some("   "), &[]);
        assert_eq!(policy().check(&p, "x"), Err(SkipReason::Empty));
    }

    #[test]
    fn test_placeholder_prior_is_skipped() {
        let p = prior(Some("«Мем»"), &["funny", "VIDEO"]);
        assert_eq!(policy().check(&p, "x"), Err(SkipReason::Placeholder));
    }

    #[test]
    fn test_title_echo_is_skipped() {
        let p = prior(Some("Смешной кот"), &["кот"]);
        assert_eq!(policy().check(&p, "'Смешной'  КОТ"), Err(SkipReason::TitleEcho));
    }

    #[test]
    fn test_source_title_echo_is_skipped() {
        let mut p = prior(Some("Танцующий енот"), &[]);
        p.source_title = Some("Танцующий енот".to_string());
        assert_eq!(policy().check(&p, "другое"), Err(SkipReason::TitleEcho));
    }

    #[test]
    fn test_backend_fallback_is_skipped() {
        let mut p = prior(Some("Кот готовит борщ"), &[]);
        let mut versions = ModelVersions::pipeline(PIPELINE_VERSION_HEURISTIC);
        versions.fallback_reason = Some(FallbackReason::Quota);
        p.model_versions = Some(versions.to_json());
        assert_eq!(policy().check(&p, "x"), Err(SkipReason::BackendFallback));
    }

    #[test]
    fn test_no_audio_heuristic_is_reusable() {
        let mut p = prior(Some("Кот готовит борщ"), &[]);
        let mut versions = ModelVersions::pipeline(PIPELINE_VERSION_HEURISTIC);
        versions.fallback_reason = Some(FallbackReason::NoAudio);
        p.model_versions = Some(versions.to_json());
        assert_eq!(policy().check(&p, "x"), Ok(()));
    }

    #[test]
    fn test_select_takes_first_reusable() {
        let priors = vec![
            prior(Some("мем"), &[]),
            prior(Some("Енот ворует еду"), &[]),
            prior(Some("Кот"), &[]),
        ];
        let chosen = policy().select(&priors, "x").unwrap();
        assert_eq!(chosen.auto_description.as_deref(), Some("Енот ворует еду"));
    }

    #[test]
    fn test_reuse_outcome_marks_pipeline() {
        let p = prior(Some("Енот ворует еду"), &["енот"]);
        let outcome = reuse_outcome(&p).unwrap();
        assert_eq!(outcome.model_versions.pipeline_version, PIPELINE_VERSION_REUSE);
        assert_eq!(outcome.decision, AiDecision::Low);
        assert_eq!(outcome.auto_tags, vec!["енот".to_string()]);
    }
}
