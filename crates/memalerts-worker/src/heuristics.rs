//! Deterministic keyword heuristic.
//!
//! Used when there is no transcript to score or the analysis backend is
//! unavailable. Keywords match at the start of a word, so a stem such as
//! `наркот` covers its inflections. Keywords of up to
//! [`WHOLE_WORD_MAX_CHARS`] characters must match a whole word instead, so
//! `шок` does not fire on `шоколад`.

use std::collections::{BTreeSet, HashMap};

use regex::Regex;

use memalerts_models::text::{normalize_tags, normalize_text, tokenize};

use crate::error::{WorkerError, WorkerResult};

/// Risk assigned when a high-risk keyword is present.
pub const HIGH_KEYWORD_RISK: f64 = 0.85;
/// Risk assigned when only medium-risk keywords are present.
pub const MEDIUM_KEYWORD_RISK: f64 = 0.5;
/// Risk assigned when nothing matched.
pub const BASELINE_RISK: f64 = 0.05;
/// Keywords this short are too ambiguous to use as stems.
pub const WHOLE_WORD_MAX_CHARS: usize = 3;

const HEURISTIC_LABEL: &str = "heuristic";

/// Function words never used as fallback tags.
const STOPWORDS: &[&str] = &[
    "и", "в", "во", "на", "не", "что", "это", "как", "по", "но", "из", "за", "от", "до", "для",
    "про", "он", "она", "они", "мы", "вы", "ты", "я", "так", "же", "ну", "вот", "да", "нет", "бы",
    "the", "and", "or", "of", "to", "in", "on", "at", "is", "it", "this", "that", "with", "for",
    "a", "an", "be", "are", "was", "my", "your", "you", "me",
];

/// Keyword-based risk estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicScore {
    pub risk_score: f64,
    pub labels: Vec<String>,
}

/// Keyword matcher plus fallback tag extraction.
#[derive(Debug, Clone)]
pub struct KeywordHeuristics {
    high: Option<KeywordSet>,
    medium: Option<KeywordSet>,
    ignored_words: BTreeSet<String>,
}

#[derive(Debug, Clone)]
struct KeywordSet {
    regex: Regex,
    whole_words: BTreeSet<String>,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric()
}

fn keyword_set(keywords: &[String]) -> WorkerResult<Option<KeywordSet>> {
    let mut normalized: Vec<String> = keywords
        .iter()
        .map(|k| normalize_text(k))
        .filter(|k| !k.is_empty())
        .collect();

    if normalized.is_empty() {
        return Ok(None);
    }

    // Longest first so a stem never shadows a longer keyword at the same spot.
    normalized.sort_by(|a, b| {
        b.chars()
            .count()
            .cmp(&a.chars().count())
            .then_with(|| a.cmp(b))
    });
    normalized.dedup();

    let whole_words = normalized
        .iter()
        .filter(|k| k.chars().count() <= WHOLE_WORD_MAX_CHARS)
        .cloned()
        .collect();
    let alternatives: Vec<String> = normalized.iter().map(|k| regex::escape(k)).collect();

    let pattern = format!(
        r"(?i)(?:^|[^\p{{L}}\p{{N}}])({})",
        alternatives.join("|")
    );
    let regex = Regex::new(&pattern)
        .map_err(|e| WorkerError::config_error(format!("invalid keyword list: {e}")))?;
    Ok(Some(KeywordSet { regex, whole_words }))
}

fn matches(set: &Option<KeywordSet>, text: &str) -> BTreeSet<String> {
    let Some(set) = set else {
        return BTreeSet::new();
    };
    set.regex
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|m| {
            let keyword = m.as_str().to_lowercase();
            let continues_word = text[m.end()..].chars().next().is_some_and(is_word_char);
            if continues_word && set.whole_words.contains(&keyword) {
                None
            } else {
                Some(keyword)
            }
        })
        .collect()
}

impl KeywordHeuristics {
    /// Build from keyword lists; `ignored_words` are never emitted as tags.
    pub fn new(
        high_keywords: &[String],
        medium_keywords: &[String],
        ignored_words: &[String],
    ) -> WorkerResult<Self> {
        let mut ignored: BTreeSet<String> = STOPWORDS.iter().map(|w| w.to_string()).collect();
        ignored.extend(ignored_words.iter().map(|w| normalize_text(w)));

        Ok(Self {
            high: keyword_set(high_keywords)?,
            medium: keyword_set(medium_keywords)?,
            ignored_words: ignored,
        })
    }

    /// Score the given texts (title, notes, transcript...).
    pub fn assess(&self, texts: &[&str]) -> HeuristicScore {
        let text = normalize_text(&texts.join("\n"));
        let high = matches(&self.high, &text);
        let medium = matches(&self.medium, &text);

        let risk_score = if !high.is_empty() {
            HIGH_KEYWORD_RISK
        } else if !medium.is_empty() {
            MEDIUM_KEYWORD_RISK
        } else {
            BASELINE_RISK
        };

        let mut labels = vec![HEURISTIC_LABEL.to_string()];
        labels.extend(high.iter().map(|k| format!("keyword:high:{k}")));
        labels.extend(medium.iter().map(|k| format!("keyword:medium:{k}")));

        HeuristicScore { risk_score, labels }
    }

    /// Derive tags when the backend produced none.
    ///
    /// Words are ranked by frequency, title words counting triple; ties keep
    /// first-seen order. Keyword labels contribute their keyword.
    pub fn fallback_tags(
        &self,
        title: &str,
        notes: Option<&str>,
        transcript: Option<&str>,
        labels: &[String],
        limit: usize,
    ) -> Vec<String> {
        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
        let mut order = 0usize;
        let mut add = |text: &str, weight: usize| {
            for token in tokenize(text) {
                if self.ignored_words.contains(&token) || token.chars().all(|c| c.is_numeric()) {
                    continue;
                }
                let entry = counts.entry(token).or_insert_with(|| {
                    order += 1;
                    (0, order)
                });
                entry.0 += weight;
            }
        };

        add(title, 3);
        if let Some(notes) = notes {
            add(notes, 1);
        }
        if let Some(transcript) = transcript {
            add(transcript, 1);
        }

        let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));

        let keyword_tags = labels
            .iter()
            .filter_map(|l| l.rsplit_once(':').filter(|_| l.starts_with("keyword:")))
            .map(|(_, k)| k.to_string());

        normalize_tags(
            ranked.into_iter().map(|(word, _)| word).chain(keyword_tags),
            limit,
        )
    }
}
