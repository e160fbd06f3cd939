//! Lexical quality metrics for generated example sets.
//!
//! Pure and deterministic: no I/O, no randomness. Scores are shallow
//! lexical signals (counts, lengths, n-gram overlap), not judgments of
//! semantic correctness.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w+\b").expect("word regex"));

// ---------------------------------------------------------------------------
// Default word lists
// ---------------------------------------------------------------------------

/// Verbs that signal concrete, observable behavior.
pub const ACTION_VERBS: &[&str] = &[
    "build",
    "create",
    "design",
    "implement",
    "lead",
    "review",
    "mentor",
    "write",
    "present",
    "analyze",
    "improve",
    "optimize",
    "deliver",
    "launch",
    "own",
    "coordinate",
    "document",
    "automate",
    "debug",
    "refactor",
    "test",
];

/// Work artifacts a concrete example tends to name.
pub const ARTIFACT_TERMS: &[&str] = &[
    "pr",
    "pull request",
    "design doc",
    "doc",
    "documentation",
    "dashboard",
    "postmortem",
    "incident review",
    "runbook",
    "spec",
    "proposal",
    "report",
    "roadmap",
    "meeting",
    "presentation",
    "analysis",
];

/// Vague phrases that signal low-information filler.
pub const GENERIC_PHRASES: &[&str] = &[
    "shows leadership",
    "drives impact",
    "demonstrates ownership",
    "takes initiative",
    "collaborates effectively",
    "communicates clearly",
];

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Quality snapshot for one cell's example set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub examples_count: u32,
    /// Mean example length in characters, rounded to the nearest integer.
    pub avg_length_chars: u32,
    /// Mean example length in word tokens, rounded to the nearest integer.
    pub avg_length_words: u32,
    pub action_verb_count: u32,
    pub artifact_term_count: u32,
    pub generic_phrase_count: u32,
    /// 1 minus the mean pairwise trigram-Jaccard similarity, in [0, 1].
    /// 1.0 for a single example, 0.0 for empty input.
    pub uniqueness_score: f64,
    /// Action verbs per 100 words, rounded to 2 decimal places.
    pub action_verb_density: f64,
    /// Artifact terms per example, rounded to 2 decimal places.
    pub artifact_density: f64,
    /// Generic phrases per example, rounded to 2 decimal places.
    pub generic_density: f64,
}

/// Computes [`QualityMetrics`] against closed word lists.
///
/// The lists are injectable for tests and future tuning; [`Default`] wires
/// in [`ACTION_VERBS`], [`ARTIFACT_TERMS`], and [`GENERIC_PHRASES`].
#[derive(Debug, Clone)]
pub struct QualityMetricsCalculator {
    action_verbs: HashSet<String>,
    artifact_terms: Vec<String>,
    generic_phrases: Vec<String>,
}

impl Default for QualityMetricsCalculator {
    fn default() -> Self {
        Self::new(ACTION_VERBS, ARTIFACT_TERMS, GENERIC_PHRASES)
    }
}

impl QualityMetricsCalculator {
    /// Create a calculator with custom word lists. Lists are matched against
    /// lowercased text, so entries should be lowercase.
    pub fn new(action_verbs: &[&str], artifact_terms: &[&str], generic_phrases: &[&str]) -> Self {
        Self {
            action_verbs: action_verbs.iter().map(|s| s.to_string()).collect(),
            artifact_terms: artifact_terms.iter().map(|s| s.to_string()).collect(),
            generic_phrases: generic_phrases.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Compute metrics over a cell's examples.
    pub fn compute(&self, examples: &[String]) -> QualityMetrics {
        if examples.is_empty() {
            // "No content" scores worse than "one unique item": uniqueness
            // stays 0.0 here but is 1.0 for a single example.
            return QualityMetrics::default();
        }

        let mut total_chars = 0usize;
        let mut total_words = 0usize;
        let mut action_verb_count = 0u32;
        let mut artifact_term_count = 0u32;
        let mut generic_phrase_count = 0u32;

        for example in examples {
            let lowered = example.to_lowercase();
            let tokens = tokenize(&lowered);

            total_chars += example.chars().count();
            total_words += tokens.len();
            action_verb_count += tokens
                .iter()
                .filter(|t| self.action_verbs.contains(t.as_str()))
                .count() as u32;
            artifact_term_count += count_phrases(&lowered, &tokens, &self.artifact_terms);
            generic_phrase_count += count_phrases(&lowered, &tokens, &self.generic_phrases);
        }

        let count = examples.len();

        QualityMetrics {
            examples_count: count as u32,
            avg_length_chars: (total_chars as f64 / count as f64).round() as u32,
            avg_length_words: (total_words as f64 / count as f64).round() as u32,
            action_verb_count,
            artifact_term_count,
            generic_phrase_count,
            uniqueness_score: uniqueness_score(examples),
            action_verb_density: if total_words > 0 {
                round2(action_verb_count as f64 / total_words as f64 * 100.0)
            } else {
                0.0
            },
            artifact_density: round2(artifact_term_count as f64 / count as f64),
            generic_density: round2(generic_phrase_count as f64 / count as f64),
        }
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

/// Word tokens of already-lowercased text.
fn tokenize(lowered: &str) -> Vec<String> {
    WORD_RE
        .find_iter(lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Count phrase occurrences: token equality for single-word phrases (word
/// boundaries), non-overlapping substring matches for multi-word phrases.
fn count_phrases(lowered: &str, tokens: &[String], phrases: &[String]) -> u32 {
    let mut count = 0u32;
    for phrase in phrases {
        if phrase.contains(' ') {
            count += lowered.matches(phrase.as_str()).count() as u32;
        } else {
            count += tokens.iter().filter(|t| *t == phrase).count() as u32;
        }
    }
    count
}

/// 1 minus the mean pairwise Jaccard similarity of word-trigram sets.
///
/// Examples with fewer than 3 tokens fall back to their word set. Two empty
/// gram sets count as similarity 1.0 (identically empty). Clamped to [0, 1].
fn uniqueness_score(examples: &[String]) -> f64 {
    if examples.len() <= 1 {
        return 1.0;
    }

    let gram_sets: Vec<HashSet<String>> = examples
        .iter()
        .map(|example| {
            let words = tokenize(&example.to_lowercase());
            if words.len() >= 3 {
                words.windows(3).map(|w| w.join(" ")).collect()
            } else {
                words.into_iter().collect()
            }
        })
        .collect();

    let mut similarities = Vec::new();
    for i in 0..gram_sets.len() {
        for j in (i + 1)..gram_sets.len() {
            let a = &gram_sets[i];
            let b = &gram_sets[j];
            if a.is_empty() && b.is_empty() {
                similarities.push(1.0);
                continue;
            }
            let union = a.union(b).count();
            let similarity = if union == 0 {
                0.0
            } else {
                a.intersection(b).count() as f64 / union as f64
            };
            similarities.push(similarity);
        }
    }

    let avg = similarities.iter().sum::<f64>() / similarities.len() as f64;
    (1.0 - avg).clamp(0.0, 1.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
