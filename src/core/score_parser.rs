//! Score parser: turns the judge's free-text feedback into round scores
//!
//! Reads `<number>/10` tokens in rubric order (Effectiveness, Creativity,
//! Coherence, Engagement) and combines them with fixed weights (0.4/0.3/0.2/0.1).
//!
//! Judge output is free text, so this is approximate. Sections are anchored on
//! `<Name>'s` / `<Name>:` markers; with no markers at all, tokens are grouped
//! in blocks of 4 in participant order. Anything unreadable falls back to the
//! neutral 5.0 and marks the report degraded. Parsing never fails a round.

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::Persona;
use crate::{MAX_SCORE, NEUTRAL_SCORE, RUBRIC_WEIGHTS};

/// Tokens needed to score a participant (one per rubric category)
pub const TOKENS_PER_PARTICIPANT: usize = RUBRIC_WEIGHTS.len();

lazy_static! {
    // "8/10", "7.5 / 10" - but not "8/100"
    static ref RE_SCORE: Regex = Regex::new(r"(\d+(?:\.\d+)?)\s*/\s*10\b").unwrap();
}

/// How the scores were located
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreMethod {
    /// Per-participant sections anchored on name markers
    Sectioned,
    /// Consecutive blocks of 4 tokens in participant order
    Positional,
    /// Parser error, every participant neutral
    Fallback,
}

/// Score of one participant for one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantScore {
    /// Category scores in rubric order, when found
    pub categories: Option<[f64; TOKENS_PER_PARTICIPANT]>,
    /// Weighted round score in [0, 10]
    pub total: f64,
    /// Neutral default was used
    pub defaulted: bool,
}

impl ParticipantScore {
    fn from_categories(categories: [f64; TOKENS_PER_PARTICIPANT]) -> Self {
        Self { categories: Some(categories), total: weighted(&categories), defaulted: false }
    }

    fn neutral() -> Self {
        Self { categories: None, total: NEUTRAL_SCORE, defaulted: true }
    }
}

/// Parser output for one feedback text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub method: ScoreMethod,
    pub scores: BTreeMap<String, ParticipantScore>,
}

impl ScoreReport {
    /// Everyone at the neutral default
    pub fn neutral(participants: &[&Persona]) -> Self {
        Self {
            method: ScoreMethod::Fallback,
            scores: participants
                .iter()
                .map(|p| (p.id.clone(), ParticipantScore::neutral()))
                .collect(),
        }
    }

    /// Round score per participant
    pub fn totals(&self) -> BTreeMap<String, f64> {
        self.scores.iter().map(|(id, s)| (id.clone(), s.total)).collect()
    }

    /// Participants that fell back to the default
    pub fn defaulted(&self) -> Vec<String> {
        self.scores
            .iter()
            .filter(|(_, s)| s.defaulted)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Any participant fell back to the default
    pub fn is_degraded(&self) -> bool {
        self.scores.values().any(|s| s.defaulted)
    }

    /// Replace a participant's score with the neutral default
    pub fn force_neutral(&mut self, id: &str) {
        if let Some(score) = self.scores.get_mut(id) {
            *score = ParticipantScore::neutral();
        }
    }
}

/// Judge feedback parser
#[derive(Debug, Default)]
pub struct ScoreParser;

impl ScoreParser {
    /// Create new parser
    pub fn new() -> Self {
        Self
    }

    /// Score every participant. Never fails: errors become the all-neutral report.
    pub fn parse(&self, feedback: &str, participants: &[&Persona]) -> ScoreReport {
        match self.try_parse(feedback, participants) {
            Ok(report) => {
                if report.is_degraded() {
                    tracing::warn!(
                        defaulted = ?report.defaulted(),
                        method = ?report.method,
                        "judge feedback only partially readable, using neutral scores"
                    );
                }
                report
            }
            Err(e) => {
                tracing::warn!(error = %e, "score parser failed, using neutral scores");
                ScoreReport::neutral(participants)
            }
        }
    }

    fn try_parse(&self, feedback: &str, participants: &[&Persona]) -> Result<ScoreReport, regex::Error> {
        let anchors = find_anchors(feedback, participants)?;

        if anchors.is_empty() {
            return Ok(positional(feedback, participants));
        }

        // Each anchor owns the text up to the next anchor. A participant takes
        // the first of its sections holding a full set of tokens.
        let mut found: Vec<Option<[f64; TOKENS_PER_PARTICIPANT]>> = vec![None; participants.len()];
        for (k, anchor) in anchors.iter().enumerate() {
            if found[anchor.participant].is_some() {
                continue;
            }
            let end = anchors
                .get(k + 1)
                .map(|a| a.start)
                .unwrap_or(feedback.len())
                .max(anchor.end);
            let tokens = score_tokens(&feedback[anchor.end..end]);
            found[anchor.participant] = first_block(&tokens);
        }

        let scores = participants
            .iter()
            .zip(found)
            .map(|(p, cats)| {
                let score = cats.map(ParticipantScore::from_categories).unwrap_or_else(ParticipantScore::neutral);
                (p.id.clone(), score)
            })
            .collect();

        Ok(ScoreReport { method: ScoreMethod::Sectioned, scores })
    }
}

/// A participant marker found in the feedback
#[derive(Debug)]
struct Anchor {
    start: usize,
    end: usize,
    participant: usize,
}

/// Participant markers, sorted by position and never overlapping
///
/// A name nested in another ("Egg" in "Golden Egg") matches inside the longer
/// marker; the earliest, then longest, marker wins.
fn find_anchors(feedback: &str, participants: &[&Persona]) -> Result<Vec<Anchor>, regex::Error> {
    let mut anchors = Vec::new();

    for (idx, persona) in participants.iter().enumerate() {
        let marker = Regex::new(&format!(
            r"(?i)\b(?:{}|{})(?:'s|’s|\s*:)",
            regex::escape(&persona.name),
            regex::escape(&persona.id)
        ))?;
        anchors.extend(marker.find_iter(feedback).map(|m| Anchor {
            start: m.start(),
            end: m.end(),
            participant: idx,
        }));
    }

    anchors.sort_by_key(|a| (a.start, std::cmp::Reverse(a.end)));

    let mut kept: Vec<Anchor> = Vec::with_capacity(anchors.len());
    for anchor in anchors {
        if kept.last().map_or(true, |last| anchor.start >= last.end) {
            kept.push(anchor);
        }
    }
    Ok(kept)
}

/// Consecutive blocks of 4 tokens in participant order
fn positional(feedback: &str, participants: &[&Persona]) -> ScoreReport {
    let tokens = score_tokens(feedback);

    let scores = participants
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let start = (i * TOKENS_PER_PARTICIPANT).min(tokens.len());
            let score = first_block(&tokens[start..])
                .map(ParticipantScore::from_categories)
                .unwrap_or_else(ParticipantScore::neutral);
            (p.id.clone(), score)
        })
        .collect();

    ScoreReport { method: ScoreMethod::Positional, scores }
}

/// All `<number>/10` values, clamped to [0, 10]
fn score_tokens(text: &str) -> Vec<f64> {
    RE_SCORE
        .captures_iter(text)
        .filter_map(|c| c[1].parse::<f64>().ok())
        .map(|v| v.clamp(0.0, MAX_SCORE))
        .collect()
}

/// First full rubric block, if there are enough tokens
fn first_block(tokens: &[f64]) -> Option<[f64; TOKENS_PER_PARTICIPANT]> {
    if tokens.len() < TOKENS_PER_PARTICIPANT {
        return None;
    }
    let mut block = [0.0; TOKENS_PER_PARTICIPANT];
    block.copy_from_slice(&tokens[..TOKENS_PER_PARTICIPANT]);
    Some(block)
}

/// Weighted sum, clamped to [0, 10] and rounded to 1e-6
fn weighted(categories: &[f64; TOKENS_PER_PARTICIPANT]) -> f64 {
    let raw: f64 = categories.iter().zip(RUBRIC_WEIGHTS.iter()).map(|(c, w)| c * w).sum();
    ((raw * 1e6).round() / 1e6).clamp(0.0, MAX_SCORE)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn persona(id: &str, name: &str) -> Persona {
        Persona::contestant(id, name, "prompt")
    }

    #[test]
    fn test_weighted_example() {
        let alice = persona("alice", "Alice");
        let report = ScoreParser::new().parse(
            "Alice's Effectiveness: 8/10, Creativity: 6/10, Coherence: 7/10, Engagement: 5/10",
            &[&alice],
        );
        let score = &report.scores["alice"];
        assert!((score.total - 6.9).abs() < 1e-9, "got {}", score.total);
        assert_eq!(score.categories, Some([8.0, 6.0, 7.0, 5.0]));
        assert_eq!(report.method, ScoreMethod::Sectioned);
        assert!(!report.is_degraded());
    }

    #[test]
    fn test_no_tokens_all_neutral() {
        let (a, b) = (persona("santa", "Santa"), persona("egg", "Egg"));
        let report = ScoreParser::new().parse("Both did great, no notes.", &[&a, &b]);
        assert_eq!(report.totals()["santa"], NEUTRAL_SCORE);
        assert_eq!(report.totals()["egg"], NEUTRAL_SCORE);
        assert!(report.is_degraded());
    }

    #[test]
    fn test_positional_blocks() {
        let (a, b) = (persona("santa", "Santa"), persona("egg", "Egg"));
        let feedback = "A: Effectiveness:10/10 Creativity:10/10 Coherence:10/10 Engagement:10/10 \
                        B: Effectiveness:0/10 Creativity:0/10 Coherence:0/10 Engagement:0/10";
        let report = ScoreParser::new().parse(feedback, &[&a, &b]);
        assert_eq!(report.method, ScoreMethod::Positional);
        assert_eq!(report.totals()["santa"], 10.0);
        assert_eq!(report.totals()["egg"], 0.0);
    }

    #[test]
    fn test_positional_short_second_block() {
        let (a, b) = (persona("santa", "Santa"), persona("egg", "Egg"));
        let report = ScoreParser::new().parse("1/10 2/10 3/10 4/10 5/10 6/10", &[&a, &b]);
        assert!((report.totals()["santa"] - 2.0).abs() < 1e-9);
        assert_eq!(report.totals()["egg"], NEUTRAL_SCORE);
        assert_eq!(report.defaulted(), vec!["egg".to_string()]);
    }

    #[test]
    fn test_sections_in_any_order() {
        let (a, b) = (persona("santa", "Santa"), persona("egg", "Egg"));
        let feedback = "Egg's Effectiveness: 2/10, Creativity: 2/10, Coherence: 2/10, Engagement: 2/10\n\
                        Santa's Effectiveness: 9/10, Creativity: 9/10, Coherence: 9/10, Engagement: 9/10";
        let report = ScoreParser::new().parse(feedback, &[&a, &b]);
        assert!((report.totals()["santa"] - 9.0).abs() < 1e-9);
        assert!((report.totals()["egg"] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_section_defaults() {
        let (a, b) = (persona("santa", "Santa"), persona("egg", "Egg"));
        let feedback = "Santa: 9/10, 9/10, 9/10, 9/10. The other one mumbled.";
        let report = ScoreParser::new().parse(feedback, &[&a, &b]);
        assert!((report.totals()["santa"] - 9.0).abs() < 1e-9);
        assert_eq!(report.totals()["egg"], NEUTRAL_SCORE);
        assert!(report.is_degraded());
    }

    #[test]
    fn test_commentary_mention_before_scores() {
        let (a, b) = (persona("santa", "Santa"), persona("egg", "Egg"));
        let feedback = "Santa's opener was bold.\n\
                        Santa's Effectiveness: 6/10, Creativity: 6/10, Coherence: 6/10, Engagement: 6/10\n\
                        Egg's Effectiveness: 4/10, Creativity: 4/10, Coherence: 4/10, Engagement: 4/10";
        let report = ScoreParser::new().parse(feedback, &[&a, &b]);
        assert!((report.totals()["santa"] - 6.0).abs() < 1e-9);
        assert!((report.totals()["egg"] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_out_of_range_clamped() {
        let a = persona("santa", "Santa");
        let report = ScoreParser::new().parse("Santa: 15/10 12/10 10/10 11/10", &[&a]);
        assert_eq!(report.totals()["santa"], MAX_SCORE);
    }

    #[test]
    fn test_ignores_percent_like_tokens() {
        assert!(score_tokens("8/100 and 7 / 10").len() == 1);
        assert_eq!(score_tokens("7.5/10"), vec![7.5]);
    }

    #[test]
    fn test_scores_bounded() {
        let a = persona("santa", "Santa");
        for feedback in ["0/10 0/10 0/10 0/10", "10/10 10/10 10/10 10/10", "3/10 9/10 1/10 7/10"] {
            let total = ScoreParser::new().parse(feedback, &[&a]).totals()["santa"];
            assert!((0.0..=MAX_SCORE).contains(&total), "{} out of range", total);
        }
    }

    #[test]
    fn test_nested_names() {
        let (golden, egg) = (persona("golden", "Golden Egg"), persona("egg", "Egg"));
        let feedback = "Golden Egg's Effectiveness: 9/10, Creativity: 9/10, Coherence: 9/10, Engagement: 9/10\n\
                        Egg's Effectiveness: 1/10, Creativity: 1/10, Coherence: 1/10, Engagement: 1/10";
        let report = ScoreParser::new().parse(feedback, &[&golden, &egg]);
        assert!((report.totals()["golden"] - 9.0).abs() < 1e-9);
        assert!((report.totals()["egg"] - 1.0).abs() < 1e-9);
        assert!(!report.is_degraded());

        // Nested name listed first
        let report = ScoreParser::new().parse(feedback, &[&egg, &golden]);
        assert!((report.totals()["golden"] - 9.0).abs() < 1e-9);
        assert!((report.totals()["egg"] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_shared_name_does_not_panic() {
        let (a, b) = (persona("egg1", "Egg"), persona("egg2", "Egg"));
        let report = ScoreParser::new().parse("Egg's 5/10 5/10 5/10 5/10", &[&a, &b]);
        assert_eq!(report.totals()["egg1"], 5.0);
        assert_eq!(report.totals()["egg2"], NEUTRAL_SCORE);
        assert_eq!(report.defaulted(), vec!["egg2".to_string()]);
    }

    #[test]
    fn test_force_neutral() {
        let a = persona("santa", "Santa");
        let mut report = ScoreParser::new().parse("Santa: 9/10 9/10 9/10 9/10", &[&a]);
        report.force_neutral("santa");
        assert_eq!(report.totals()["santa"], NEUTRAL_SCORE);
        assert!(report.is_degraded());
    }
}
