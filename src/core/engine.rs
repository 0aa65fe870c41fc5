//! Round engine: drives one round through its phases
//!
//! Phases, strictly ordered:
//! 1. Response - duel: B answers A's last statement, then A answers B's new one.
//!    Free-for-all: everyone answers the previous round's statements, concurrently.
//! 2. Whisper  - free-for-all only: one private message per contestant
//! 3. Judge    - one evaluation request with everything said this round
//! 4. Scoring  - judge feedback → round scores → cumulative totals
//! 5. End      - threshold / round cap check, winner or draw
//!
//! A failed generation never aborts a round: the contestant's contribution is
//! replaced by an in-band notice and its score falls back to neutral.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use lazy_static::lazy_static;
use regex::Regex;

use crate::core::generation::{Generator, ProviderError};
use crate::core::prompts::{self, JudgeEntry};
use crate::core::score_parser::{ScoreParser, ScoreReport};
use crate::types::{
    ChatMessage, ConversationContext, EndReason, MatchMode, MatchOutcome, MatchRules, Persona,
    RoundKind, RoundResult, Whisper,
};
use crate::GENERATION_TIMEOUT_SECS;

lazy_static! {
    // "To Santa: ..." / "to egg, dracula: ..."
    static ref RE_WHISPER_TAG: Regex = Regex::new(r"(?im)^\s*to\s+([^:\n]+):").unwrap();
}

/// Tie tolerance for score comparisons
const SCORE_EPSILON: f64 = 1e-9;

/// Resolved participants and rules of a started match
#[derive(Debug, Clone)]
pub struct MatchPlan {
    pub mode: MatchMode,
    pub rules: MatchRules,
    /// Contestants in match order (duel: A then B)
    pub contestants: Vec<Persona>,
    pub judge: Persona,
}

impl MatchPlan {
    pub fn contestant_ids(&self) -> Vec<String> {
        self.contestants.iter().map(|p| p.id.clone()).collect()
    }

    fn contestant_refs(&self) -> Vec<&Persona> {
        self.contestants.iter().collect()
    }

    fn others(&self, id: &str) -> Vec<&Persona> {
        self.contestants.iter().filter(|p| p.id != id).collect()
    }
}

/// Conversation state of a match
///
/// The engine mutates a copy; the controller commits it once the round is done.
#[derive(Debug, Clone)]
pub struct Conversations {
    pub contexts: BTreeMap<String, ConversationContext>,
    pub judge: ConversationContext,
    /// Most recent public statement per contestant
    pub public: BTreeMap<String, String>,
}

impl Conversations {
    /// Fresh contexts for every contestant and the judge
    pub fn new(plan: &MatchPlan) -> Self {
        Self {
            contexts: plan
                .contestants
                .iter()
                .map(|p| (p.id.clone(), ConversationContext::new(p)))
                .collect(),
            judge: ConversationContext::new(&plan.judge),
            public: BTreeMap::new(),
        }
    }

    fn context_mut(&mut self, persona: &Persona) -> &mut ConversationContext {
        self.contexts
            .entry(persona.id.clone())
            .or_insert_with(|| ConversationContext::new(persona))
    }

    fn context(&self, persona: &Persona) -> ConversationContext {
        self.contexts
            .get(&persona.id)
            .cloned()
            .unwrap_or_else(|| ConversationContext::new(persona))
    }

    fn last_public(&self, persona: &Persona) -> &str {
        self.public.get(&persona.id).map(String::as_str).unwrap_or("")
    }
}

/// Text produced by one generation step
#[derive(Debug, Clone)]
struct Spoken {
    text: String,
    failed: bool,
}

/// What the duel opening produced
#[derive(Debug, Clone, Default)]
pub struct Openings {
    /// Reply per contestant (A's opening move, B's preparation)
    pub messages: BTreeMap<String, String>,
    pub failed: Vec<String>,
}

/// Runs rounds against the generation capability
#[derive(Debug)]
pub struct RoundEngine {
    generator: Arc<dyn Generator>,
    parser: ScoreParser,
    timeout: Duration,
}

impl RoundEngine {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            parser: ScoreParser::new(),
            timeout: Duration::from_secs(GENERATION_TIMEOUT_SECS),
        }
    }

    /// Per-call generation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    // =========================================================================
    // MATCH START
    // =========================================================================

    /// Duel opening: A makes the first move, B prepares
    pub async fn open_duel(&self, plan: &MatchPlan, conv: &mut Conversations) -> Openings {
        let (a, b) = (&plan.contestants[0], &plan.contestants[1]);
        let mut openings = Openings::default();

        let opening = self.speak(conv.context_mut(a), a, prompts::opening(a, b)).await;
        let prep = self.speak(conv.context_mut(b), b, prompts::preparation(a)).await;

        conv.public.insert(a.id.clone(), opening.text.clone());
        for (persona, spoken) in [(a, opening), (b, prep)] {
            if spoken.failed {
                openings.failed.push(persona.id.clone());
            }
            openings.messages.insert(persona.id.clone(), spoken.text);
        }
        openings
    }

    /// Free-for-all round 0: self-presentation, judged but not scored
    pub async fn introduce(&self, plan: &MatchPlan, conv: &mut Conversations) -> RoundResult {
        tracing::info!(contestants = plan.contestants.len(), "introduction round");

        let instructions = plan
            .contestants
            .iter()
            .map(|p| prompts::introduction(p, &plan.others(&p.id)))
            .collect();
        let spoken = self.speak_all(&plan.contestant_refs(), instructions, conv).await;

        let mut failed = Vec::new();
        let mut statements = BTreeMap::new();
        for (persona, s) in plan.contestants.iter().zip(spoken) {
            if s.failed {
                failed.push(persona.id.clone());
            }
            conv.public.insert(persona.id.clone(), s.text.clone());
            statements.insert(persona.id.clone(), s.text);
        }

        let no_whispers = BTreeMap::new();
        let entries = judge_entries(plan, &statements, &no_whispers);
        let judged = self
            .speak(&mut conv.judge, &plan.judge, prompts::judge_introduction(&entries))
            .await;
        if judged.failed {
            failed.push(plan.judge.id.clone());
        }

        let zeros = plan.contestants.iter().map(|p| (p.id.clone(), 0.0)).collect();

        RoundResult {
            round: 0,
            kind: RoundKind::Introduction,
            participants: plan.contestant_ids(),
            statements,
            whispers: BTreeMap::new(),
            judge_feedback: judged.text,
            round_scores: BTreeMap::new(),
            cumulative_scores: zeros,
            scoring_degraded: false,
            degraded_participants: vec![],
            failed_participants: failed,
            outcome: None,
            timestamp: Utc::now(),
        }
    }

    // =========================================================================
    // ROUND
    // =========================================================================

    /// Play one scored round
    pub async fn play(
        &self,
        plan: &MatchPlan,
        round: u32,
        conv: &mut Conversations,
        cumulative: &BTreeMap<String, f64>,
    ) -> RoundResult {
        tracing::info!(round, mode = %plan.mode, "round started");

        // 1. Response phase
        let spoken = match plan.mode {
            MatchMode::Duel => self.respond_duel(plan, conv).await,
            MatchMode::FreeForAll => self.respond_all(plan, conv).await,
        };

        let mut failed = Vec::new();
        let mut statements = BTreeMap::new();
        for (persona, s) in plan.contestants.iter().zip(spoken) {
            if s.failed {
                failed.push(persona.id.clone());
            }
            statements.insert(persona.id.clone(), s.text);
        }
        for (id, text) in &statements {
            conv.public.insert(id.clone(), text.clone());
        }

        // 2. Whisper phase
        let whispers = if plan.mode.has_whispers() {
            self.whisper_phase(plan, conv).await
        } else {
            BTreeMap::new()
        };

        // 3. Judge phase
        let whisper_text: BTreeMap<String, String> =
            whispers.iter().map(|(id, w)| (id.clone(), w.text.clone())).collect();
        let entries = judge_entries(plan, &statements, &whisper_text);
        let judged = self
            .speak(&mut conv.judge, &plan.judge, prompts::judge_round(round, &entries))
            .await;

        // 4. Scoring
        let contestants = plan.contestant_refs();
        let mut report = if judged.failed {
            failed.push(plan.judge.id.clone());
            ScoreReport::neutral(&contestants)
        } else {
            self.parser.parse(&judged.text, &contestants)
        };
        for id in &failed {
            report.force_neutral(id);
        }

        let round_scores = report.totals();
        let cumulative_scores: BTreeMap<String, f64> = plan
            .contestants
            .iter()
            .map(|p| {
                let total = cumulative.get(&p.id).copied().unwrap_or(0.0)
                    + round_scores.get(&p.id).copied().unwrap_or(0.0);
                (p.id.clone(), total)
            })
            .collect();

        // 5. End check
        let outcome = decide_outcome(round, &plan.rules, &plan.contestant_ids(), &cumulative_scores, &round_scores);

        let result = RoundResult {
            round,
            kind: RoundKind::Contest,
            participants: plan.contestant_ids(),
            statements,
            whispers,
            judge_feedback: judged.text,
            round_scores,
            cumulative_scores,
            scoring_degraded: report.is_degraded(),
            degraded_participants: report.defaulted(),
            failed_participants: failed,
            outcome,
            timestamp: Utc::now(),
        };

        tracing::info!(summary = %result.summary(), "round finished");
        result
    }

    /// B answers A's last statement, then A answers B's new one
    async fn respond_duel(&self, plan: &MatchPlan, conv: &mut Conversations) -> Vec<Spoken> {
        let (a, b) = (&plan.contestants[0], &plan.contestants[1]);

        let b_instruction = prompts::respond_to(a, conv.last_public(a));
        let b_spoken = self.speak(conv.context_mut(b), b, b_instruction).await;

        let a_instruction = prompts::respond_to(b, &b_spoken.text);
        let a_spoken = self.speak(conv.context_mut(a), a, a_instruction).await;

        vec![a_spoken, b_spoken]
    }

    /// Everyone answers the others' statements from before this phase
    async fn respond_all(&self, plan: &MatchPlan, conv: &mut Conversations) -> Vec<Spoken> {
        let instructions = plan
            .contestants
            .iter()
            .map(|me| {
                let heard: Vec<(&Persona, &str)> = plan
                    .others(&me.id)
                    .into_iter()
                    .map(|other| (other, conv.last_public(other)))
                    .collect();
                prompts::respond_to_all(&heard)
            })
            .collect();

        self.speak_all(&plan.contestant_refs(), instructions, conv).await
    }

    async fn whisper_phase(&self, plan: &MatchPlan, conv: &mut Conversations) -> BTreeMap<String, Whisper> {
        let instructions = plan
            .contestants
            .iter()
            .map(|p| prompts::whisper(&plan.others(&p.id)))
            .collect();
        let spoken = self.speak_all(&plan.contestant_refs(), instructions, conv).await;

        plan.contestants
            .iter()
            .zip(spoken)
            .map(|(p, s)| {
                let recipients = if s.failed {
                    vec![]
                } else {
                    whisper_recipients(&s.text, &plan.others(&p.id))
                };
                (p.id.clone(), Whisper { recipients, text: s.text })
            })
            .collect()
    }

    // =========================================================================
    // GENERATION
    // =========================================================================

    /// One generation for one persona; appends the exchange on success
    async fn speak(&self, ctx: &mut ConversationContext, persona: &Persona, instruction: String) -> Spoken {
        let messages = ctx.request(instruction.clone());
        let result = self.call(persona, &messages).await;
        settle(ctx, persona, instruction, result)
    }

    /// Concurrent generations. Every request is built before any is sent.
    async fn speak_all(
        &self,
        personas: &[&Persona],
        instructions: Vec<String>,
        conv: &mut Conversations,
    ) -> Vec<Spoken> {
        let requests: Vec<Vec<ChatMessage>> = personas
            .iter()
            .zip(&instructions)
            .map(|(p, instruction)| conv.context(p).request(instruction.clone()))
            .collect();

        let results = join_all(
            personas
                .iter()
                .zip(&requests)
                .map(|(p, messages)| self.call(p, messages)),
        )
        .await;

        personas
            .iter()
            .zip(instructions)
            .zip(results)
            .map(|((p, instruction), result)| settle(conv.context_mut(p), p, instruction, result))
            .collect()
    }

    async fn call(&self, persona: &Persona, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        match tokio::time::timeout(self.timeout, self.generator.generate(&persona.id, messages)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.timeout)),
        }
    }
}

/// Record a generation outcome in the persona's context
fn settle(
    ctx: &mut ConversationContext,
    persona: &Persona,
    instruction: String,
    result: Result<String, ProviderError>,
) -> Spoken {
    match result {
        Ok(text) => {
            ctx.append(ChatMessage::user(instruction));
            ctx.append(ChatMessage::assistant(text.clone()));
            Spoken { text, failed: false }
        }
        Err(e) => {
            tracing::warn!(persona = %persona.id, error = %e, "generation failed, substituting notice");
            Spoken { text: prompts::failure_text(persona, &e), failed: true }
        }
    }
}

fn judge_entries<'a>(
    plan: &'a MatchPlan,
    statements: &'a BTreeMap<String, String>,
    whispers: &'a BTreeMap<String, String>,
) -> Vec<JudgeEntry<'a>> {
    plan.contestants
        .iter()
        .map(|p| JudgeEntry {
            persona: p,
            statement: statements.get(&p.id).map(String::as_str).unwrap_or(""),
            whisper: whispers.get(&p.id).map(String::as_str),
        })
        .collect()
}

/// Persona ids named in `To <Name>:` tags, in order of first mention
pub fn whisper_recipients(text: &str, candidates: &[&Persona]) -> Vec<String> {
    let mut recipients: Vec<String> = Vec::new();
    for caps in RE_WHISPER_TAG.captures_iter(text) {
        for name in caps[1].split(|c| c == ',' || c == '&').flat_map(|s| s.split(" and ")) {
            let name = name.trim();
            let found = candidates
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(name) || p.id.eq_ignore_ascii_case(name));
            if let Some(p) = found {
                if !recipients.contains(&p.id) {
                    recipients.push(p.id.clone());
                }
            }
        }
    }
    recipients
}

/// Terminal check after a round
///
/// Ends when any total reaches the threshold, or at the round cap. The winner
/// has the strictly highest total; tied leaders are split by this round's
/// score; a remaining tie is a draw.
pub fn decide_outcome(
    round: u32,
    rules: &MatchRules,
    participants: &[String],
    cumulative: &BTreeMap<String, f64>,
    round_scores: &BTreeMap<String, f64>,
) -> Option<MatchOutcome> {
    let reached = cumulative.values().any(|s| *s >= rules.score_threshold);
    let capped = rules.round_cap.is_some_and(|cap| round >= cap);

    let reason = if reached {
        EndReason::ScoreThreshold
    } else if capped {
        EndReason::RoundCap
    } else {
        return None;
    };

    Some(MatchOutcome {
        winner: pick_winner(participants, cumulative, round_scores),
        reason,
        round,
        final_scores: cumulative.clone(),
    })
}

fn pick_winner(
    participants: &[String],
    cumulative: &BTreeMap<String, f64>,
    round_scores: &BTreeMap<String, f64>,
) -> Option<String> {
    let leaders = top_scorers(participants.iter().map(String::as_str).collect(), cumulative);
    if let [only] = leaders.as_slice() {
        return Some(only.to_string());
    }

    match top_scorers(leaders, round_scores).as_slice() {
        [only] => Some(only.to_string()),
        _ => None,
    }
}

/// Ids sharing the highest score in `scores`
fn top_scorers<'a>(ids: Vec<&'a str>, scores: &BTreeMap<String, f64>) -> Vec<&'a str> {
    let score = |id: &str| scores.get(id).copied().unwrap_or(0.0);
    let best = ids.iter().map(|id| score(*id)).fold(f64::MIN, f64::max);
    ids.into_iter()
        .filter(|id| (score(*id) - best).abs() < SCORE_EPSILON)
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::generation::ScriptedGenerator;
    use crate::NEUTRAL_SCORE;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn scores(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn plan(mode: MatchMode, names: &[(&str, &str)]) -> MatchPlan {
        MatchPlan {
            mode,
            rules: mode.rules(),
            contestants: names
                .iter()
                .map(|(id, name)| Persona::contestant(*id, *name, format!("You are {}.", name)))
                .collect(),
            judge: Persona::judge("judge", "Judge", "Be fair."),
        }
    }

    #[test]
    fn test_no_outcome_below_threshold() {
        let rules = MatchRules { score_threshold: 100.0, round_cap: Some(200) };
        let out = decide_outcome(3, &rules, &ids(&["a", "b"]), &scores(&[("a", 30.0), ("b", 0.0)]), &BTreeMap::new());
        assert!(out.is_none());
    }

    #[test]
    fn test_threshold_winner() {
        let rules = MatchRules { score_threshold: 100.0, round_cap: None };
        let out = decide_outcome(
            12,
            &rules,
            &ids(&["a", "b"]),
            &scores(&[("a", 100.0), ("b", 60.0)]),
            &scores(&[("a", 10.0), ("b", 5.0)]),
        )
        .unwrap();
        assert_eq!(out.winner.as_deref(), Some("a"));
        assert_eq!(out.reason, EndReason::ScoreThreshold);
        assert_eq!(out.round, 12);
    }

    #[test]
    fn test_tie_broken_by_round_score() {
        let rules = MatchRules { score_threshold: 100.0, round_cap: None };
        let out = decide_outcome(
            20,
            &rules,
            &ids(&["a", "b"]),
            &scores(&[("a", 101.0), ("b", 101.0)]),
            &scores(&[("a", 4.0), ("b", 6.0)]),
        )
        .unwrap();
        assert_eq!(out.winner.as_deref(), Some("b"));
    }

    #[test]
    fn test_full_tie_is_draw() {
        let rules = MatchRules { score_threshold: 10.0, round_cap: Some(2) };
        let out = decide_outcome(
            2,
            &rules,
            &ids(&["a", "b", "c"]),
            &scores(&[("a", 8.0), ("b", 8.0), ("c", 2.0)]),
            &scores(&[("a", 4.0), ("b", 4.0), ("c", 1.0)]),
        )
        .unwrap();
        assert!(out.is_draw());
        assert_eq!(out.reason, EndReason::RoundCap);
    }

    #[test]
    fn test_whisper_recipients() {
        let santa = Persona::contestant("santa", "Santa", "p");
        let egg = Persona::contestant("egg", "Egg", "p");
        let text = "To Egg: I know a secret.\nto santa and egg: meet me later\nTo Nobody: hi";
        assert_eq!(whisper_recipients(text, &[&santa, &egg]), ids(&["egg", "santa"]));
        assert!(whisper_recipients("no tags here", &[&santa]).is_empty());
    }

    #[tokio::test]
    async fn test_duel_round_is_causal() {
        let plan = plan(MatchMode::Duel, &[("a", "Alpha"), ("b", "Beta")]);
        let gen = Arc::new(ScriptedGenerator::new());
        let engine = RoundEngine::new(gen.clone());
        let mut conv = Conversations::new(&plan);

        engine.open_duel(&plan, &mut conv).await;
        let result = engine.play(&plan, 1, &mut conv, &BTreeMap::new()).await;

        // a#1 opening, b#1 preparation; round 1: b#2 answers a#1, a#2 answers b#2
        assert_eq!(result.statements["a"], "a#2");
        assert_eq!(result.statements["b"], "b#2");
        let b_call = &gen.calls_for("b")[1];
        assert!(b_call.messages.last().unwrap().content.contains("a#1"));
        let a_call = &gen.calls_for("a")[1];
        assert!(a_call.messages.last().unwrap().content.contains("b#2"));
    }

    #[tokio::test]
    async fn test_failed_contestant_scored_neutral() {
        let plan = plan(MatchMode::Duel, &[("a", "Alpha"), ("b", "Beta")]);
        let gen = ScriptedGenerator::new()
            .failing("b")
            .with_reply("judge", "Alpha's 10/10 10/10 10/10 10/10 Beta's 9/10 9/10 9/10 9/10");
        let engine = RoundEngine::new(Arc::new(gen));
        let mut conv = Conversations::new(&plan);

        let result = engine.play(&plan, 1, &mut conv, &BTreeMap::new()).await;
        assert_eq!(result.round_scores["a"], 10.0);
        assert_eq!(result.round_scores["b"], NEUTRAL_SCORE);
        assert_eq!(result.failed_participants, ids(&["b"]));
        assert!(result.scoring_degraded);
        assert!(result.statements["b"].contains("Beta is silent"));
        // Failed generations leave the context untouched
        assert_eq!(conv.contexts["b"].len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_a_failure() {
        let plan = plan(MatchMode::Duel, &[("a", "Alpha"), ("b", "Beta")]);
        let gen = ScriptedGenerator::new().with_latency(Duration::from_millis(200));
        let engine = RoundEngine::new(Arc::new(gen)).with_timeout(Duration::from_millis(10));
        let mut conv = Conversations::new(&plan);

        let result = engine.play(&plan, 1, &mut conv, &BTreeMap::new()).await;
        assert_eq!(result.failed_participants, ids(&["a", "b", "judge"]));
        assert!(result.round_scores.values().all(|s| *s == NEUTRAL_SCORE));
    }

    #[tokio::test]
    async fn test_free_for_all_round_has_whispers() {
        let plan = plan(MatchMode::FreeForAll, &[("a", "Alpha"), ("b", "Beta"), ("c", "Gamma")]);
        let gen = ScriptedGenerator::new().with_replies(
            "c",
            vec!["Gamma here.".into(), "To Alpha: trust me".into()],
        );
        let engine = RoundEngine::new(Arc::new(gen));
        let mut conv = Conversations::new(&plan);

        let result = engine.play(&plan, 1, &mut conv, &BTreeMap::new()).await;
        assert_eq!(result.whispers.len(), 3);
        assert_eq!(result.whispers["c"].recipients, ids(&["a"]));
        // Whispers are never injected into the recipient's context
        assert!(conv.contexts["a"].history().iter().all(|t| !t.content.contains("trust me")));
    }

    #[tokio::test]
    async fn test_introduction_not_scored() {
        let plan = plan(MatchMode::FreeForAll, &[("a", "Alpha"), ("b", "Beta"), ("c", "Gamma")]);
        let engine = RoundEngine::new(Arc::new(ScriptedGenerator::new()));
        let mut conv = Conversations::new(&plan);

        let result = engine.introduce(&plan, &mut conv).await;
        assert_eq!(result.round, 0);
        assert_eq!(result.kind, RoundKind::Introduction);
        assert!(result.round_scores.is_empty());
        assert!(result.cumulative_scores.values().all(|s| *s == 0.0));
        assert_eq!(conv.public["b"], "b#1");
    }
}
