//! Generation capability: persona messages in, text out
//!
//! - `Generator` - the seam the round engine calls
//! - `HuggingFaceGenerator` - OpenAI-compatible chat completions over HTTP
//! - `ScriptedGenerator` - canned replies for tests and offline matches

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::config::ArenaConfig;
use crate::types::ChatMessage;

/// Generation failures. Recovered per participant by the round engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("Transport failure: {0}")]
    Transport(String),
    #[error("Authentication rejected: {0}")]
    Auth(String),
    #[error("Quota exhausted")]
    Quota,
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Text generation for one persona
#[async_trait]
pub trait Generator: Send + Sync + std::fmt::Debug {
    /// Provider name, for logs
    fn name(&self) -> &str;

    /// Generate the persona's next message. `messages` starts with exactly one system turn.
    async fn generate(&self, persona_id: &str, messages: &[ChatMessage]) -> Result<String, ProviderError>;
}

// =============================================================================
// HUGGING FACE
// =============================================================================

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Hugging Face inference router (chat completions)
#[derive(Debug)]
pub struct HuggingFaceGenerator {
    api_key: String,
    model: String,
    endpoint: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl HuggingFaceGenerator {
    /// Build from configuration
    pub fn new(config: &ArenaConfig, api_key: &str) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.generation_timeout)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self {
            api_key: api_key.to_string(),
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
            max_tokens: config.max_tokens,
            client,
        })
    }
}

#[async_trait]
impl Generator for HuggingFaceGenerator {
    fn name(&self) -> &str {
        "huggingface"
    }

    async fn generate(&self, persona_id: &str, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        tracing::debug!(persona = persona_id, turns = messages.len(), model = %self.model, "chat completion");

        let body = CompletionRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => ProviderError::Auth(body),
                402 | 429 => ProviderError::Quota,
                _ => ProviderError::Transport(format!("Status: {}, Body: {}", status, body)),
            });
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("no choices".to_string()))
    }
}

// =============================================================================
// SCRIPTED
// =============================================================================

/// One call seen by a `ScriptedGenerator`
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub persona_id: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Default)]
struct ScriptState {
    counts: HashMap<String, usize>,
    calls: Vec<RecordedCall>,
}

/// Generator returning canned replies
///
/// Personas with a script cycle through it; any other persona replies
/// `"<persona_id>#<n>"` where `n` counts that persona's calls from 1.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    scripts: HashMap<String, Vec<String>>,
    failing: HashSet<String>,
    latency: Option<Duration>,
    state: Mutex<ScriptState>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cycle through `replies` for `persona_id`
    pub fn with_replies(mut self, persona_id: &str, replies: Vec<String>) -> Self {
        self.scripts.insert(persona_id.to_string(), replies);
        self
    }

    /// Always reply `reply` for `persona_id`
    pub fn with_reply(self, persona_id: &str, reply: &str) -> Self {
        self.with_replies(persona_id, vec![reply.to_string()])
    }

    /// Every call for `persona_id` fails with a transport error
    pub fn failing(mut self, persona_id: &str) -> Self {
        self.failing.insert(persona_id.to_string());
        self
    }

    /// Sleep before replying
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Offline demo: lively judge feedback, numbered contestant replies
    pub fn demo(judge_id: &str, contestants: &[(&str, &str)]) -> Self {
        let lines = |offset: usize| -> String {
            contestants
                .iter()
                .enumerate()
                .map(|(i, (_, name))| {
                    let s = |k: usize| 3 + (i * 3 + k * 2 + offset) % 8;
                    format!(
                        "{}'s Effectiveness: {}/10, Creativity: {}/10, Coherence: {}/10, Engagement: {}/10",
                        name,
                        s(0),
                        s(1),
                        s(2),
                        s(3)
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        let feedback = (0..5).map(|offset| format!("{}\nA tense exchange.", lines(offset))).collect();
        Self::new().with_replies(judge_id, feedback)
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Calls made for one persona
    pub fn calls_for(&self, persona_id: &str) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.persona_id == persona_id)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, persona_id: &str, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let n = {
            let mut state = self.lock();
            state.calls.push(RecordedCall {
                persona_id: persona_id.to_string(),
                messages: messages.to_vec(),
            });
            let count = state.counts.entry(persona_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if self.failing.contains(persona_id) {
            return Err(ProviderError::Transport("scripted failure".to_string()));
        }

        match self.scripts.get(persona_id) {
            Some(replies) if !replies.is_empty() => Ok(replies[(n - 1) % replies.len()].clone()),
            _ => Ok(format!("{}#{}", persona_id, n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs() -> Vec<ChatMessage> {
        vec![ChatMessage::system("sys"), ChatMessage::user("go")]
    }

    #[tokio::test]
    async fn test_scripted_numbered_replies() {
        let gen = ScriptedGenerator::new();
        assert_eq!(gen.generate("santa", &msgs()).await.unwrap(), "santa#1");
        assert_eq!(gen.generate("egg", &msgs()).await.unwrap(), "egg#1");
        assert_eq!(gen.generate("santa", &msgs()).await.unwrap(), "santa#2");
        assert_eq!(gen.calls().len(), 3);
        assert_eq!(gen.calls_for("santa").len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_cycles_replies() {
        let gen = ScriptedGenerator::new().with_replies("judge", vec!["a".into(), "b".into()]);
        assert_eq!(gen.generate("judge", &msgs()).await.unwrap(), "a");
        assert_eq!(gen.generate("judge", &msgs()).await.unwrap(), "b");
        assert_eq!(gen.generate("judge", &msgs()).await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let gen = ScriptedGenerator::new().failing("egg");
        let err = gen.generate("egg", &msgs()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));
        // Failed calls are still recorded
        assert_eq!(gen.calls_for("egg").len(), 1);
    }

    #[tokio::test]
    async fn test_demo_feedback_is_parseable() {
        use crate::core::ScoreParser;
        use crate::types::Persona;

        let gen = ScriptedGenerator::demo("judge", &[("santa", "Santa"), ("egg", "Egg")]);
        let feedback = gen.generate("judge", &msgs()).await.unwrap();

        let santa = Persona::contestant("santa", "Santa", "p");
        let egg = Persona::contestant("egg", "Egg", "p");
        let report = ScoreParser::new().parse(&feedback, &[&santa, &egg]);
        assert!(!report.is_degraded(), "demo feedback should parse: {}", feedback);
    }

    #[test]
    fn test_completion_request_shape() {
        let messages = msgs();
        let body = CompletionRequest { model: "m", messages: &messages, max_tokens: 500 };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["max_tokens"], 500);
    }
}
