//! Persona definitions

use serde::{Deserialize, Serialize};

/// What a persona does in a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaRole {
    /// Competes for the other contestants' passwords
    #[default]
    Contestant,
    /// Scores every round
    Judge,
}

impl std::fmt::Display for PersonaRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersonaRole::Contestant => write!(f, "contestant"),
            PersonaRole::Judge => write!(f, "judge"),
        }
    }
}

/// A named role with a fixed system prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    /// Registry key (e.g. "santa")
    pub id: String,
    /// Display / character name (e.g. "Santa")
    #[serde(rename = "character")]
    pub name: String,
    /// System prompt, opaque to the arena
    pub prompt: String,
    #[serde(default)]
    pub role: PersonaRole,
}

impl Persona {
    /// Create a contestant persona
    pub fn contestant(id: impl Into<String>, name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            prompt: prompt.into(),
            role: PersonaRole::Contestant,
        }
    }

    /// Create a judge persona
    pub fn judge(id: impl Into<String>, name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            prompt: prompt.into(),
            role: PersonaRole::Judge,
        }
    }

    pub fn is_judge(&self) -> bool {
        self.role == PersonaRole::Judge
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_defaults_to_contestant() {
        let json = r#"{"id": "santa", "character": "Santa", "prompt": "Ho ho ho"}"#;
        let persona: Persona = serde_json::from_str(json).unwrap();
        assert_eq!(persona.role, PersonaRole::Contestant);
        assert_eq!(persona.name, "Santa");
    }

    #[test]
    fn test_judge_role_parses() {
        let json = r#"{"id": "judge", "character": "Judge", "prompt": "Be fair", "role": "judge"}"#;
        let persona: Persona = serde_json::from_str(json).unwrap();
        assert!(persona.is_judge());
    }
}
