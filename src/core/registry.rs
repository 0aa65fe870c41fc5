//! Persona registry: immutable id → persona table, validated at load

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

use crate::core::prompts::builtin_personas;
use crate::types::{ArenaError, Persona, PersonaRole};

/// Load-time registry failures
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Duplicate persona id: {0}")]
    DuplicatePersona(String),
    #[error("Duplicate character name: {0}")]
    DuplicateName(String),
    #[error("Persona {id:?} is missing required field `{field}`")]
    MissingField { id: String, field: &'static str },
    #[error("No judge persona in registry")]
    NoJudge,
    #[error("Failed to read persona file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse persona file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Read-only persona table
#[derive(Debug, Clone)]
pub struct PersonaRegistry {
    /// Load order, for listing
    order: Vec<String>,
    personas: HashMap<String, Persona>,
    judge_id: String,
}

impl PersonaRegistry {
    /// Validate and build a registry
    pub fn new(personas: Vec<Persona>) -> Result<Self, RegistryError> {
        let mut order = Vec::with_capacity(personas.len());
        let mut map = HashMap::with_capacity(personas.len());

        for persona in personas {
            validate(&persona)?;
            if map.contains_key(&persona.id) {
                return Err(RegistryError::DuplicatePersona(persona.id));
            }
            // Judge feedback is matched by name, so names must tell personas apart
            let clash = map
                .values()
                .any(|p: &Persona| p.name.trim().eq_ignore_ascii_case(persona.name.trim()));
            if clash {
                return Err(RegistryError::DuplicateName(persona.name));
            }
            order.push(persona.id.clone());
            map.insert(persona.id.clone(), persona);
        }

        let judge_id = order
            .iter()
            .find(|id| map[id.as_str()].is_judge())
            .cloned()
            .ok_or(RegistryError::NoJudge)?;

        Ok(Self { order, personas: map, judge_id })
    }

    /// Registry with the shipped personas
    pub fn builtin() -> Self {
        Self::new(builtin_personas()).expect("built-in personas are valid")
    }

    /// Parse a JSON array of `{id, character, prompt, role?}` records
    pub fn from_json_str(json: &str) -> Result<Self, RegistryError> {
        let personas: Vec<Persona> = serde_json::from_str(json)?;
        Self::new(personas)
    }

    /// Load a JSON persona file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Look up a persona
    pub fn get(&self, id: &str) -> Result<&Persona, ArenaError> {
        self.personas
            .get(id)
            .ok_or_else(|| ArenaError::UnknownPersona(id.to_string()))
    }

    /// All personas, in load order
    pub fn all(&self) -> impl Iterator<Item = &Persona> {
        self.order.iter().filter_map(|id| self.personas.get(id))
    }

    /// Contestant personas, in load order
    pub fn contestants(&self) -> impl Iterator<Item = &Persona> {
        self.all().filter(|p| p.role == PersonaRole::Contestant)
    }

    /// The first judge persona
    pub fn judge(&self) -> &Persona {
        &self.personas[&self.judge_id]
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}

fn validate(persona: &Persona) -> Result<(), RegistryError> {
    let missing = |field| RegistryError::MissingField { id: persona.id.clone(), field };
    if persona.id.trim().is_empty() {
        return Err(missing("id"));
    }
    if persona.name.trim().is_empty() {
        return Err(missing("character"));
    }
    if persona.prompt.trim().is_empty() {
        return Err(missing("prompt"));
    }
    Ok(())
}
