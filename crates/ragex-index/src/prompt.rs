//! Prompt assembly from retrieved chunks.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::store::SearchResult;

const SEPARATOR_WIDTH: usize = 80;

const INSTRUCTIONS: &str = "Instructions:
- Use the code examples above as reference
- Follow the patterns and conventions from the codebase
- Provide working, production-quality Elixir code
- Explain your approach briefly";

fn default_persona() -> String {
    "You are an expert Elixir developer working on this codebase.".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptConfig {
    /// Opening line of every generation prompt.
    #[serde(default = "default_persona")]
    pub persona: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            persona: default_persona(),
        }
    }
}

/// Renders retrieved chunks and the question into one generation prompt.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    persona: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(&PromptConfig::default())
    }
}

impl PromptBuilder {
    #[must_use]
    pub fn new(config: &PromptConfig) -> Self {
        Self {
            persona: config.persona.clone(),
        }
    }

    #[must_use]
    pub fn build_prompt(&self, query: &str, results: &[SearchResult]) -> String {
        let separator = "=".repeat(SEPARATOR_WIDTH);
        let mut context = String::new();

        for (i, result) in results.iter().enumerate() {
            let chunk = &result.chunk;
            let _ = writeln!(context, "\n{separator}");
            let _ = writeln!(context, "[Context {}] (similarity: {:.2})", i + 1, result.score);
            let _ = writeln!(context, "File: {}", chunk.file);
            if let Some(module) = chunk.module.as_deref().filter(|m| !m.is_empty()) {
                let _ = writeln!(context, "Module: {module}");
            }
            if let Some(functions) = chunk.functions.as_ref().filter(|f| !f.is_empty()) {
                let _ = writeln!(context, "Functions: {}", functions.join(", "));
            }
            let _ = writeln!(context, "\n{}", chunk.text);
        }

        format!(
            "{persona}\n\nHere is relevant code from the codebase:\n{context}\n\n{separator}\n\nQuestion: {query}\n\n{INSTRUCTIONS}\n\nAnswer:",
            persona = self.persona,
        )
    }
}
