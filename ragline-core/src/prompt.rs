//! Context assembly for answer generation.

use std::fmt::Write as _;

use crate::document::{SearchResult, Source};

const DEFAULT_INSTRUCTIONS: &str = "Answer the question using only the numbered context passages. \
If the context does not contain the answer, say that you do not know.";

/// A prompt ready to be sent to an [`LlmProvider`](crate::LlmProvider).
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    instructions: String,
    question: String,
    passages: Vec<String>,
    sources: Vec<Source>,
}

impl Prompt {
    /// The user's question.
    pub fn question(&self) -> &str {
        &self.question
    }

    /// The context passages, highest similarity first.
    pub fn passages(&self) -> &[String] {
        &self.passages
    }

    /// Provenance of each passage, in the same order.
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// The system-style instructions preceding the context.
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Total characters of context included.
    pub fn context_chars(&self) -> usize {
        self.passages.iter().map(|p| p.chars().count()).sum()
    }

    /// Render the prompt as a single message.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}\n\nContext:", self.instructions);
        if self.passages.is_empty() {
            out.push_str("(no relevant sources were found)\n");
        }
        for (i, passage) in self.passages.iter().enumerate() {
            let _ = writeln!(out, "[{}] {}\n", i + 1, passage);
        }
        let _ = write!(out, "\nQuestion: {}\nAnswer:", self.question);
        out
    }
}

/// Assembles a bounded-size [`Prompt`] from ranked search results.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_context_chars: usize,
    instructions: String,
}

impl PromptBuilder {
    /// Create a builder whose context never exceeds `max_context_chars` characters.
    pub fn new(max_context_chars: usize) -> Self {
        Self { max_context_chars, instructions: DEFAULT_INSTRUCTIONS.to_string() }
    }

    /// Replace the default instructions.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Build a prompt for `question` from `results`.
    ///
    /// Passages are taken in descending score order. The first passage that
    /// does not fit is cut to the remaining budget and nothing after it is
    /// included, so [`Prompt::sources`] may be shorter than `results`.
    pub fn build(&self, question: &str, results: &[SearchResult]) -> Prompt {
        let mut ranked: Vec<&SearchResult> = results.iter().collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut remaining = self.max_context_chars;
        let mut passages = Vec::new();
        let mut sources = Vec::new();
        for result in ranked {
            if remaining == 0 {
                break;
            }
            let text = result.chunk.text.trim();
            let len = text.chars().count();
            sources.push(Source::from(result));
            if len <= remaining {
                passages.push(text.to_string());
                remaining -= len;
            } else {
                passages.push(text.chars().take(remaining).collect());
                break;
            }
        }

        Prompt {
            instructions: self.instructions.clone(),
            question: question.trim().to_string(),
            passages,
            sources,
        }
    }
}
