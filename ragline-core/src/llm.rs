//! LLM provider trait used for answer generation.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::Result;
use crate::prompt::Prompt;

/// A large-language-model backend that turns an assembled prompt into an answer.
///
/// Like [`EmbeddingProvider`](crate::EmbeddingProvider), implementations make a
/// single attempt per call and report failures as
/// [`RagError::Provider`](crate::RagError::Provider) with the right
/// [`ProviderErrorKind`](crate::ProviderErrorKind) so the orchestrator's retry
/// policy can decide whether to try again.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Generate an answer for `prompt`.
    async fn generate(&self, prompt: &Prompt) -> Result<String>;
}

/// Offline LLM that answers from the prompt itself.
///
/// The answer quotes the question and the first retrieved passage. Intended
/// for development and tests.
#[derive(Debug, Default)]
pub struct MockLlm {
    calls: AtomicUsize,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times [`generate`](LlmProvider::generate) was called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(match prompt.passages().first() {
            Some(passage) => format!(
                "Answer to \"{}\" from {} source(s): {}",
                prompt.question(),
                prompt.passages().len(),
                passage
            ),
            None => format!("No sources were found for \"{}\".", prompt.question()),
        })
    }
}
