//! Periodic compression of the running story context.
//!
//! The summarizer reads only the current summary, never the transcript, so
//! the prompt stays the same size however long the adventure runs. It
//! returns the new summary; applying it is the narrator's job.

use crate::generation::{generate_text, GenerationError, GenerationParams, TextGenerator};
use crate::prompts::{build_prompt, PromptKind};
use crate::story::StoryState;
use std::time::Duration;

/// Generates replacement summaries.
#[derive(Debug, Clone, Copy)]
pub struct Summarizer {
    params: GenerationParams,
    timeout: Duration,
}

impl Summarizer {
    pub fn new(params: GenerationParams, timeout: Duration) -> Self {
        Self { params, timeout }
    }

    /// Ask the model for a compressed version of the current summary.
    pub async fn summarize<G>(
        &self,
        generator: &G,
        state: &StoryState,
    ) -> Result<String, GenerationError>
    where
        G: TextGenerator + ?Sized,
    {
        let prompt = build_prompt(state, PromptKind::Summary);
        tracing::debug!(
            round = state.current_round(),
            summary_len = state.summary_context().len(),
            "Requesting summary"
        );
        generate_text(generator, &prompt, &self.params, self.timeout).await
    }
}

impl Default for Summarizer {
    fn default() -> Self {
        Self::new(GenerationParams::summary(), Duration::from_secs(120))
    }
}
