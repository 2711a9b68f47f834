//! Text generation boundary.
//!
//! The narrator never talks to a model directly. It hands a [`Prompt`] and
//! [`GenerationParams`] to a [`TextGenerator`], which answers with either the
//! complete text or a stream of fragments. Both forms are reduced to the same
//! final string by [`Generation::collect`].

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio_stream::Stream;

/// System role given to the model for every request.
pub const NARRATOR_ROLE: &str = "Tu es un maître du jeu en français.";

/// Errors from a generation call.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Model client error: {0}")]
    Client(#[from] chat::Error),

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Model returned an empty response")]
    Empty,

    #[error("Stream error: {0}")]
    Stream(String),
}

/// A role-tagged prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub system_role: String,
    pub user_content: String,
}

impl Prompt {
    /// A prompt addressed to the narrator role.
    pub fn narrator(user_content: impl Into<String>) -> Self {
        Self {
            system_role: NARRATOR_ROLE.to_string(),
            user_content: user_content.into(),
        }
    }
}

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: usize,
    pub temperature: f32,
    pub repetition_penalty: f32,
    pub stream: bool,
}

impl GenerationParams {
    /// Parameters for a story round.
    pub fn continuation() -> Self {
        Self {
            max_tokens: 250,
            temperature: 0.7,
            repetition_penalty: 1.2,
            stream: true,
        }
    }

    /// Parameters for the closing narration.
    pub fn ending() -> Self {
        Self {
            max_tokens: 200,
            ..Self::continuation()
        }
    }

    /// Parameters for context compression.
    pub fn summary() -> Self {
        Self {
            max_tokens: 150,
            temperature: 0.5,
            repetition_penalty: 1.2,
            stream: false,
        }
    }
}

/// Lazy, finite sequence of generated text fragments.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

/// The answer of a [`TextGenerator`].
pub enum Generation {
    /// The whole text at once.
    Complete(String),
    /// Fragments whose concatenation is the text.
    Stream(TextStream),
}

impl Generation {
    /// Concatenate the generation into its final, trimmed text.
    ///
    /// Empty output is an error: a round cannot be narrated from nothing.
    pub async fn collect(self) -> Result<String, GenerationError> {
        let text = match self {
            Generation::Complete(text) => text,
            Generation::Stream(mut stream) => {
                let mut text = String::new();
                while let Some(fragment) = stream.next().await {
                    text.push_str(&fragment?);
                }
                text
            }
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(text.to_string())
    }
}

impl std::fmt::Debug for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Generation::Complete(text) => f.debug_tuple("Complete").field(text).finish(),
            Generation::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A language model that can narrate.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<Generation, GenerationError>;
}

/// Run one generation to completion within `timeout`.
pub async fn generate_text<G>(
    generator: &G,
    prompt: &Prompt,
    params: &GenerationParams,
    timeout: Duration,
) -> Result<String, GenerationError>
where
    G: TextGenerator + ?Sized,
{
    let call = async { generator.generate(prompt, params).await?.collect().await };

    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| GenerationError::Timeout(timeout))?
}

#[async_trait]
impl TextGenerator for chat::Client {
    async fn generate(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<Generation, GenerationError> {
        let request = chat::Request::new(vec![
            chat::Message::system(&prompt.system_role),
            chat::Message::user(&prompt.user_content),
        ])
        .with_max_tokens(params.max_tokens)
        .with_temperature(params.temperature)
        .with_repetition_penalty(params.repetition_penalty);

        if !params.stream {
            let response = self.complete(request).await?;
            tracing::debug!(
                id = %response.id,
                model = %response.model,
                finish_reason = ?response.finish_reason,
                completion_tokens = ?response.usage.as_ref().map(|u| u.completion_tokens),
                "Completion received"
            );
            return Ok(Generation::Complete(response.content));
        }

        let events = self.stream(request).await?;
        let fragments = events.filter_map(|event| async move {
            match event {
                Ok(chat::StreamEvent::TextDelta(text)) => Some(Ok(text)),
                Ok(chat::StreamEvent::Finish(_)) | Ok(chat::StreamEvent::Done) => None,
                Err(e) => Some(Err(GenerationError::from(e))),
            }
        });

        Ok(Generation::Stream(Box::pin(fragments)))
    }
}
