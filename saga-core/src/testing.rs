//! Testing utilities for the narrator.
//!
//! This module provides tools for integration testing:
//! - `ScriptedGenerator` for deterministic generation without a model server
//! - `TestHarness` for scripted adventures
//! - Assertion helpers for verifying adventure state

use crate::generation::{Generation, GenerationError, GenerationParams, Prompt, TextGenerator};
use crate::narrator::{Narrator, NarratorConfig, NarratorError, NarratorEvent, Phase, TerminationReason};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Characters per fragment when a scripted text is streamed.
const STREAM_CHUNK_CHARS: usize = 7;

/// Format a round the way the model is asked to: prose, then numbered choices.
pub fn round_text(description: &str, choices: [&str; 3]) -> String {
    format!(
        "{description}\n1. {}\n2. {}\n3. {}",
        choices[0], choices[1], choices[2]
    )
}

/// A scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Text, streamed in fragments when the request asks for streaming.
    Text(String),
    /// Explicit stream fragments, always streamed.
    Chunks(Vec<String>),
    /// Fragments followed by a stream failure.
    BrokenStream(Vec<String>, String),
    /// The call fails before producing anything.
    Error(String),
    /// The reply arrives after a delay.
    Delayed(Duration, String),
    /// The call never completes.
    Hang,
}

/// A recorded generation request.
#[derive(Debug, Clone)]
pub struct GenerationCall {
    pub prompt: Prompt,
    pub params: GenerationParams,
}

/// A generator that replays scripted replies in order.
///
/// Every request is recorded. Once the script runs out, calls fail.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<GenerationCall>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, reply: ScriptedReply) -> Self {
        lock(&self.replies).push_back(reply);
        self
    }

    pub fn then_text(self, text: impl Into<String>) -> Self {
        self.then(ScriptedReply::Text(text.into()))
    }

    pub fn then_round(self, description: &str, choices: [&str; 3]) -> Self {
        self.then_text(round_text(description, choices))
    }

    pub fn then_chunks(self, chunks: &[&str]) -> Self {
        self.then(ScriptedReply::Chunks(
            chunks.iter().map(|c| c.to_string()).collect(),
        ))
    }

    pub fn then_error(self, message: impl Into<String>) -> Self {
        self.then(ScriptedReply::Error(message.into()))
    }

    pub fn then_hang(self) -> Self {
        self.then(ScriptedReply::Hang)
    }

    /// Queue a reply without consuming the builder.
    pub fn push(&self, reply: ScriptedReply) {
        lock(&self.replies).push_back(reply);
    }

    /// Every request received so far.
    pub fn calls(&self) -> Vec<GenerationCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Replies not yet consumed.
    pub fn remaining(&self) -> usize {
        lock(&self.replies).len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<Generation, GenerationError> {
        lock(&self.calls).push(GenerationCall {
            prompt: prompt.clone(),
            params: *params,
        });
        let reply = lock(&self.replies).pop_front();

        match reply {
            Some(ScriptedReply::Text(text)) => Ok(shape(text, params.stream)),
            Some(ScriptedReply::Chunks(chunks)) => Ok(stream_of(chunks, None)),
            Some(ScriptedReply::BrokenStream(chunks, message)) => {
                Ok(stream_of(chunks, Some(message)))
            }
            Some(ScriptedReply::Error(message)) => Err(GenerationError::Stream(message)),
            Some(ScriptedReply::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(shape(text, params.stream))
            }
            Some(ScriptedReply::Hang) => {
                futures::future::pending::<()>().await;
                Err(GenerationError::Empty)
            }
            None => Err(GenerationError::Stream(
                "no more scripted replies".to_string(),
            )),
        }
    }
}

fn shape(text: String, stream: bool) -> Generation {
    if !stream {
        return Generation::Complete(text);
    }
    let chars: Vec<char> = text.chars().collect();
    let chunks = chars
        .chunks(STREAM_CHUNK_CHARS)
        .map(|chunk| chunk.iter().collect())
        .collect();
    stream_of(chunks, None)
}

fn stream_of(chunks: Vec<String>, failure: Option<String>) -> Generation {
    let items: Vec<Result<String, GenerationError>> = chunks
        .into_iter()
        .map(Ok)
        .chain(failure.map(|message| Err(GenerationError::Stream(message))))
        .collect();
    Generation::Stream(Box::pin(futures::stream::iter(items)))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Test harness for running scripted adventures.
pub struct TestHarness {
    /// The narrator under test.
    pub narrator: Narrator,
    /// The scripted model.
    pub generator: ScriptedGenerator,
}

impl TestHarness {
    /// Create a harness with an adventure already started.
    pub fn new(premise: &str, max_rounds: u32) -> Self {
        Self::with_config(NarratorConfig::default(), premise, max_rounds)
    }

    pub fn with_config(config: NarratorConfig, premise: &str, max_rounds: u32) -> Self {
        let mut narrator = Narrator::new(config);
        if let Err(e) = narrator.start(premise, max_rounds) {
            panic!("Failed to start test adventure: {e}");
        }
        Self {
            narrator,
            generator: ScriptedGenerator::new(),
        }
    }

    /// Queue a well-formed round.
    pub fn expect_round(&mut self, description: &str, choices: [&str; 3]) -> &mut Self {
        self.generator
            .push(ScriptedReply::Text(round_text(description, choices)));
        self
    }

    /// Queue a raw reply text.
    pub fn expect_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.generator.push(ScriptedReply::Text(text.into()));
        self
    }

    /// Queue a failing call.
    pub fn expect_error(&mut self, message: impl Into<String>) -> &mut Self {
        self.generator.push(ScriptedReply::Error(message.into()));
        self
    }

    pub async fn advance(&mut self) -> Result<NarratorEvent, NarratorError> {
        self.narrator.advance(&self.generator).await
    }

    /// Pick the 1-based choice and narrate what follows.
    pub async fn choose(&mut self, index: usize) -> Result<NarratorEvent, NarratorError> {
        self.narrator.select_index(index)?;
        self.narrator.advance(&self.generator).await
    }

    pub fn history(&self) -> &str {
        self.narrator
            .transcript()
            .map(|t| t.as_str())
            .unwrap_or_default()
    }

    pub fn summary(&self) -> &str {
        self.narrator
            .state()
            .map(|s| s.summary_context())
            .unwrap_or_default()
    }

    /// The user content of the `n`th request (0-based).
    pub fn prompt_text(&self, n: usize) -> Option<String> {
        self.generator
            .calls()
            .get(n)
            .map(|call| call.prompt.user_content.clone())
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert the narrator is in a phase with the given name.
#[track_caller]
pub fn assert_phase(harness: &TestHarness, expected: &str) {
    let actual = harness.narrator.phase().name();
    assert_eq!(actual, expected, "Expected phase '{expected}', got '{actual}'");
}

/// Assert the narrator is awaiting a choice for `round`.
#[track_caller]
pub fn assert_awaiting_choice(harness: &TestHarness, round: u32) {
    match harness.narrator.phase() {
        Phase::AwaitingChoice { round: actual, .. } => assert_eq!(
            *actual, round,
            "Expected to await a choice for round {round}, got round {actual}"
        ),
        other => panic!("Expected to await a choice, got phase '{}'", other.name()),
    }
}

/// Assert the adventure terminated for the given reason.
#[track_caller]
pub fn assert_terminated(harness: &TestHarness, reason: TerminationReason) {
    assert_eq!(
        harness.narrator.termination_reason(),
        Some(reason),
        "Expected termination with {reason:?}"
    );
}

/// Assert the transcript contains `text`.
#[track_caller]
pub fn assert_history_contains(harness: &TestHarness, text: &str) {
    assert!(
        harness.history().contains(text),
        "Expected history to contain '{text}'\n--- history ---\n{}",
        harness.history()
    );
}

/// Assert the transcript does NOT contain `text`.
#[track_caller]
pub fn assert_history_lacks(harness: &TestHarness, text: &str) {
    assert!(
        !harness.history().contains(text),
        "Expected history to NOT contain '{text}'"
    );
}
