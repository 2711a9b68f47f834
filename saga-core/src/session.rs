//! AdventureSession - the primary public API for playing an adventure.
//!
//! This module wraps a [`Narrator`] and the model it talks to into a single
//! object, and handles transcript export.

use crate::generation::TextGenerator;
use crate::narrator::{Narrator, NarratorConfig, NarratorError, NarratorEvent, SessionId};
use crate::story::Vitality;
use std::path::Path;
use thiserror::Error;
use tokio::fs;

/// Default rounds per adventure.
pub const DEFAULT_MAX_ROUNDS: u32 = 3;

/// Default transcript file name.
pub const DEFAULT_TRANSCRIPT_FILE: &str = "save_rpg_ia.txt";

/// Errors from AdventureSession operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Narrator error: {0}")]
    Narrator(#[from] NarratorError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No adventure to save")]
    NoAdventure,
}

impl SessionError {
    /// Whether retrying the last step may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Narrator(e) if e.is_retryable())
    }
}

/// Configuration for a new adventure session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Rounds before the ending.
    pub max_rounds: u32,

    /// Model override.
    pub model: Option<String>,

    /// API base URL override.
    pub base_url: Option<String>,

    /// Narrator tuning.
    pub narrator: NarratorConfig,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            model: None,
            base_url: None,
            narrator: NarratorConfig::default(),
        }
    }

    /// Set the number of rounds.
    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = rounds;
        self
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_narrator(mut self, narrator: NarratorConfig) -> Self {
        self.narrator = narrator;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// An adventure session.
///
/// Owns the narrator and the model client. One adventure runs at a time;
/// once it terminates, [`begin`](Self::begin) may start another.
pub struct AdventureSession<G = chat::Client> {
    narrator: Narrator,
    generator: G,
    config: SessionConfig,
}

impl AdventureSession<chat::Client> {
    /// Create a session talking to the model configured in the environment.
    ///
    /// See [`chat::Client::from_env`]; `config` overrides take precedence.
    pub fn from_env(config: SessionConfig) -> Self {
        let mut client = chat::Client::from_env();
        if let Some(base_url) = &config.base_url {
            client = client.with_base_url(base_url);
        }
        if let Some(model) = &config.model {
            client = client.with_model(model);
        }

        tracing::debug!(base_url = client.base_url(), model = client.model(), "Model client ready");
        Self::with_generator(config, client)
    }
}

impl<G: TextGenerator> AdventureSession<G> {
    /// Create a session around any text generator.
    pub fn with_generator(config: SessionConfig, generator: G) -> Self {
        Self {
            narrator: Narrator::new(config.narrator.clone()),
            generator,
            config,
        }
    }

    /// Start an adventure from `premise` and narrate its first round.
    pub async fn begin(&mut self, premise: &str) -> Result<NarratorEvent, SessionError> {
        self.narrator.start(premise, self.config.max_rounds)?;
        self.advance().await
    }

    /// Run the pending step, or retry it after a failure.
    pub async fn advance(&mut self) -> Result<NarratorEvent, SessionError> {
        Ok(self.narrator.advance(&self.generator).await?)
    }

    /// Pick the 1-based choice and narrate what follows.
    pub async fn choose(&mut self, index: usize) -> Result<NarratorEvent, SessionError> {
        self.narrator.select_index(index)?;
        self.advance().await
    }

    /// Pick a choice by its text and narrate what follows.
    pub async fn choose_text(&mut self, choice: &str) -> Result<NarratorEvent, SessionError> {
        Ok(self.narrator.choose(&self.generator, choice).await?)
    }

    pub fn apply_damage(&mut self, amount: u32) -> Result<Vitality, SessionError> {
        Ok(self.narrator.apply_damage(amount)?)
    }

    pub fn heal(&mut self, amount: u32) -> Result<Vitality, SessionError> {
        Ok(self.narrator.heal(amount)?)
    }

    /// Abandon the current adventure, if any.
    pub fn abandon(&mut self) {
        self.narrator.abandon();
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.narrator.session_id()
    }

    pub fn narrator(&self) -> &Narrator {
        &self.narrator
    }

    pub fn narrator_mut(&mut self) -> &mut Narrator {
        &mut self.narrator
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Write the transcript to a text file.
    pub async fn save_transcript(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let transcript = self.narrator.transcript().ok_or(SessionError::NoAdventure)?;
        fs::write(path.as_ref(), transcript.as_str()).await?;
        tracing::info!(path = %path.as_ref().display(), bytes = transcript.len(), "Transcript saved");
        Ok(())
    }
}
