//! The narrator: turn orchestration for one adventure at a time.
//!
//! A [`Narrator`] owns the [`StoryState`] and moves it through
//! `Idle → Running → RoundInProgress → AwaitingChoice → … → Ending → Terminated`.
//! [`Narrator::advance`] drives a whole step against a [`TextGenerator`].
//!
//! Generation never touches the state directly. Results are applied through
//! `apply_summary`, `complete_round` and `complete_ending`, which check that
//! the [`RoundTicket`] (or session id) they carry still matches the live
//! session and round. A result for an abandoned session, or for a round that
//! was pre-empted by vitality running out, is discarded as stale.

use crate::choices::{extract_choices, CHOICES_PER_ROUND};
use crate::generation::{generate_text, GenerationError, GenerationParams, Prompt, TextGenerator};
use crate::prompts::{build_prompt, PromptKind};
use crate::story::{StoryState, Transcript, Vitality};
use crate::summarizer::Summarizer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Rounds between automatic summaries.
pub const DEFAULT_SUMMARY_INTERVAL: u32 = 3;

/// Errors from the narrator.
#[derive(Debug, Error)]
pub enum NarratorError {
    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Automatic summary failed, adventure over: {0}")]
    SummaryFailed(#[source] GenerationError),

    #[error("Cannot {action} while {phase}")]
    InvalidTransition {
        action: &'static str,
        phase: &'static str,
    },

    #[error("The adventure needs a premise")]
    EmptyPremise,

    #[error("The round limit must be at least 1")]
    InvalidRoundLimit,

    #[error("'{0}' is not one of the offered choices")]
    UnknownChoice(String),

    #[error("Discarded stale result for session {session}, round {round}")]
    StaleResult { session: SessionId, round: u32 },
}

impl NarratorError {
    /// Whether the same step can be attempted again.
    ///
    /// Only round and ending generation failures leave the adventure where it
    /// was; everything else either changed nothing worth retrying or ended it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NarratorError::Generation(_))
    }
}

/// Identifier of one adventure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why the closing narration was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndReason {
    RoundLimit,
    VitalityZero,
}

/// Why an adventure aborted before its ending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbortReason {
    InsufficientChoices,
}

/// Final state of a terminated adventure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    /// The ending was narrated.
    Completed(EndReason),
    /// A round did not offer exactly three choices.
    InsufficientChoices,
    /// The automatic summary could not be produced.
    SummaryFailed,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            TerminationReason::Completed(EndReason::RoundLimit) => "Aventure terminée !",
            TerminationReason::Completed(EndReason::VitalityZero) => {
                "Le joueur est tombé au combat !"
            }
            TerminationReason::InsufficientChoices => {
                "Fin de l'aventure : L'IA n'a pas pu fournir 3 choix."
            }
            TerminationReason::SummaryFailed => {
                "Fin de l'aventure : le résumé automatique a échoué."
            }
        };
        f.write_str(message)
    }
}

/// Key of a round in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTicket {
    session: SessionId,
    round: u32,
    summarize: bool,
    summary_applied: bool,
}

impl RoundTicket {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    /// Whether a summary is still owed before this round's prompt.
    pub fn needs_summary(&self) -> bool {
        self.summarize && !self.summary_applied
    }
}

/// What the next step of the adventure is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStep {
    /// Narrate a round (after summarising, if the ticket says so).
    Round(RoundTicket),
    /// Narrate the ending.
    Ending(SessionId, EndReason),
}

/// Where the narrator stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    RoundInProgress(RoundTicket),
    AwaitingChoice {
        round: u32,
        choices: [String; CHOICES_PER_ROUND],
    },
    Ending(EndReason),
    Terminated(TerminationReason),
}

impl Phase {
    /// Short human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Running => "running",
            Phase::RoundInProgress(_) => "a round is in progress",
            Phase::AwaitingChoice { .. } => "awaiting a choice",
            Phase::Ending(_) => "ending",
            Phase::Terminated(_) => "terminated",
        }
    }

    /// Whether an adventure is under way.
    pub fn is_live(&self) -> bool {
        !matches!(self, Phase::Idle | Phase::Terminated(_))
    }
}

/// What the presentation layer is told after each step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum NarratorEvent {
    /// A round was narrated and awaits the player's choice.
    Round {
        round: u32,
        narrative: String,
        choices: [String; CHOICES_PER_ROUND],
        turns_left: u32,
    },
    /// The closing narration.
    Ended { final_text: String, reason: EndReason },
    /// The adventure stopped on unusable output.
    Aborted {
        reason: AbortReason,
        partial_text: String,
        found: usize,
    },
}

/// Configuration for the narrator.
#[derive(Debug, Clone)]
pub struct NarratorConfig {
    /// Summarise before every round that is a multiple of this.
    pub summary_interval: u32,

    /// Upper bound on each generation call, streaming included.
    pub generation_timeout: Duration,

    pub continuation: GenerationParams,
    pub ending: GenerationParams,
    pub summary: GenerationParams,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            summary_interval: DEFAULT_SUMMARY_INTERVAL,
            generation_timeout: Duration::from_secs(120),
            continuation: GenerationParams::continuation(),
            ending: GenerationParams::ending(),
            summary: GenerationParams::summary(),
        }
    }
}

impl NarratorConfig {
    pub fn with_summary_interval(mut self, interval: u32) -> Self {
        self.summary_interval = interval;
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }
}

struct Adventure {
    id: SessionId,
    state: StoryState,
}

/// Drives one adventure at a time.
pub struct Narrator {
    config: NarratorConfig,
    adventure: Option<Adventure>,
    phase: Phase,
}

impl Narrator {
    pub fn new(config: NarratorConfig) -> Self {
        Self {
            config,
            adventure: None,
            phase: Phase::Idle,
        }
    }

    pub fn config(&self) -> &NarratorConfig {
        &self.config
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.adventure.as_ref().map(|a| a.id)
    }

    pub fn state(&self) -> Option<&StoryState> {
        self.adventure.as_ref().map(|a| &a.state)
    }

    /// The adventure's transcript so far.
    pub fn transcript(&self) -> Option<&Transcript> {
        self.state().map(StoryState::full_history)
    }

    pub fn current_round(&self) -> u32 {
        self.state().map_or(0, StoryState::current_round)
    }

    pub fn turns_left(&self) -> u32 {
        self.state().map_or(0, StoryState::turns_left)
    }

    pub fn vitality(&self) -> Option<Vitality> {
        self.state().map(StoryState::vitality)
    }

    /// The choices on offer, while awaiting one.
    pub fn choices(&self) -> Option<&[String; CHOICES_PER_ROUND]> {
        match &self.phase {
            Phase::AwaitingChoice { choices, .. } => Some(choices),
            _ => None,
        }
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        match self.phase {
            Phase::Terminated(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.phase, Phase::Terminated(_))
    }

    /// Start a new adventure from a premise.
    ///
    /// Rejected while another adventure is live. A terminated adventure is
    /// discarded.
    pub fn start(
        &mut self,
        initial_context: &str,
        max_rounds: u32,
    ) -> Result<SessionId, NarratorError> {
        if self.phase.is_live() {
            return Err(self.invalid("start an adventure"));
        }

        let premise = initial_context.trim();
        if premise.is_empty() {
            return Err(NarratorError::EmptyPremise);
        }
        if max_rounds == 0 {
            return Err(NarratorError::InvalidRoundLimit);
        }

        let id = SessionId::new();
        self.adventure = Some(Adventure {
            id,
            state: StoryState::new(premise, max_rounds),
        });
        self.phase = Phase::Running;

        tracing::info!(session = %id, max_rounds, "Adventure started");
        Ok(id)
    }

    /// Drop the current adventure, returning its final state.
    ///
    /// Results still in flight for it will be rejected as stale.
    pub fn abandon(&mut self) -> Option<StoryState> {
        let adventure = self.adventure.take()?;
        tracing::info!(session = %adventure.id, phase = self.phase.name(), "Adventure abandoned");
        self.phase = Phase::Idle;
        Some(adventure.state)
    }

    /// Record the player's choice and make the next round available.
    pub fn select_choice(&mut self, choice: &str) -> Result<(), NarratorError> {
        let Phase::AwaitingChoice { choices, .. } = &self.phase else {
            return Err(self.invalid("select a choice"));
        };

        let choice = choice.trim();
        let Some(chosen) = choices.iter().find(|c| c.as_str() == choice).cloned() else {
            return Err(NarratorError::UnknownChoice(choice.to_string()));
        };

        let adventure = self.adventure_mut("select a choice")?;
        adventure.state.record_choice(&chosen);
        tracing::debug!(session = %adventure.id, choice = %chosen, "Choice recorded");
        self.phase = Phase::Running;
        Ok(())
    }

    /// Select the offered choice at a 1-based position.
    pub fn select_index(&mut self, index: usize) -> Result<(), NarratorError> {
        let Some(choices) = self.choices() else {
            return Err(self.invalid("select a choice"));
        };
        let choice = index
            .checked_sub(1)
            .and_then(|i| choices.get(i))
            .cloned()
            .ok_or_else(|| NarratorError::UnknownChoice(index.to_string()))?;
        self.select_choice(&choice)
    }

    /// Inflict damage; at zero vitality the adventure heads to its ending.
    ///
    /// A round in progress is pre-empted: its result will be stale.
    pub fn apply_damage(&mut self, amount: u32) -> Result<Vitality, NarratorError> {
        let adventure = self.live_adventure_mut("apply damage")?;
        let vitality = adventure.state.vitality().damaged(amount);
        adventure.state.set_vitality(vitality);
        let id = adventure.id;

        if vitality.is_depleted()
            && matches!(
                self.phase,
                Phase::Running | Phase::RoundInProgress(_) | Phase::AwaitingChoice { .. }
            )
        {
            tracing::info!(session = %id, "Vitality depleted, ending the adventure");
            self.phase = Phase::Ending(EndReason::VitalityZero);
        }
        Ok(vitality)
    }

    /// Restore vitality, up to the maximum.
    pub fn heal(&mut self, amount: u32) -> Result<Vitality, NarratorError> {
        let adventure = self.live_adventure_mut("heal")?;
        let vitality = adventure.state.vitality().healed(amount);
        adventure.state.set_vitality(vitality);
        Ok(vitality)
    }

    /// Work out the next step, opening a new round when one is due.
    ///
    /// From `Running` this advances the round counter exactly once. A round
    /// past the limit turns into the ending. From `RoundInProgress` or
    /// `Ending` it hands back the pending step so it can be retried.
    pub fn begin_round(&mut self) -> Result<RoundStep, NarratorError> {
        match &self.phase {
            Phase::RoundInProgress(ticket) => Ok(RoundStep::Round(*ticket)),
            Phase::Ending(reason) => {
                let reason = *reason;
                let id = self.adventure_mut("narrate the ending")?.id;
                Ok(RoundStep::Ending(id, reason))
            }
            Phase::Running => {
                let interval = self.config.summary_interval;
                let adventure = self.adventure_mut("begin a round")?;
                let round = adventure.state.advance_round();
                let id = adventure.id;

                if adventure.state.round_limit_reached() {
                    tracing::info!(session = %id, round, "Round limit reached");
                    self.phase = Phase::Ending(EndReason::RoundLimit);
                    return Ok(RoundStep::Ending(id, EndReason::RoundLimit));
                }

                let ticket = RoundTicket {
                    session: id,
                    round,
                    summarize: interval > 0 && round % interval == 0,
                    summary_applied: false,
                };
                tracing::debug!(session = %id, round, summarize = ticket.summarize, "Round opened");
                self.phase = Phase::RoundInProgress(ticket);
                Ok(RoundStep::Round(ticket))
            }
            _ => Err(self.invalid("begin a round")),
        }
    }

    /// The prompt of the given kind for the live adventure.
    pub fn prompt(&self, kind: PromptKind) -> Option<Prompt> {
        self.state().map(|state| build_prompt(state, kind))
    }

    /// Replace the running summary for the round `ticket` belongs to.
    ///
    /// Returns the updated ticket, which no longer owes a summary.
    pub fn apply_summary(
        &mut self,
        ticket: &RoundTicket,
        summary: String,
    ) -> Result<RoundTicket, NarratorError> {
        self.check_ticket(ticket)?;
        let adventure = self.adventure_mut("apply a summary")?;
        adventure.state.record_summary(summary);

        let updated = RoundTicket {
            summary_applied: true,
            ..*ticket
        };
        tracing::debug!(session = %updated.session, round = updated.round, "Summary applied");
        self.phase = Phase::RoundInProgress(updated);
        Ok(updated)
    }

    /// End the adventure because its summary could not be produced.
    pub fn fail_summary(&mut self, ticket: &RoundTicket) -> Result<(), NarratorError> {
        self.check_ticket(ticket)?;
        tracing::warn!(session = %ticket.session, round = ticket.round, "Summary failed, terminating");
        self.phase = Phase::Terminated(TerminationReason::SummaryFailed);
        Ok(())
    }

    /// Record a round's narration and offer its choices.
    ///
    /// The text always goes into the transcript. Anything other than exactly
    /// three choices terminates the adventure.
    pub fn complete_round(
        &mut self,
        ticket: &RoundTicket,
        text: String,
    ) -> Result<NarratorEvent, NarratorError> {
        self.check_ticket(ticket)?;
        let adventure = self.adventure_mut("complete a round")?;
        adventure.state.record_round(ticket.round, &text);
        let turns_left = adventure.state.turns_left();

        let parsed = extract_choices(&text);
        match parsed.choice_triple() {
            Some(choices) => {
                tracing::info!(session = %ticket.session, round = ticket.round, "Round narrated");
                self.phase = Phase::AwaitingChoice {
                    round: ticket.round,
                    choices: choices.clone(),
                };
                Ok(NarratorEvent::Round {
                    round: ticket.round,
                    narrative: parsed.description,
                    choices,
                    turns_left,
                })
            }
            None => {
                let found = parsed.choice_count();
                tracing::warn!(
                    session = %ticket.session,
                    round = ticket.round,
                    found,
                    "Model did not offer exactly {CHOICES_PER_ROUND} choices, terminating"
                );
                self.phase = Phase::Terminated(TerminationReason::InsufficientChoices);
                Ok(NarratorEvent::Aborted {
                    reason: AbortReason::InsufficientChoices,
                    partial_text: text,
                    found,
                })
            }
        }
    }

    /// Record the closing narration and terminate.
    pub fn complete_ending(
        &mut self,
        session: SessionId,
        text: String,
    ) -> Result<NarratorEvent, NarratorError> {
        let reason = match (&self.phase, &self.adventure) {
            (Phase::Ending(reason), Some(adventure)) if adventure.id == session => *reason,
            _ => return Err(self.stale(session, self.current_round())),
        };

        let adventure = self.adventure_mut("complete the ending")?;
        adventure.state.record_ending(&text);
        tracing::info!(session = %session, ?reason, "Adventure ended");
        self.phase = Phase::Terminated(TerminationReason::Completed(reason));

        Ok(NarratorEvent::Ended {
            final_text: text,
            reason,
        })
    }

    /// Run the next step of the adventure to completion.
    ///
    /// On a generation failure the adventure stays where it was (the round
    /// counter is not advanced twice) and the same call may be retried. A
    /// failed summary ends the adventure.
    pub async fn advance<G>(&mut self, generator: &G) -> Result<NarratorEvent, NarratorError>
    where
        G: TextGenerator + ?Sized,
    {
        match self.begin_round()? {
            RoundStep::Round(ticket) => self.run_round(generator, ticket).await,
            RoundStep::Ending(session, _) => self.run_ending(generator, session).await,
        }
    }

    /// Select a choice and narrate the following step.
    pub async fn choose<G>(
        &mut self,
        generator: &G,
        choice: &str,
    ) -> Result<NarratorEvent, NarratorError>
    where
        G: TextGenerator + ?Sized,
    {
        self.select_choice(choice)?;
        self.advance(generator).await
    }

    async fn run_round<G>(
        &mut self,
        generator: &G,
        mut ticket: RoundTicket,
    ) -> Result<NarratorEvent, NarratorError>
    where
        G: TextGenerator + ?Sized,
    {
        let timeout = self.config.generation_timeout;

        if ticket.needs_summary() {
            let summarizer = Summarizer::new(self.config.summary, timeout);
            let summary = summarizer
                .summarize(generator, self.ticket_state(&ticket)?)
                .await;
            match summary {
                Ok(summary) => ticket = self.apply_summary(&ticket, summary)?,
                Err(e) => {
                    self.fail_summary(&ticket)?;
                    return Err(NarratorError::SummaryFailed(e));
                }
            }
        }

        let prompt = build_prompt(self.ticket_state(&ticket)?, PromptKind::Continuation);
        let params = self.config.continuation;
        let text = generate_text(generator, &prompt, &params, timeout)
            .await
            .inspect_err(|e| {
                tracing::warn!(session = %ticket.session, round = ticket.round, error = %e, "Round generation failed");
            })?;

        self.complete_round(&ticket, text)
    }

    async fn run_ending<G>(
        &mut self,
        generator: &G,
        session: SessionId,
    ) -> Result<NarratorEvent, NarratorError>
    where
        G: TextGenerator + ?Sized,
    {
        let prompt = self
            .prompt(PromptKind::Ending)
            .ok_or_else(|| self.invalid("narrate the ending"))?;
        let params = self.config.ending;
        let text = generate_text(generator, &prompt, &params, self.config.generation_timeout)
            .await
            .inspect_err(|e| {
                tracing::warn!(session = %session, error = %e, "Ending generation failed");
            })?;

        self.complete_ending(session, text)
    }

    fn check_ticket(&self, ticket: &RoundTicket) -> Result<(), NarratorError> {
        match (&self.phase, &self.adventure) {
            (Phase::RoundInProgress(current), Some(adventure))
                if adventure.id == ticket.session && current.round == ticket.round =>
            {
                Ok(())
            }
            _ => Err(self.stale(ticket.session, ticket.round)),
        }
    }

    fn ticket_state(&self, ticket: &RoundTicket) -> Result<&StoryState, NarratorError> {
        self.check_ticket(ticket)?;
        self.state()
            .ok_or_else(|| self.stale(ticket.session, ticket.round))
    }

    fn stale(&self, session: SessionId, round: u32) -> NarratorError {
        tracing::warn!(session = %session, round, phase = self.phase.name(), "Discarding stale result");
        NarratorError::StaleResult { session, round }
    }

    fn invalid(&self, action: &'static str) -> NarratorError {
        NarratorError::InvalidTransition {
            action,
            phase: self.phase.name(),
        }
    }

    fn adventure_mut(&mut self, action: &'static str) -> Result<&mut Adventure, NarratorError> {
        let phase = self.phase.name();
        self.adventure
            .as_mut()
            .ok_or(NarratorError::InvalidTransition { action, phase })
    }

    fn live_adventure_mut(
        &mut self,
        action: &'static str,
    ) -> Result<&mut Adventure, NarratorError> {
        if !self.phase.is_live() {
            return Err(self.invalid(action));
        }
        self.adventure_mut(action)
    }
}

impl Default for Narrator {
    fn default() -> Self {
        Self::new(NarratorConfig::default())
    }
}
