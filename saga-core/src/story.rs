//! Story state threaded through an adventure.
//!
//! `StoryState` is owned by a single [`Narrator`](crate::Narrator); other
//! components only read it. Every history mutation goes through
//! [`Transcript`], which can only grow.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Header opening the transcript.
pub const LAUNCH_MARKER: &str = "--- Lancement ---";

/// Header preceding each automatic summary.
pub const SUMMARY_MARKER: &str = "--- Résumé automatique ---";

/// Header preceding the closing narration.
pub const ENDING_MARKER: &str = "--- Fin de l'aventure ---";

/// Prefix of a recorded player choice.
pub const CHOICE_PREFIX: &str = "Choix du joueur : ";

/// Header preceding the narration of round `round`.
pub fn round_marker(round: u32) -> String {
    format!("--- Tour {round} ---")
}

/// Append-only plain-text log of an adventure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript(String);

impl Transcript {
    /// Create an empty transcript.
    pub fn new() -> Self {
        Self(String::new())
    }

    /// Append a headed section followed by a blank line.
    pub fn push_section(&mut self, header: &str, body: &str) {
        self.0.push_str(header);
        self.0.push('\n');
        self.0.push_str(body);
        self.0.push_str("\n\n");
    }

    /// Append a single line followed by a blank line.
    pub fn push_line(&mut self, line: &str) {
        self.0.push_str(line);
        self.0.push_str("\n\n");
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A bounded resource whose depletion ends the adventure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Vitality(u8);

impl Vitality {
    pub const MAX: u8 = 100;

    /// Full vitality.
    pub fn full() -> Self {
        Self(Self::MAX)
    }

    /// Vitality clamped into `0..=100`.
    pub fn new(value: u32) -> Self {
        Self(value.min(u32::from(Self::MAX)) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_depleted(self) -> bool {
        self.0 == 0
    }

    /// Vitality after taking `amount` damage, saturating at zero.
    pub fn damaged(self, amount: u32) -> Self {
        Self::new(u32::from(self.0).saturating_sub(amount))
    }

    /// Vitality after recovering `amount`, saturating at the maximum.
    pub fn healed(self, amount: u32) -> Self {
        Self::new(u32::from(self.0).saturating_add(amount))
    }
}

impl Default for Vitality {
    fn default() -> Self {
        Self::full()
    }
}

impl fmt::Display for Vitality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// The mutable record of one adventure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryState {
    initial_context: String,
    summary_context: String,
    full_history: Transcript,
    current_round: u32,
    max_rounds: u32,
    vitality: Vitality,
}

impl StoryState {
    /// Open a new story from the player's premise.
    ///
    /// The summary starts out as the premise itself and the transcript opens
    /// with the launch record.
    pub fn new(initial_context: impl Into<String>, max_rounds: u32) -> Self {
        let initial_context = initial_context.into();
        let mut full_history = Transcript::new();
        full_history.push_section(
            LAUNCH_MARKER,
            &format!("Histoire initiale : {initial_context}"),
        );

        Self {
            summary_context: initial_context.clone(),
            initial_context,
            full_history,
            current_round: 0,
            max_rounds,
            vitality: Vitality::full(),
        }
    }

    pub fn initial_context(&self) -> &str {
        &self.initial_context
    }

    pub fn summary_context(&self) -> &str {
        &self.summary_context
    }

    pub fn full_history(&self) -> &Transcript {
        &self.full_history
    }

    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    pub fn vitality(&self) -> Vitality {
        self.vitality
    }

    /// Rounds remaining before the ending, never negative.
    pub fn turns_left(&self) -> u32 {
        self.max_rounds.saturating_sub(self.current_round)
    }

    /// Whether the current round lies past the round limit.
    pub fn round_limit_reached(&self) -> bool {
        self.current_round > self.max_rounds
    }

    pub(crate) fn advance_round(&mut self) -> u32 {
        self.current_round += 1;
        self.current_round
    }

    pub(crate) fn record_round(&mut self, round: u32, text: &str) {
        self.full_history.push_section(&round_marker(round), text);
    }

    /// Replace the running summary and log it.
    pub(crate) fn record_summary(&mut self, summary: String) {
        self.full_history.push_section(SUMMARY_MARKER, &summary);
        self.summary_context = summary;
    }

    pub(crate) fn record_choice(&mut self, choice: &str) {
        self.full_history
            .push_line(&format!("{CHOICE_PREFIX}{choice}"));
    }

    pub(crate) fn record_ending(&mut self, text: &str) {
        self.full_history.push_section(ENDING_MARKER, text);
    }

    pub(crate) fn set_vitality(&mut self, vitality: Vitality) {
        self.vitality = vitality;
    }
}
