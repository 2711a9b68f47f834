//! Extraction of player choices from generated narration.
//!
//! The narrator is asked to end every round with numbered choices
//! (`1. `, `2. `, `3. ` at the start of a line). Parsing is total: it never
//! fails and never invents missing choices. Deciding whether the number of
//! recovered choices is acceptable is left to the caller.

use serde::{Deserialize, Serialize};

/// Number of choices offered to the player each round.
pub const CHOICES_PER_ROUND: usize = 3;

/// A generated round split into narrative prose and choice lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedRound {
    /// Lines preceding the first choice, joined with single spaces.
    pub description: String,
    /// Choice lines in their original order, numbering included.
    pub choices: Vec<String>,
}

impl ParsedRound {
    /// Number of recovered choice lines.
    pub fn choice_count(&self) -> usize {
        self.choices.len()
    }

    /// The choices as a fixed triple, if exactly three were recovered.
    pub fn choice_triple(&self) -> Option<[String; CHOICES_PER_ROUND]> {
        <[String; CHOICES_PER_ROUND]>::try_from(self.choices.clone()).ok()
    }
}

/// Split generated text into a description and its numbered choices.
///
/// Lines are trimmed and blank lines dropped. A line is a choice when it
/// starts with a digit from 1 to 3, a period and whitespace. When no line
/// matches, the description is the whole text.
pub fn extract_choices(text: &str) -> ParsedRound {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let first_choice = lines.iter().position(|line| is_choice_line(line));

    let Some(first_choice) = first_choice else {
        return ParsedRound {
            description: text.to_string(),
            choices: Vec::new(),
        };
    };

    let choices = lines
        .iter()
        .filter(|line| is_choice_line(line))
        .map(|line| line.to_string())
        .collect();

    ParsedRound {
        description: lines[..first_choice].join(" "),
        choices,
    }
}

/// Whether a trimmed line opens with `1.`, `2.` or `3.` followed by whitespace.
pub fn is_choice_line(line: &str) -> bool {
    let mut chars = line.chars();
    matches!(
        (chars.next(), chars.next(), chars.next()),
        (Some('1'..='3'), Some('.'), Some(c)) if c.is_whitespace()
    )
}
