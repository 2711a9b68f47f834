//! Prompt templates for the narrator.
//!
//! Prompts are a pure function of the story state: the same state always
//! yields the same text.

use crate::generation::Prompt;
use crate::story::StoryState;
use serde::{Deserialize, Serialize};

/// The three requests the narrator makes of the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptKind {
    /// Continue the story and offer three numbered choices.
    Continuation,
    /// Close the story, no choices.
    Ending,
    /// Compress the running summary, no choices.
    Summary,
}

/// Build the prompt of the given kind for the current state.
pub fn build_prompt(state: &StoryState, kind: PromptKind) -> Prompt {
    let content = match kind {
        PromptKind::Continuation => continuation(state),
        PromptKind::Ending => ending(state),
        PromptKind::Summary => summary(state),
    };
    Prompt::narrator(content)
}

fn continuation(state: &StoryState) -> String {
    format!(
        "Contexte initial : {initial}\n\
         \n\
         Résumé actuel : {summary}\n\
         \n\
         Raconte la suite de l'histoire en 5 lignes maximum, puis donne EXACTEMENT 3 choix numérotés, \
         chacun sur sa propre ligne commençant par « 1. », « 2. » puis « 3. ».\n\
         Ne donne rien d'autre, pas de conclusion, pas de redite.",
        initial = state.initial_context(),
        summary = state.summary_context(),
    )
}

fn ending(state: &StoryState) -> String {
    format!(
        "Résumé final : {summary}\n\
         \n\
         Conclus l'histoire de manière cohérente en 5 lignes maximum, sans proposer de choix.",
        summary = state.summary_context(),
    )
}

fn summary(state: &StoryState) -> String {
    format!(
        "Voici un résumé de l'histoire jusqu'ici :\n\
         {summary}\n\
         \n\
         Résume-la en 3 phrases maximum, tout en maintenant la continuité de l'histoire. \
         Ne propose aucun choix.",
        summary = state.summary_context(),
    )
}
