//! Turn-based interactive fiction narrated by a language model.
//!
//! This crate provides:
//! - A narrator state machine that runs bounded adventures round by round
//! - Extraction of the three numbered choices offered each round
//! - Periodic summaries that keep prompts bounded
//! - A model-agnostic generation boundary, implemented for OpenAI-compatible servers
//!
//! # Quick Start
//!
//! ```ignore
//! use saga_core::{AdventureSession, NarratorEvent, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::new().with_max_rounds(5);
//!     let mut session = AdventureSession::from_env(config);
//!
//!     let event = session.begin("Un marchand perdu dans le désert").await?;
//!     if let NarratorEvent::Round { narrative, choices, .. } = event {
//!         println!("{narrative}");
//!         for choice in &choices {
//!             println!("{choice}");
//!         }
//!     }
//!
//!     session.choose(2).await?;
//!     session.save_transcript("save_rpg_ia.txt").await?;
//!     Ok(())
//! }
//! ```

pub mod choices;
pub mod generation;
pub mod narrator;
pub mod prompts;
pub mod session;
pub mod story;
pub mod summarizer;
pub mod testing;

// Primary public API
pub use choices::{extract_choices, ParsedRound, CHOICES_PER_ROUND};
pub use generation::{Generation, GenerationError, GenerationParams, Prompt, TextGenerator};
pub use narrator::{
    AbortReason, EndReason, Narrator, NarratorConfig, NarratorError, NarratorEvent, Phase,
    RoundStep, RoundTicket, SessionId, TerminationReason,
};
pub use prompts::{build_prompt, PromptKind};
pub use session::{AdventureSession, SessionConfig, SessionError};
pub use story::{StoryState, Transcript, Vitality};
pub use summarizer::Summarizer;
pub use testing::{ScriptedGenerator, TestHarness};
