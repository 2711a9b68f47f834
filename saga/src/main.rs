//! Terminal front end for AI-narrated adventures.
//!
//! Point it at any OpenAI-compatible server (a local llama.cpp, vLLM or
//! Ollama works) and describe a premise:
//!
//! ```bash
//! SAGA_API_BASE=http://localhost:11434/v1 cargo run -p saga -- --rounds 5 "Un pirate sans navire"
//! ```

mod play;

use clap::Parser;
use saga_core::session::{DEFAULT_MAX_ROUNDS, DEFAULT_TRANSCRIPT_FILE};
use saga_core::{AdventureSession, NarratorConfig, SessionConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "saga",
    about = "Choose-your-path adventures narrated by a language model",
    version
)]
struct Cli {
    /// Premise of the adventure (read from stdin when omitted)
    premise: Vec<String>,

    /// Rounds before the ending
    #[arg(short, long, default_value_t = DEFAULT_MAX_ROUNDS, value_parser = clap::value_parser!(u32).range(1..))]
    rounds: u32,

    /// Model name (overrides SAGA_MODEL)
    #[arg(short, long)]
    model: Option<String>,

    /// API base URL (overrides SAGA_API_BASE)
    #[arg(long)]
    base_url: Option<String>,

    /// File the transcript is written to
    #[arg(short, long, default_value = DEFAULT_TRANSCRIPT_FILE)]
    transcript: PathBuf,

    /// Delay between revealed characters, 0 to print at once
    #[arg(long, default_value_t = 20)]
    reveal_delay_ms: u64,

    /// Rounds between automatic summaries
    #[arg(long, default_value_t = saga_core::narrator::DEFAULT_SUMMARY_INTERVAL)]
    summary_interval: u32,

    /// Seconds allowed for each generation
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let narrator = NarratorConfig::default()
        .with_summary_interval(cli.summary_interval)
        .with_generation_timeout(Duration::from_secs(cli.timeout_secs));
    let mut config = SessionConfig::new()
        .with_max_rounds(cli.rounds)
        .with_narrator(narrator);
    if let Some(model) = cli.model {
        config = config.with_model(model);
    }
    if let Some(base_url) = cli.base_url {
        config = config.with_base_url(base_url);
    }

    let session = AdventureSession::from_env(config);
    tracing::info!(
        base_url = session.generator().base_url(),
        model = session.generator().model(),
        "Starting saga"
    );

    let premise = (!cli.premise.is_empty()).then(|| cli.premise.join(" "));
    let options = play::PlayOptions {
        transcript: cli.transcript,
        reveal_delay: Duration::from_millis(cli.reveal_delay_ms),
    };

    play::run(session, premise, options).await
}
