//! Line-oriented play loop.
//!
//! Protocol:
//! - `1`, `2` or `3` (or the full text of a choice) picks a choice
//! - Lines starting with `#` are commands (status, save, damage, retry, quit…)
//! - Tagged lines (`[TOUR n]`, `[STATUS]`, `[ERROR]`…) are output

use saga_core::{AdventureSession, NarratorEvent, SessionError, TextGenerator};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

/// Presentation settings.
#[derive(Debug, Clone)]
pub struct PlayOptions {
    /// Where the transcript is written at the end and on `#save`.
    pub transcript: PathBuf,
    /// Delay between revealed characters.
    pub reveal_delay: Duration,
}

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Choice(usize),
    ChoiceText(String),
    Status,
    Save(Option<PathBuf>),
    Damage(u32),
    Heal(u32),
    Retry,
    Restart(Option<String>),
    Help,
    Quit,
    Unknown(String),
}

/// Parse a non-empty, trimmed input line.
pub fn parse_input(line: &str) -> Input {
    let Some(command) = line.strip_prefix('#') else {
        return match line.parse::<usize>() {
            Ok(index) => Input::Choice(index),
            Err(_) => Input::ChoiceText(line.to_string()),
        };
    };

    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    let rest = (!rest.is_empty()).then_some(rest);

    match name {
        "quit" | "exit" => Input::Quit,
        "status" => Input::Status,
        "save" => Input::Save(rest.map(PathBuf::from)),
        "damage" => match rest.and_then(|r| r.parse().ok()) {
            Some(amount) => Input::Damage(amount),
            None => Input::Unknown(line.to_string()),
        },
        "heal" => match rest.and_then(|r| r.parse().ok()) {
            Some(amount) => Input::Heal(amount),
            None => Input::Unknown(line.to_string()),
        },
        "retry" => Input::Retry,
        "restart" => Input::Restart(rest.map(str::to_string)),
        "help" => Input::Help,
        _ => Input::Unknown(line.to_string()),
    }
}

/// Run an interactive adventure over stdin/stdout.
pub async fn run<G: TextGenerator>(
    mut session: AdventureSession<G>,
    premise: Option<String>,
    options: PlayOptions,
) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    println!("=== Saga ===");
    print_help();
    println!();

    let premise = match premise {
        Some(premise) => premise,
        None => {
            println!("Décris le point de départ de ton aventure :");
            match read_non_empty(&mut lines)? {
                Some(premise) => premise,
                None => return Ok(()),
            }
        }
    };

    let outcome = session.begin(&premise).await;
    report(&session, outcome, &options).await;

    while let Some(line) = read_non_empty(&mut lines)? {
        match parse_input(&line) {
            Input::Quit => {
                println!("Au revoir !");
                break;
            }
            Input::Help => print_help(),
            Input::Status => print_status(&session),
            Input::Save(path) => {
                let path = path.unwrap_or_else(|| options.transcript.clone());
                match session.save_transcript(&path).await {
                    Ok(()) => println!("[SAVED] {}", path.display()),
                    Err(e) => println!("[ERROR] Save failed: {e}"),
                }
            }
            Input::Damage(amount) => match session.apply_damage(amount) {
                Ok(vitality) => {
                    println!("[STATUS] Vitalité : {vitality}");
                    if vitality.is_depleted() {
                        let outcome = session.advance().await;
                        report(&session, outcome, &options).await;
                    }
                }
                Err(e) => println!("[ERROR] {e}"),
            },
            Input::Heal(amount) => match session.heal(amount) {
                Ok(vitality) => println!("[STATUS] Vitalité : {vitality}"),
                Err(e) => println!("[ERROR] {e}"),
            },
            Input::Retry => {
                let outcome = session.advance().await;
                report(&session, outcome, &options).await;
            }
            Input::Restart(new_premise) => {
                session.abandon();
                let premise = new_premise.unwrap_or_else(|| premise.clone());
                let outcome = session.begin(&premise).await;
                report(&session, outcome, &options).await;
            }
            Input::Choice(index) => {
                let outcome = session.choose(index).await;
                report(&session, outcome, &options).await;
            }
            Input::ChoiceText(text) => {
                let outcome = session.choose_text(&text).await;
                report(&session, outcome, &options).await;
            }
            Input::Unknown(line) => {
                println!("[ERROR] Unknown command '{line}'. Type #help for help.")
            }
        }
        io::stdout().flush().ok();
    }

    Ok(())
}

fn read_non_empty(
    lines: &mut impl Iterator<Item = io::Result<String>>,
) -> io::Result<Option<String>> {
    for line in lines {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            return Ok(Some(line.to_string()));
        }
    }
    Ok(None)
}

async fn report<G: TextGenerator>(
    session: &AdventureSession<G>,
    outcome: Result<NarratorEvent, SessionError>,
    options: &PlayOptions,
) {
    let event = match outcome {
        Ok(event) => event,
        Err(e) => {
            println!("[ERROR] {e}");
            if e.is_retryable() {
                println!("Type #retry to try again.");
            } else if session.narrator().is_terminated() {
                finish(session, options).await;
            }
            return;
        }
    };

    match event {
        NarratorEvent::Round {
            round,
            narrative,
            choices,
            turns_left,
        } => {
            println!("[TOUR {round}]");
            reveal(&narrative, options.reveal_delay).await;
            for choice in &choices {
                println!("  {choice}");
            }
            let vitality = session
                .narrator()
                .vitality()
                .map(|v| v.to_string())
                .unwrap_or_default();
            println!("[STATUS] Tours restants : {turns_left} | Vitalité : {vitality}");
        }
        NarratorEvent::Ended { final_text, .. } => {
            println!("[FIN]");
            reveal(&final_text, options.reveal_delay).await;
            finish(session, options).await;
        }
        NarratorEvent::Aborted { partial_text, .. } => {
            println!("[FIN]");
            reveal(&partial_text, options.reveal_delay).await;
            finish(session, options).await;
        }
    }
}

async fn finish<G: TextGenerator>(session: &AdventureSession<G>, options: &PlayOptions) {
    if let Some(reason) = session.narrator().termination_reason() {
        println!("[END] {reason}");
    }
    match session.save_transcript(&options.transcript).await {
        Ok(()) => println!("[SAVED] {}", options.transcript.display()),
        Err(e) => println!("[ERROR] Save failed: {e}"),
    }
    println!("Type #restart [premise] for a new adventure or #quit to leave.");
}

/// Print text one character at a time.
async fn reveal(text: &str, delay: Duration) {
    let mut stdout = io::stdout();
    if delay.is_zero() {
        println!("{text}");
        return;
    }
    for c in text.chars() {
        print!("{c}");
        stdout.flush().ok();
        tokio::time::sleep(delay).await;
    }
    println!();
}

fn print_status<G: TextGenerator>(session: &AdventureSession<G>) {
    let narrator = session.narrator();
    println!("[STATUS]");
    println!("  Phase: {}", narrator.phase().name());
    if let Some(state) = narrator.state() {
        println!("  Tour : {}/{}", state.current_round(), state.max_rounds());
        println!("  Tours restants : {}", state.turns_left());
        println!("  Vitalité : {}", state.vitality());
        println!("  Résumé : {}", state.summary_context());
    }
    if let Some(choices) = narrator.choices() {
        for choice in choices {
            println!("  {choice}");
        }
    }
}

fn print_help() {
    println!("Commands:");
    println!("  1, 2, 3          - Pick a choice");
    println!("  #status          - Show the adventure state");
    println!("  #save [path]     - Save the transcript");
    println!("  #damage <n>      - Inflict damage");
    println!("  #heal <n>        - Restore vitality");
    println!("  #retry           - Retry after a failed generation");
    println!("  #restart [text]  - Start over, optionally with a new premise");
    println!("  #quit            - Exit");
}
