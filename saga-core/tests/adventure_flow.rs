//! Scripted end-to-end adventures.
//!
//! These run the narrator against `ScriptedGenerator`, so they need no model
//! server and are deterministic.

use saga_core::testing::{
    assert_awaiting_choice, assert_history_contains, assert_history_lacks, assert_phase,
    assert_terminated, ScriptedReply, TestHarness,
};
use saga_core::{
    AbortReason, EndReason, GenerationError, GenerationParams, NarratorConfig, NarratorError,
    NarratorEvent, TerminationReason,
};
use std::time::Duration;

#[tokio::test]
async fn test_full_adventure_with_summary() {
    let mut harness = TestHarness::new("Un dragon garde un pont", 3);
    harness
        .expect_round("Le dragon ouvre un œil.", ["Parler", "Attaquer", "Fuir"])
        .expect_round("Il répond par une énigme.", ["Répondre", "Se taire", "Rire"])
        .expect_text("Le héros a parlé au dragon, qui pose des énigmes.")
        .expect_round("La réponse le surprend.", ["Insister", "Partir", "Saluer"])
        .expect_text("Le dragon laisse passer le héros. Fin.");

    let first = harness.advance().await.unwrap();
    assert!(matches!(first, NarratorEvent::Round { round: 1, turns_left: 2, .. }));
    let second = harness.choose(1).await.unwrap();
    assert!(matches!(second, NarratorEvent::Round { round: 2, turns_left: 1, .. }));
    let third = harness.choose(1).await.unwrap();
    assert!(matches!(third, NarratorEvent::Round { round: 3, turns_left: 0, .. }));
    assert_eq!(
        harness.summary(),
        "Le héros a parlé au dragon, qui pose des énigmes."
    );

    let ending = harness.choose(3).await.unwrap();
    assert_eq!(
        ending,
        NarratorEvent::Ended {
            final_text: "Le dragon laisse passer le héros. Fin.".to_string(),
            reason: EndReason::RoundLimit,
        }
    );
    assert_terminated(&harness, TerminationReason::Completed(EndReason::RoundLimit));
    assert_eq!(harness.narrator.current_round(), 4);

    let params: Vec<GenerationParams> = harness.generator.calls().iter().map(|c| c.params).collect();
    assert_eq!(
        params,
        vec![
            GenerationParams::continuation(),
            GenerationParams::continuation(),
            GenerationParams::summary(),
            GenerationParams::continuation(),
            GenerationParams::ending(),
        ]
    );

    let history = harness.history();
    let order = [
        "--- Lancement ---\nHistoire initiale : Un dragon garde un pont\n\n",
        "--- Tour 1 ---\nLe dragon ouvre un œil.",
        "Choix du joueur : 1. Parler\n\n",
        "--- Tour 2 ---\n",
        "Choix du joueur : 1. Répondre\n\n",
        "--- Résumé automatique ---\nLe héros a parlé au dragon",
        "--- Tour 3 ---\n",
        "Choix du joueur : 3. Saluer\n\n",
        "--- Fin de l'aventure ---\nLe dragon laisse passer le héros. Fin.\n\n",
    ];
    let mut cursor = 0;
    for section in order {
        let found = history[cursor..]
            .find(section)
            .unwrap_or_else(|| panic!("'{section}' missing or out of order in:\n{history}"));
        cursor += found + section.len();
    }
    assert_eq!(cursor, history.len());
}

#[tokio::test]
async fn test_insufficient_choices_on_last_round() {
    let mut harness = TestHarness::new("Une forêt maudite", 3);
    harness
        .expect_round("Les arbres murmurent.", ["Écouter", "Courir", "Chanter"])
        .expect_round("Un sentier apparaît.", ["Suivre", "Ignorer", "Marquer"])
        .expect_text("Résumé de la forêt.")
        .expect_text("Le sentier se divise.\n1. Gauche\n2. Droite");

    harness.advance().await.unwrap();
    harness.choose(2).await.unwrap();
    let event = harness.choose(1).await.unwrap();

    assert_eq!(
        event,
        NarratorEvent::Aborted {
            reason: AbortReason::InsufficientChoices,
            partial_text: "Le sentier se divise.\n1. Gauche\n2. Droite".to_string(),
            found: 2,
        }
    );
    assert_terminated(&harness, TerminationReason::InsufficientChoices);
    assert_history_contains(&harness, "--- Tour 3 ---\nLe sentier se divise.");
    assert_history_lacks(&harness, "--- Tour 4 ---");
    assert_history_lacks(&harness, "--- Fin de l'aventure ---");
    assert_eq!(harness.narrator.current_round(), 3);
    assert_eq!(
        harness.narrator.termination_reason().unwrap().to_string(),
        "Fin de l'aventure : L'IA n'a pas pu fournir 3 choix."
    );

    let err = harness.advance().await.unwrap_err();
    assert!(matches!(err, NarratorError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_too_many_choices_terminates() {
    let mut harness = TestHarness::new("Un carrefour", 3);
    let text = "Quatre routes partent d'ici.\n1. Nord\n2. Sud\n3. Est\n1. Ouest";
    harness.expect_text(text);

    let event = harness.advance().await.unwrap();

    assert_eq!(
        event,
        NarratorEvent::Aborted {
            reason: AbortReason::InsufficientChoices,
            partial_text: text.to_string(),
            found: 4,
        }
    );
    assert_terminated(&harness, TerminationReason::InsufficientChoices);
    assert_history_contains(&harness, "--- Tour 1 ---\nQuatre routes partent d'ici.");
}

#[tokio::test]
async fn test_ending_failure_is_retryable() {
    let mut harness = TestHarness::new("Un dernier voyage", 1);
    harness
        .expect_round("Le navire appareille.", ["Ramer", "Hisser", "Dormir"])
        .expect_error("server overloaded")
        .expect_text("Le navire atteint le port.");

    harness.advance().await.unwrap();
    let err = harness.choose(1).await.unwrap_err();
    assert!(err.is_retryable());
    assert_phase(&harness, "ending");
    assert_eq!(harness.narrator.current_round(), 2);
    assert_history_lacks(&harness, "--- Fin de l'aventure ---");

    let event = harness.advance().await.unwrap();
    assert_eq!(
        event,
        NarratorEvent::Ended {
            final_text: "Le navire atteint le port.".to_string(),
            reason: EndReason::RoundLimit,
        }
    );
    assert_eq!(harness.narrator.current_round(), 2);
    assert_terminated(&harness, TerminationReason::Completed(EndReason::RoundLimit));
    assert_eq!(harness.history().matches("--- Fin de l'aventure ---").count(), 1);
}

#[tokio::test]
async fn test_summary_feeds_later_prompts() {
    let mut harness = TestHarness::new("Un sous-marin perdu", 6);
    for round in 1..=3 {
        if round == 3 {
            harness.expect_text("RÉSUMÉ-TROIS");
        }
        harness.expect_round(&format!("Tour {round}."), ["a", "b", "c"]);
    }
    harness.expect_round("Tour 4.", ["a", "b", "c"]);

    harness.advance().await.unwrap();
    for _ in 2..=4 {
        harness.choose(1).await.unwrap();
    }
    assert_awaiting_choice(&harness, 4);

    let calls = harness.generator.calls();
    assert_eq!(calls.len(), 5);
    assert!(calls[0].prompt.user_content.contains("Résumé actuel : Un sous-marin perdu"));
    assert_eq!(calls[2].params, GenerationParams::summary());
    assert!(calls[3].prompt.user_content.contains("Résumé actuel : RÉSUMÉ-TROIS"));
    assert!(calls[4].prompt.user_content.contains("Résumé actuel : RÉSUMÉ-TROIS"));
    assert!(calls[4]
        .prompt
        .user_content
        .contains("Contexte initial : Un sous-marin perdu"));
}

#[tokio::test]
async fn test_round_limit_takes_priority_over_summary() {
    let mut harness = TestHarness::new("Un duel au soleil", 2);
    harness
        .expect_round("Premier tir.", ["a", "b", "c"])
        .expect_round("Second tir.", ["a", "b", "c"])
        .expect_text("Le duel s'achève.");

    harness.advance().await.unwrap();
    harness.choose(1).await.unwrap();
    let event = harness.choose(2).await.unwrap();

    assert!(matches!(
        event,
        NarratorEvent::Ended {
            reason: EndReason::RoundLimit,
            ..
        }
    ));
    assert!(harness
        .generator
        .calls()
        .iter()
        .all(|c| c.params != GenerationParams::summary()));
    assert_history_lacks(&harness, "--- Résumé automatique ---");
}

#[tokio::test]
async fn test_summary_failure_terminates() {
    let mut harness = TestHarness::new("Une tour de verre", 5);
    harness
        .expect_round("Un.", ["a", "b", "c"])
        .expect_round("Deux.", ["a", "b", "c"])
        .expect_error("model crashed");

    harness.advance().await.unwrap();
    harness.choose(1).await.unwrap();
    let err = harness.choose(1).await.unwrap_err();

    assert!(matches!(err, NarratorError::SummaryFailed(_)));
    assert!(!err.is_retryable());
    assert_terminated(&harness, TerminationReason::SummaryFailed);
    assert_history_lacks(&harness, "--- Tour 3 ---");
}

#[tokio::test]
async fn test_summary_not_repeated_when_round_retried() {
    let mut harness = TestHarness::new("Un train de nuit", 4);
    harness
        .expect_round("Un.", ["a", "b", "c"])
        .expect_round("Deux.", ["a", "b", "c"])
        .expect_text("Résumé du train.")
        .expect_error("connection reset")
        .expect_round("Trois.", ["a", "b", "c"]);

    harness.advance().await.unwrap();
    harness.choose(1).await.unwrap();
    assert!(harness.choose(1).await.unwrap_err().is_retryable());
    assert_phase(&harness, "a round is in progress");

    harness.advance().await.unwrap();
    assert_awaiting_choice(&harness, 3);
    assert_eq!(harness.history().matches("--- Résumé automatique ---").count(), 1);
    assert_eq!(harness.generator.call_count(), 5);
}

#[tokio::test]
async fn test_damage_ends_adventure_mid_way() {
    let mut harness = TestHarness::new("Une arène", 5);
    harness
        .expect_round("Un lion entre.", ["Combattre", "Esquiver", "Prier"])
        .expect_text("Le héros tombe sous les griffes.");

    harness.advance().await.unwrap();
    harness.narrator.apply_damage(60).unwrap();
    assert_awaiting_choice(&harness, 1);
    harness.narrator.apply_damage(60).unwrap();
    assert_phase(&harness, "ending");

    assert!(harness.narrator.select_index(1).is_err());
    let event = harness.advance().await.unwrap();
    assert!(matches!(
        event,
        NarratorEvent::Ended {
            reason: EndReason::VitalityZero,
            ..
        }
    ));
    assert_eq!(harness.narrator.vitality().unwrap().value(), 0);
    assert_history_contains(&harness, "--- Fin de l'aventure ---\nLe héros tombe sous les griffes.");
}

#[tokio::test]
async fn test_restart_after_termination() {
    let mut harness = TestHarness::new("Premier conte", 1);
    harness
        .expect_round("Un.", ["a", "b", "c"])
        .expect_text("Fin du premier.");

    harness.advance().await.unwrap();
    harness.choose(1).await.unwrap();
    let first = harness.narrator.session_id().unwrap();

    let second = harness.narrator.start("Second conte", 2).unwrap();
    assert_ne!(first, second);
    assert_phase(&harness, "running");
    assert_eq!(harness.narrator.current_round(), 0);
    assert_history_lacks(&harness, "Premier conte");
}

#[tokio::test(start_paused = true)]
async fn test_generation_timeout_is_retryable() {
    let config = NarratorConfig::default().with_generation_timeout(Duration::from_secs(5));
    let mut harness = TestHarness::with_config(config, "Un phare isolé", 3);
    harness.generator.push(ScriptedReply::Hang);
    harness.expect_round("La lumière vacille.", ["a", "b", "c"]);

    let err = harness.advance().await.unwrap_err();
    assert!(matches!(
        err,
        NarratorError::Generation(GenerationError::Timeout(_))
    ));
    assert!(err.is_retryable());
    assert_eq!(harness.narrator.current_round(), 1);
    assert_history_lacks(&harness, "--- Tour 1 ---");

    harness.advance().await.unwrap();
    assert_awaiting_choice(&harness, 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_advance_leaves_round_pending() {
    let mut harness = TestHarness::new("Une caravane", 3);
    harness.generator.push(ScriptedReply::Delayed(
        Duration::from_secs(30),
        "Trop tard.\n1. a\n2. b\n3. c".to_string(),
    ));
    harness.expect_round("À temps.", ["a", "b", "c"]);

    let history_before = harness.history().len();
    let outcome = tokio::time::timeout(Duration::from_secs(1), harness.advance()).await;
    assert!(outcome.is_err());

    assert_phase(&harness, "a round is in progress");
    assert_eq!(harness.history().len(), history_before);

    harness.advance().await.unwrap();
    assert_history_contains(&harness, "--- Tour 1 ---\nÀ temps.");
    assert_history_lacks(&harness, "Trop tard.");
    assert_eq!(harness.narrator.current_round(), 1);
}

#[tokio::test]
async fn test_streaming_and_complete_give_same_round() {
    let text = "Le vent se lève.\n1. Hisser la voile\n2. Jeter l'ancre\n3. Prier";

    let mut streamed = TestHarness::new("Un voilier", 3);
    streamed.expect_text(text);

    let mut config = NarratorConfig::default();
    config.continuation.stream = false;
    let mut complete = TestHarness::with_config(config, "Un voilier", 3);
    complete.expect_text(text);

    assert_eq!(
        streamed.advance().await.unwrap(),
        complete.advance().await.unwrap()
    );
    assert_eq!(streamed.history(), complete.history());
}

#[tokio::test]
async fn test_history_never_shrinks() {
    let mut harness = TestHarness::new("Une mine abandonnée", 4);
    harness
        .expect_round("Un.", ["a", "b", "c"])
        .expect_error("flaky")
        .expect_round("Deux.", ["a", "b", "c"])
        .expect_text("Résumé.")
        .expect_round("Trois.", ["a", "b", "c"])
        .expect_round("Quatre.", ["a", "b", "c"])
        .expect_text("Fin.");

    let mut last = harness.history().len();
    let mut check = |harness: &TestHarness| {
        let now = harness.history().len();
        assert!(now >= last, "history shrank from {last} to {now}");
        last = now;
    };

    harness.advance().await.unwrap();
    check(&harness);
    let _ = harness.choose(1).await;
    check(&harness);
    harness.advance().await.unwrap();
    check(&harness);
    for _ in 0..3 {
        harness.choose(2).await.unwrap();
        check(&harness);
    }
    assert!(harness.narrator.is_terminated());
}
