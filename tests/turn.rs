//! Turn controller integration tests
//!
//! Drives the full wake, record, hand-off cycle against scripted audio and
//! a scripted recognizer; no hardware or network involved

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use pibot_voice::config::DEFAULT_NOT_UNDERSTOOD;
use pibot_voice::voice::scripted::{ScriptedEvent, ScriptedRecognizer, SessionScript};
use pibot_voice::voice::{CommandTag, WakeWordEntry};
use pibot_voice::{CycleOutcome, EngineConfig, Error, RecordingEnd, TurnState, TurnTransition};

mod common;
use common::{RecordingHandler, Rig, fast_config};

#[tokio::test]
async fn test_recording_ends_after_trailing_silence() {
    let rig = Rig::new(fast_config(), ScriptedRecognizer::new());
    rig.source
        .push_level(100, 20)
        .push_level(1000, 30)
        .push_level(100, 15);

    let recording = rig
        .controller
        .record_command(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(recording.end, RecordingEnd::TrailingSilence);
    assert_eq!(recording.frames.len(), 40);
    assert!(recording.frames[..30].iter().all(|f| f.level() >= 1000.0));
    assert!(recording.frames[30..].iter().all(|f| f.level() < 300.0));
    // The rest of the trailing silence was never read
    assert_eq!(rig.source.remaining(), 5);
    assert_eq!(rig.recognizer.frames_received(), 60);
    // Empty text with frames is "not understood", not an error
    assert!(!recording.is_understood());
}

#[tokio::test]
async fn test_no_speech_returns_nothing() {
    let recognizer =
        ScriptedRecognizer::new().then(SessionScript::new().partial(10, "嗯").partial(30, "嗯嗯"));
    let rig = Rig::new(fast_config(), recognizer);
    rig.source.push_level(200, 80);

    let recording = rig
        .controller
        .record_command(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(recording.end, RecordingEnd::NoSpeech);
    assert_eq!(recording.text, "");
    assert!(recording.frames.is_empty());
    assert_eq!(rig.recognizer.frames_received(), 50);
    assert!(!rig.source.is_open());
    assert_eq!(rig.recognizer.active(), 0);
}

#[tokio::test]
async fn test_wake_partial_and_final_activate_once() {
    let recognizer = ScriptedRecognizer::new()
        .then(
            SessionScript::new()
                .partial(2, "你好机器人")
                .final_text(2, "你好机器人。"),
        )
        .then(SessionScript::new().partial(3, "向前").final_text(4, "向前走"))
        .deliver_from_thread();
    let rig = Rig::new(fast_config(), recognizer);
    // Loud throughout, so only the recognizer can end the recording
    rig.source.push_level(1000, 100);
    let mut transitions = rig.controller.subscribe();

    let outcome = rig
        .controller
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, CycleOutcome::Handled(CommandTag::Chat));

    let mut seen = Vec::new();
    while let Ok(t) = transitions.try_recv() {
        seen.push(t);
    }
    assert_eq!(
        seen,
        vec![
            TurnTransition {
                from: TurnState::WaitingForWake,
                to: TurnState::Awake
            },
            TurnTransition {
                from: TurnState::Awake,
                to: TurnState::RecordingCommand
            },
            TurnTransition {
                from: TurnState::RecordingCommand,
                to: TurnState::Processing
            },
            TurnTransition {
                from: TurnState::Processing,
                to: TurnState::WaitingForWake
            },
        ]
    );
    assert_eq!(
        seen.iter()
            .filter(|t| t.from == TurnState::WaitingForWake)
            .count(),
        1
    );

    let commands = rig.handler.commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].tag, CommandTag::Chat);
    assert_eq!(commands[0].text, "向前走");
    // Callbacks trail the audio, so a few extra frames may be kept
    let kept = commands[0].frames.len();
    assert!(kept >= 4, "kept {kept} frames");
    assert_eq!(
        commands[0].duration,
        Duration::from_millis(100 * u64::try_from(kept).unwrap())
    );

    assert_eq!(rig.prompter.spoken(), vec!["你好，请提问：".to_string()]);
    assert_eq!(rig.recognizer.opened(), 2);
    assert_eq!(rig.recognizer.max_concurrent(), 1);
    assert!(!rig.source.is_open());
}

#[tokio::test]
async fn test_restart_budget_is_bounded() {
    let config = EngineConfig {
        max_restarts: 3,
        ..fast_config()
    };
    let recognizer = ScriptedRecognizer::new()
        .otherwise(SessionScript::new().final_text(2, "今天天气不错"));
    let rig = Rig::new(config, recognizer);

    let wake = rig
        .controller
        .wait_for_wake(&CancellationToken::new())
        .await
        .unwrap();

    assert!(wake.is_none());
    assert_eq!(rig.recognizer.opened(), 4);
    assert_eq!(rig.recognizer.max_concurrent(), 1);
    assert_eq!(rig.recognizer.active(), 0);
    assert!(!rig.source.is_open());
}

#[tokio::test]
async fn test_restart_keeps_listening_until_match() {
    let recognizer = ScriptedRecognizer::new()
        .then(SessionScript::new().final_text(3, "今天天气不错"))
        .then(SessionScript::new().final_text(3, ""))
        .then(SessionScript::new().partial(2, "机器人出发"));
    let rig = Rig::new(fast_config(), recognizer);

    let wake = rig
        .controller
        .wait_for_wake(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(wake.tag, CommandTag::Move);
    assert_eq!(rig.recognizer.opened(), 3);
    assert_eq!(rig.recognizer.frames_received(), 8);
    assert!(
        rig.recognizer
            .configs()
            .iter()
            .all(|c| !c.inverse_text_normalization)
    );
}

#[tokio::test]
async fn test_first_registered_phrase_wins() {
    let words = vec![
        WakeWordEntry::new("机器人", CommandTag::Chat).without_command(),
        WakeWordEntry::new("机器人出发", CommandTag::Move),
    ];
    let recognizer = ScriptedRecognizer::new().then(SessionScript::new().partial(1, "机器人出发"));
    let rig = Rig::with_parts(fast_config(), words, recognizer, RecordingHandler::default());

    let wake = rig
        .controller
        .wait_for_wake(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wake.tag, CommandTag::Chat);
    assert_eq!(wake.phrase, "机器人");
}

#[tokio::test]
async fn test_phrase_without_command_skips_recording() {
    let recognizer =
        ScriptedRecognizer::new().then(SessionScript::new().final_text(2, "机器人这是什么？"));
    let rig = Rig::new(fast_config(), recognizer);

    let outcome = rig
        .controller
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, CycleOutcome::Handled(CommandTag::TakePhoto));
    assert_eq!(rig.recognizer.opened(), 1);
    assert_eq!(rig.prompter.spoken(), vec!["正在拍摄环境照片".to_string()]);

    let commands = rig.handler.commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].tag, CommandTag::TakePhoto);
    assert!(commands[0].text.is_empty());
}

#[tokio::test]
async fn test_unrecognized_command_prompts_retry() {
    let recognizer = ScriptedRecognizer::new()
        .then(SessionScript::new().partial(1, "你好机器人"))
        .then(SessionScript::new().on_stop(ScriptedEvent::Final("  ".to_string())));
    let rig = Rig::new(fast_config(), recognizer);
    rig.source.push_level(0, 1).push_level(1500, 5);

    let outcome = rig
        .controller
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, CycleOutcome::NotUnderstood);
    assert!(rig.handler.commands().is_empty());
    assert_eq!(
        rig.prompter.spoken(),
        vec!["你好，请提问：".to_string(), DEFAULT_NOT_UNDERSTOOD.to_string()]
    );
}

#[tokio::test]
async fn test_silent_user_is_not_a_failure() {
    let recognizer = ScriptedRecognizer::new().then(SessionScript::new().partial(1, "你好 机器人"));
    let rig = Rig::new(fast_config(), recognizer);
    let mut transitions = rig.controller.subscribe();

    let outcome = rig
        .controller
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, CycleOutcome::NoSpeech);
    assert!(rig.handler.commands().is_empty());
    assert_eq!(rig.controller.state(), TurnState::WaitingForWake);

    let mut seen = Vec::new();
    while let Ok(t) = transitions.try_recv() {
        seen.push((t.from, t.to));
    }
    assert_eq!(
        seen,
        vec![
            (TurnState::WaitingForWake, TurnState::Awake),
            (TurnState::Awake, TurnState::RecordingCommand),
            (TurnState::RecordingCommand, TurnState::Processing),
            (TurnState::Processing, TurnState::WaitingForWake),
        ]
    );
}

#[tokio::test]
async fn test_wake_phrase_in_superseded_partial_is_seen() {
    let config = EngineConfig {
        max_restarts: 1,
        ..fast_config()
    };
    // The punctuated final alone would not match
    let recognizer = ScriptedRecognizer::new()
        .otherwise(SessionScript::new().partial(2, "你好机器人").final_text(2, "你好，机器人。"));
    let rig = Rig::new(config, recognizer);

    let wake = rig
        .controller
        .wait_for_wake(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(wake.tag, CommandTag::Chat);
    assert_eq!(rig.recognizer.opened(), 1);
    assert_eq!(rig.recognizer.active(), 0);
}

#[tokio::test]
async fn test_wake_wait_notices_failure_during_read_gaps() {
    let recognizer = ScriptedRecognizer::new()
        .then(SessionScript::new().error(1, "quota"))
        .deliver_from_thread();
    let rig = Rig::new(fast_config(), recognizer);
    rig.source.push_level(0, 1);
    for _ in 0..30 {
        rig.source.push_gap();
    }

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        rig.controller.wait_for_wake(&CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap_err();

    assert!(matches!(err, Error::Recognition(msg) if msg == "quota"));
    // Noticed well before the gaps ran out
    assert!(rig.source.remaining() >= 20);
    assert!(!rig.source.is_open());
}

#[tokio::test]
async fn test_device_busy_is_fatal() {
    let rig = Rig::new(fast_config(), ScriptedRecognizer::new());
    let _held = rig.source.claim().unwrap();

    let err = rig
        .controller
        .run(&CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DeviceBusy));
    assert_eq!(rig.recognizer.opened(), 0);
    assert_eq!(rig.controller.state(), TurnState::WaitingForWake);
}

#[tokio::test]
async fn test_device_unavailable_is_fatal() {
    let rig = Rig::new(fast_config(), ScriptedRecognizer::new());
    rig.source.set_unavailable(true);

    let err = rig
        .controller
        .run(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeviceUnavailable(_)));
}

#[tokio::test]
async fn test_engine_recovers_from_failed_cycles() {
    let cancel = CancellationToken::new();
    let recognizer = ScriptedRecognizer::new()
        // Refused outright
        .then(SessionScript::refused())
        // Fails mid-stream
        .then(SessionScript::new().error(2, "connection reset"))
        // Drops the connection
        .then(SessionScript::new().at(1, ScriptedEvent::Closed))
        // Finally works
        .then(SessionScript::new().partial(3, "你好机器人"))
        .then(SessionScript::new().final_text(2, "讲个笑话"));
    let config = EngineConfig {
        greeting: Some("准备就绪".to_string()),
        ..fast_config()
    };
    let rig = Rig::with_parts(
        config,
        pibot_voice::voice::default_wake_words(),
        recognizer,
        RecordingHandler::stopping_after(1, cancel.clone()),
    );
    rig.source
        .push_level(0, 1)
        .push_read_error("overrun")
        .push_level(0, 2)
        .push_read_error("overrun")
        .push_level(0, 3)
        .push_level(1200, 10);

    tokio::time::timeout(Duration::from_secs(5), rig.controller.run(&cancel))
        .await
        .unwrap()
        .unwrap();

    let commands = rig.handler.commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].text, "讲个笑话");
    assert_eq!(rig.prompter.spoken()[0], "准备就绪");
    assert_eq!(rig.recognizer.opened(), 4);
    assert_eq!(rig.recognizer.max_concurrent(), 1);
    assert_eq!(rig.recognizer.active(), 0);
    assert!(!rig.source.is_open());
    assert_eq!(rig.source.opens(), 5);
    assert_eq!(rig.controller.state(), TurnState::WaitingForWake);
}

#[tokio::test]
async fn test_cancellation_releases_everything() {
    let rig = Rig::new(fast_config(), ScriptedRecognizer::new());
    let cancel = CancellationToken::new();

    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    tokio::time::timeout(Duration::from_secs(5), rig.controller.run(&cancel))
        .await
        .unwrap()
        .unwrap();

    assert!(!rig.source.is_open());
    assert_eq!(rig.recognizer.active(), 0);
    assert_eq!(rig.controller.state(), TurnState::WaitingForWake);

    // Safe to go again
    rig.source.push_level(0, 1);
    let recognizer_opened = rig.recognizer.opened();
    let err = rig.controller.wait_for_wake(&cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(rig.recognizer.opened(), recognizer_opened + 1);
    assert!(!rig.source.is_open());
}

#[tokio::test]
async fn test_slow_handler_does_not_stall_engine() {
    let config = EngineConfig {
        handler_timeout: Duration::from_millis(50),
        ..fast_config()
    };
    let recognizer = ScriptedRecognizer::new().then(SessionScript::new().partial(1, "机器人这是什么"));
    let rig = Rig::with_parts(
        config,
        pibot_voice::voice::default_wake_words(),
        recognizer,
        RecordingHandler::slow(Duration::from_secs(30)),
    );

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        rig.controller.run_cycle(&CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(outcome, CycleOutcome::Handled(CommandTag::TakePhoto));
    assert!(rig.handler.commands().is_empty());
}
