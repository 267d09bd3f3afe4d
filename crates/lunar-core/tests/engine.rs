//! Integration tests for the script engine.
//!
//! Each test drives a real worker thread and interpreter through the public
//! API, the way a controller would.

use std::time::Duration;

use lunar_core::{EngineConfig, EngineEvent, EngineEvents, EngineState, Error, RunOutcome, ScriptEngine};

/// Upper bound for anything that should happen "promptly".
const PROMPT: Duration = Duration::from_secs(10);

fn engine() -> (ScriptEngine, EngineEvents) {
    ScriptEngine::new(EngineConfig::default()).unwrap()
}

/// Receive events until `Stopped`, inclusive.
async fn collect_until_stopped(events: &mut EngineEvents) -> Vec<EngineEvent> {
    let collect = async {
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            let stopped = matches!(event, EngineEvent::Stopped { .. });
            seen.push(event);
            if stopped {
                break;
            }
        }
        seen
    };
    tokio::time::timeout(PROMPT, collect)
        .await
        .expect("run did not stop in time")
}

async fn wait_for_started(events: &mut EngineEvents) {
    let wait = async {
        while let Some(event) = events.recv().await {
            if event == EngineEvent::Started {
                return;
            }
        }
        panic!("event queue closed before start");
    };
    tokio::time::timeout(PROMPT, wait)
        .await
        .expect("run did not start in time");
}

fn outputs(events: &[EngineEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Output(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn outcome(events: &[EngineEvent]) -> RunOutcome {
    match events.last() {
        Some(EngineEvent::Stopped { outcome }) => *outcome,
        other => panic!("expected Stopped as last event, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_hello_world() {
    let (mut engine, mut events) = engine();
    engine.set_script(r#"print("hi")"#).unwrap();
    engine.start().unwrap();

    let seen = collect_until_stopped(&mut events).await;

    assert_eq!(seen.first(), Some(&EngineEvent::Started));
    assert_eq!(outputs(&seen), vec!["hi\n"]);
    assert_eq!(outcome(&seen), RunOutcome::Finished);
    assert_eq!(engine.state(), EngineState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_runtime_error_reports_message_and_traceback() {
    let (mut engine, mut events) = engine();
    engine.set_script(r#"error("boom")"#).unwrap();
    engine.start().unwrap();

    let seen = collect_until_stopped(&mut events).await;
    let text = outputs(&seen).concat();

    assert!(text.contains("script:1: boom"), "output was: {}", text);
    assert!(text.contains("stack traceback"), "output was: {}", text);
    assert_eq!(outcome(&seen), RunOutcome::Failed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_syntax_error_is_reported() {
    let (mut engine, mut events) = engine();
    engine.set_script("x = = 1").unwrap();
    engine.start().unwrap();

    let seen = collect_until_stopped(&mut events).await;
    let text = outputs(&seen).concat();

    assert!(text.starts_with("script:1:"), "output was: {}", text);
    assert!(text.ends_with('\n'));
    assert_eq!(outcome(&seen), RunOutcome::Failed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_interrupts_infinite_loop() {
    let (mut engine, mut events) = engine();
    engine.set_script("while true do end").unwrap();
    engine.start().unwrap();

    wait_for_started(&mut events).await;
    assert!(engine.is_running());
    engine.stop();

    let seen = collect_until_stopped(&mut events).await;
    assert_eq!(outcome(&seen), RunOutcome::Cancelled);
    assert!(outputs(&seen).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pcall_cannot_swallow_stop() {
    let (mut engine, mut events) = engine();
    engine
        .set_script(
            r#"
            while true do
                pcall(function()
                    while true do end
                end)
            end
            "#,
        )
        .unwrap();
    engine.start().unwrap();

    wait_for_started(&mut events).await;
    engine.stop();

    let seen = collect_until_stopped(&mut events).await;
    assert_eq!(outcome(&seen), RunOutcome::Cancelled);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_after_output() {
    let (mut engine, mut events) = engine();
    engine.set_script("print(\"before\")\nwhile true do end").unwrap();
    engine.start().unwrap();

    // Wait for the output itself, so the stop lands in the loop.
    let wait = async {
        while let Some(event) = events.recv().await {
            if event == EngineEvent::Output("before\n".to_string()) {
                return;
            }
        }
    };
    tokio::time::timeout(PROMPT, wait).await.unwrap();
    engine.stop();

    let seen = collect_until_stopped(&mut events).await;
    assert_eq!(outcome(&seen), RunOutcome::Cancelled);
    assert!(outputs(&seen).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_nothing_follows_stopped() {
    let (mut engine, mut events) = engine();
    engine
        .set_script("for i = 1, 200 do io.write(i, \"\\n\") end")
        .unwrap();
    engine.start().unwrap();

    let seen = collect_until_stopped(&mut events).await;
    let text = outputs(&seen).concat();
    assert_eq!(text.lines().count(), 200);
    assert_eq!(text.lines().last(), Some("200"));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(events.try_recv(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_current_line_is_reported() {
    let (mut engine, mut events) = engine();
    engine.set_script("local a = 1\nlocal b = 2\nlocal c = 3").unwrap();
    engine.start().unwrap();

    let seen = collect_until_stopped(&mut events).await;
    let lines: Vec<u32> = seen
        .iter()
        .filter_map(|e| match e {
            EngineEvent::CurrentLine(n) => Some(*n),
            _ => None,
        })
        .collect();

    assert!(!lines.is_empty());
    assert!(lines.iter().all(|n| (1..=3).contains(n)));
    assert!(lines.windows(2).all(|w| w[0] != w[1]));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_runs_are_isolated() {
    let (mut engine, mut events) = engine();
    engine.set_script("counter = (counter or 0) + 1\nprint(counter)").unwrap();

    engine.start().unwrap();
    let first = collect_until_stopped(&mut events).await;

    engine.start().unwrap();
    let second = collect_until_stopped(&mut events).await;

    assert_eq!(outputs(&first), vec!["1\n"]);
    assert_eq!(outputs(&second), vec!["1\n"]);
    assert_eq!(second.first(), Some(&EngineEvent::Started));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_while_running_is_ignored() {
    let (mut engine, mut events) = engine();
    engine.set_script("while true do end").unwrap();
    engine.start().unwrap();
    engine.start().unwrap();

    wait_for_started(&mut events).await;
    engine.start().unwrap();
    engine.stop();

    let seen = collect_until_stopped(&mut events).await;
    assert!(!seen.contains(&EngineEvent::Started));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(events.try_recv(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_when_idle_is_noop() {
    let (mut engine, mut events) = engine();
    engine.stop();
    engine.stop();

    assert_eq!(engine.state(), EngineState::Idle);
    assert!(!engine.is_running());
    assert_eq!(events.try_recv(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_payload_is_locked_while_running() {
    let (mut engine, mut events) = engine();
    engine.set_script("while true do end").unwrap();
    engine.start().unwrap();
    wait_for_started(&mut events).await;

    let err = engine.set_script("print(1)").unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));
    assert!(engine.set_search_dir("lib").is_err());
    assert_eq!(engine.payload().source(), b"while true do end");

    engine.stop();
    collect_until_stopped(&mut events).await;
    engine.set_script("print(1)").unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_dirs_resolve_in_order() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    std::fs::write(first.path().join("shared.lua"), "return 'first'").unwrap();
    std::fs::write(second.path().join("shared.lua"), "return 'second'").unwrap();
    std::fs::write(second.path().join("only_second.lua"), "return 'fallback'").unwrap();

    let (mut engine, mut events) = engine();
    engine
        .set_search_dirs([
            first.path().to_string_lossy().into_owned(),
            second.path().to_string_lossy().into_owned(),
        ])
        .unwrap();
    engine
        .set_script(
            r#"
            local shared = require("shared")
            local fallback = require("only_second")
            print(shared, fallback)
            "#,
        )
        .unwrap();
    engine.start().unwrap();

    let seen = collect_until_stopped(&mut events).await;
    assert_eq!(outputs(&seen).concat(), "first\tfallback\n");
    assert_eq!(outcome(&seen), RunOutcome::Finished);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_joins_stopped_worker() {
    let (mut engine, mut events) = engine();
    engine.set_script("while true do end").unwrap();
    engine.start().unwrap();
    wait_for_started(&mut events).await;

    engine.shutdown().await.unwrap();

    assert!(!engine.is_running());
    assert_eq!(engine.leaked_workers(), 0);
    let seen = collect_until_stopped(&mut events).await;
    assert_eq!(outcome(&seen), RunOutcome::Cancelled);
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_abandons_blocked_worker() {
    let config = EngineConfig::default().with_join_timeout(Duration::from_millis(200));
    let (mut engine, mut events) = ScriptEngine::new(config).unwrap();
    engine.set_script(r#"os.execute("sleep 3")"#).unwrap();
    engine.start().unwrap();
    wait_for_started(&mut events).await;

    let err = engine.shutdown().await.unwrap_err();

    assert!(matches!(err, Error::JoinTimeout(_)));
    assert_eq!(engine.leaked_workers(), 1);
    assert!(!engine.is_running());
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_abandoned_worker_does_not_disturb_next_run() {
    let config = EngineConfig::default().with_join_timeout(Duration::from_millis(200));
    let (mut engine, mut events) = ScriptEngine::new(config).unwrap();
    engine
        .set_script("os.execute(\"sleep 1\")\nprint(\"late\")\nwhile true do end")
        .unwrap();
    engine.start().unwrap();
    wait_for_started(&mut events).await;

    let err = engine.shutdown().await.unwrap_err();
    assert!(matches!(err, Error::JoinTimeout(_)));
    assert_eq!(engine.state(), EngineState::Stopped);

    engine.set_script("while true do end").unwrap();
    engine.start().unwrap();
    wait_for_started(&mut events).await;

    // Let the abandoned worker wake up from its sleep and reach its next line.
    tokio::time::sleep(Duration::from_millis(2000)).await;

    assert!(engine.is_running());
    assert_eq!(engine.state(), EngineState::Running);
    while let Some(event) = events.try_recv() {
        assert!(
            matches!(event, EngineEvent::CurrentLine(1)),
            "unexpected event from a previous run: {:?}",
            event
        );
    }

    engine.stop();
    let seen = collect_until_stopped(&mut events).await;
    assert_eq!(outcome(&seen), RunOutcome::Cancelled);
    assert!(outputs(&seen).is_empty());
    assert_eq!(engine.leaked_workers(), 1);

    engine.shutdown().await.unwrap();
}

#[test]
fn test_new_requires_runtime() {
    let err = ScriptEngine::new(EngineConfig::default()).err().unwrap();
    assert!(matches!(err, Error::Runtime(_)));
}
