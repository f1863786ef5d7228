// tests/shutdown_behaviour.rs

#![cfg(unix)]

use std::time::{Duration, Instant};

use runbook::engine::ShutdownCause;
use runbook::process::ProcessPool;
use runbook_test_utils::{NodeBuilder, RecordingConsole, init_tracing, test_engine, with_timeout};

fn sh(identifier: &str, line: &str) -> NodeBuilder {
    NodeBuilder::line(identifier, line).shell("sh")
}

#[tokio::test]
async fn repeated_requests_shut_down_once() {
    init_tracing();
    let console = RecordingConsole::new();
    let engine = test_engine(&console);

    let node = sh("server", "sleep 30").build_arc();
    let run = {
        let engine = engine.clone();
        let node = node.clone();
        tokio::spawn(async move { engine.executor().execute(&node, engine.root_token()).await })
    };

    while engine.supervisor().live_count(ProcessPool::Main) == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let started = Instant::now();
    engine.request_shutdown(ShutdownCause::Interrupt);
    engine.request_shutdown(ShutdownCause::Terminate);
    engine.request_shutdown(ShutdownCause::Failure);

    let outcome = with_timeout(run).await.unwrap();
    with_timeout(engine.wait_for_shutdown()).await;

    assert!(outcome.is_terminated());
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(console.count("Shutting down processes..."), 1);
    assert!(engine.shutdown_finished());
    assert!(engine.root_token().is_cancelled());
    assert!(!engine.supervisor().has_live_processes());
}

#[tokio::test]
async fn shutdown_without_children_finishes_immediately() {
    init_tracing();
    let console = RecordingConsole::new();
    let engine = test_engine(&console);

    engine.request_shutdown(ShutdownCause::Failure);
    with_timeout(engine.wait_for_shutdown()).await;

    assert!(engine.is_terminating());
    assert!(!console.contains("Shutting down processes..."));
}

#[tokio::test]
async fn stubborn_children_are_killed_after_the_drain_timeout() {
    init_tracing();
    let console = RecordingConsole::new();
    let engine = test_engine(&console);

    let node = sh("stubborn", "trap '' TERM; while true; do sleep 0.1; done").build_arc();
    let run = {
        let engine = engine.clone();
        let node = node.clone();
        tokio::spawn(async move { engine.executor().execute(&node, engine.root_token()).await })
    };

    while engine.supervisor().live_count(ProcessPool::Main) == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // Give the shell time to install its trap.
    tokio::time::sleep(Duration::from_millis(200)).await;

    engine.request_shutdown(ShutdownCause::Terminate);
    with_timeout(engine.wait_for_shutdown()).await;
    let outcome = with_timeout(run).await.unwrap();

    assert!(outcome.is_terminated());
    assert!(console.contains("Child processes took too long to terminate. Forcing shutdown..."));
    assert_eq!(engine.supervisor().live_count(ProcessPool::Main), 0);
}

#[tokio::test]
async fn after_hooks_still_run_while_draining() {
    init_tracing();
    let console = RecordingConsole::new();
    let engine = test_engine(&console);

    let node = sh("server", "sleep 30")
        .after(
            NodeBuilder::new("after")
                .on_failure(sh("after.failure", "echo cleaning up")),
        )
        .build_arc();

    let run = {
        let engine = engine.clone();
        let node = node.clone();
        tokio::spawn(async move {
            let executor = engine.executor();
            let outcome = executor.execute(&node, engine.root_token()).await;
            let after = executor
                .run_after_hooks(&node, &outcome, engine.root_token(), false)
                .await;
            (outcome, after)
        })
    };

    while engine.supervisor().live_count(ProcessPool::Main) == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    engine.request_shutdown(ShutdownCause::Terminate);
    let (outcome, after) = with_timeout(run).await.unwrap();
    with_timeout(engine.wait_for_shutdown()).await;

    assert!(outcome.is_terminated());
    assert!(after.is_ok());
    assert_eq!(console.output(), vec!["cleaning up"]);
    assert!(node.after_executed());
}
