// tests/port_gate.rs

#![cfg(unix)]

use std::time::{Duration, Instant};

use runbook::engine::port::{check_port, wait_for_ports};
use runbook::engine::{PortAwait, RunnerCommand, ShutdownCause, execute_runner};
use runbook::errors::RunbookError;
use runbook_test_utils::{
    NodeBuilder, RecordingConsole, RunnerPlanBuilder, init_tracing, test_engine, with_timeout,
};
use tokio::net::TcpListener;

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// A port nothing listens on: bind, read the number, release it.
async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn open_port_passes_the_gate() -> TestResult {
    init_tracing();
    let console = RecordingConsole::new();
    let engine = test_engine(&console);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    check_port(port, Duration::from_secs(1)).await?;
    let outcome = with_timeout(wait_for_ports(&engine, None, &[port], 1.0)).await;

    assert!(outcome.is_success());
    assert!(console.contains(&format!("Port {port} is ready for connection")));
    Ok(())
}

#[tokio::test]
async fn closed_port_times_out() {
    init_tracing();
    let console = RecordingConsole::new();
    let engine = test_engine(&console);
    let port = free_port().await;

    let started = Instant::now();
    let outcome = with_timeout(wait_for_ports(&engine, None, &[port], 0.5)).await;

    assert!(started.elapsed() >= Duration::from_millis(500));
    match outcome.error() {
        Some(RunbookError::PortTimeout { port: p, timeout }) => {
            assert_eq!(*p, port);
            assert_eq!(timeout, "0.5");
        }
        other => panic!("expected a port timeout, got {other:?}"),
    }
    assert!(console.contains(&format!(
        "Checking if port {port} is ready for connection... (timeout in"
    )));
}

#[tokio::test]
async fn zero_timeout_uses_the_engine_default() {
    init_tracing();
    let console = RecordingConsole::new();
    let engine = test_engine(&console);
    let port = free_port().await;

    let outcome = with_timeout(wait_for_ports(&engine, None, &[port], 0.0)).await;

    let msg = outcome.error().map(ToString::to_string).unwrap_or_default();
    assert_eq!(
        msg,
        format!(
            "Timeout reached after 2 seconds waiting for port {port} to become ready for connection"
        )
    );
}

#[tokio::test]
async fn port_that_opens_later_is_picked_up() -> TestResult {
    init_tracing();
    let console = RecordingConsole::new();
    let engine = test_engine(&console);
    let port = free_port().await;

    let opener = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(listener);
    });

    let outcome = with_timeout(wait_for_ports(&engine, None, &[port], 2.0)).await;
    assert!(outcome.is_success(), "{}", console.dump());
    opener.abort();
    Ok(())
}

#[tokio::test]
async fn unbounded_timeout_waits_without_panicking() -> TestResult {
    init_tracing();
    let console = RecordingConsole::new();
    let engine = test_engine(&console);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    for timeout in [f64::INFINITY, 1e300] {
        let outcome = with_timeout(wait_for_ports(&engine, None, &[port], timeout)).await;
        assert!(outcome.is_success());
    }

    let closed = free_port().await;
    let waiting = {
        let engine = engine.clone();
        tokio::spawn(async move { wait_for_ports(&engine, None, &[closed], f64::INFINITY).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    engine.request_shutdown(ShutdownCause::Interrupt);

    let outcome = with_timeout(waiting).await?;
    assert!(outcome.is_terminated());
    Ok(())
}

#[tokio::test]
async fn shutdown_interrupts_the_wait() {
    init_tracing();
    let console = RecordingConsole::new();
    let engine = test_engine(&console);
    let port = free_port().await;

    let waiting = {
        let engine = engine.clone();
        tokio::spawn(async move { wait_for_ports(&engine, None, &[port], 30.0).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.request_shutdown(ShutdownCause::Interrupt);

    let outcome = with_timeout(waiting).await.unwrap();
    assert!(outcome.is_terminated());
}

#[tokio::test]
async fn runner_entry_waits_for_its_port() -> TestResult {
    init_tracing();
    let console = RecordingConsole::new();
    let engine = test_engine(&console);

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let gated = RunnerCommand {
        cmd: "client".to_string(),
        awaits: Some(PortAwait {
            ports: vec![port],
            timeout: 1.0,
        }),
        ..RunnerCommand::default()
    };
    let plan = RunnerPlanBuilder::new("dev", engine.prefixes())
        .entry(NodeBuilder::line("client", "echo connected").shell("sh"), gated)
        .build();

    with_timeout(execute_runner(&engine, plan)).await?;

    assert!(console.contains(&format!("client ⟫ Port {port} is ready for connection")));
    assert_eq!(console.output(), vec!["connected"]);
    Ok(())
}

#[tokio::test]
async fn timed_out_serial_entry_fails_the_runner() -> TestResult {
    init_tracing();
    let console = RecordingConsole::new();
    let engine = test_engine(&console);
    let port = free_port().await;

    let gated = RunnerCommand {
        cmd: "client".to_string(),
        serial: true,
        awaits: Some(PortAwait {
            ports: vec![port],
            timeout: 0.3,
        }),
        ..RunnerCommand::default()
    };
    let plan = RunnerPlanBuilder::new("dev", engine.prefixes())
        .entry(NodeBuilder::line("client", "echo never").shell("sh"), gated)
        .build();

    with_timeout(execute_runner(&engine, plan)).await?;
    with_timeout(engine.wait_for_shutdown()).await;

    assert!(console.contains("Timeout reached after 0.3 seconds waiting for port"));
    assert!(console.contains("A serial command in runner `dev` has failed"));
    assert!(console.output().is_empty());
    Ok(())
}
