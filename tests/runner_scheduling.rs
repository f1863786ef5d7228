// tests/runner_scheduling.rs

#![cfg(unix)]

use std::time::{Duration, Instant};

use runbook::engine::{RestartPolicy, RunnerCommand, execute_runner};
use runbook::types::RestartCondition;
use runbook_test_utils::{
    NodeBuilder, RecordingConsole, RunnerPlanBuilder, init_tracing, test_engine, with_timeout,
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn sh(identifier: &str, line: &str) -> NodeBuilder {
    NodeBuilder::line(identifier, line).shell("sh")
}

fn entry(cmd: &str) -> RunnerCommand {
    RunnerCommand {
        cmd: cmd.to_string(),
        ..RunnerCommand::default()
    }
}

fn restarting(cmd: &str, condition: RestartCondition, retries: u32) -> RunnerCommand {
    RunnerCommand {
        cmd: cmd.to_string(),
        restart: RestartPolicy {
            enabled: true,
            condition,
            interval: 0.1,
            retries,
        },
        ..RunnerCommand::default()
    }
}

#[tokio::test]
async fn serial_entries_run_one_after_another() -> TestResult {
    init_tracing();
    let console = RecordingConsole::new();
    let engine = test_engine(&console);

    let plan = RunnerPlanBuilder::new("build", engine.prefixes())
        .flags(true, false)
        .simple(sh("first", "sleep 0.2; echo first"))
        .simple(sh("second", "echo second"))
        .simple(sh("third", "echo third"))
        .build();

    with_timeout(execute_runner(&engine, plan)).await?;

    assert_eq!(console.output(), vec!["first", "second", "third"]);
    assert!(console.contains("Starting runner `build` with flags [serial]"));
    assert!(console.contains("first ⟫ first"));
    assert!(!engine.is_terminating());
    Ok(())
}

#[tokio::test]
async fn runner_serial_flag_orders_entries_without_their_own_flag() -> TestResult {
    init_tracing();
    let console = RecordingConsole::new();
    let engine = test_engine(&console);

    let mut plan = RunnerPlanBuilder::new("build", engine.prefixes())
        .simple(sh("first", "sleep 0.3; echo first"))
        .simple(sh("second", "echo second"))
        .build();
    plan.flags.serial = true;
    assert!(plan.executions.iter().all(|execution| !execution.command.serial));

    with_timeout(execute_runner(&engine, plan)).await?;

    assert_eq!(console.output(), vec!["first", "second"]);
    Ok(())
}

#[tokio::test]
async fn parallel_entries_do_not_wait_for_each_other() -> TestResult {
    init_tracing();
    let console = RecordingConsole::new();
    let engine = test_engine(&console);

    let plan = RunnerPlanBuilder::new("dev", engine.prefixes())
        .simple(sh("slow", "sleep 0.5; echo slow"))
        .simple(sh("fast", "echo fast"))
        .build();

    with_timeout(execute_runner(&engine, plan)).await?;

    assert_eq!(console.output(), vec!["fast", "slow"]);
    Ok(())
}

#[tokio::test]
async fn failing_serial_entry_shuts_down_the_runner() -> TestResult {
    init_tracing();
    let console = RecordingConsole::new();
    let engine = test_engine(&console);

    let mut serial = entry("broken");
    serial.serial = true;
    let plan = RunnerPlanBuilder::new("ci", engine.prefixes())
        .entry(sh("broken", "exit 2"), serial)
        .simple(sh("never", "echo never"))
        .build();

    with_timeout(execute_runner(&engine, plan)).await?;
    with_timeout(engine.wait_for_shutdown()).await;

    assert!(engine.is_terminating());
    assert!(console.contains("A serial command in runner `ci` has failed"));
    assert!(console.contains("ERROR: The command has failed with exit code 2"));
    assert!(!console.output().contains(&"never".to_string()));
    Ok(())
}

#[tokio::test]
async fn dependent_entry_finishing_stops_its_siblings() -> TestResult {
    init_tracing();
    let console = RecordingConsole::new();
    let engine = test_engine(&console);

    let mut dependent = entry("migrate");
    dependent.dependent = true;
    let plan = RunnerPlanBuilder::new("stack", engine.prefixes())
        .simple(sh("server", "echo up; sleep 30"))
        .entry(sh("migrate", "sleep 0.2"), dependent)
        .build();

    let started = Instant::now();
    with_timeout(execute_runner(&engine, plan)).await?;
    with_timeout(engine.wait_for_shutdown()).await;

    assert!(started.elapsed() < Duration::from_secs(8));
    assert!(console.contains("A dependent command in runner `stack` has failed or finished"));
    assert!(console.contains("Shutting down processes..."));
    assert_eq!(engine.supervisor().live_count(runbook::process::ProcessPool::Main), 0);
    Ok(())
}

#[tokio::test]
async fn restart_on_failure_gives_up_after_the_retry_limit() -> TestResult {
    init_tracing();
    let console = RecordingConsole::new();
    let engine = test_engine(&console);

    let plan = RunnerPlanBuilder::new("flaky", engine.prefixes())
        .entry(
            sh("flaky", "echo try; exit 1"),
            restarting("flaky", RestartCondition::Failure, 2),
        )
        .build();

    with_timeout(execute_runner(&engine, plan)).await?;

    assert_eq!(console.count("flaky ⟫ try"), 3, "{}", console.dump());
    assert!(console.contains("Starting with auto-restart (max 2 retries)"));
    assert!(console.contains("Restarting in 0.1 seconds... (attempt 1/2)"));
    assert!(console.contains("Restarting in 0.1 seconds... (attempt 2/2)"));
    assert!(console.contains("Maximum retry attempts (2) reached. Terminating"));
    // Not serial, not dependent: giving up does not tear the invocation down.
    assert!(!engine.is_terminating());
    Ok(())
}

#[tokio::test]
async fn restart_on_failure_stops_once_the_command_succeeds() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let console = RecordingConsole::new();
    let engine = test_engine(&console);

    // Fails on the first run, succeeds on the second.
    let script = "if [ -f marker ]; then echo recovered; else touch marker; exit 1; fi";
    let plan = RunnerPlanBuilder::new("heal", engine.prefixes())
        .entry(
            sh("heal", script).dir(dir.path()),
            restarting("heal", RestartCondition::Failure, 0),
        )
        .build();

    with_timeout(execute_runner(&engine, plan)).await?;

    assert_eq!(console.output(), vec!["recovered"]);
    assert_eq!(console.count("Restarting in"), 1);
    assert!(console.contains("Starting with auto-restart"));
    Ok(())
}

#[tokio::test]
async fn restart_always_repeats_successful_runs() -> TestResult {
    init_tracing();
    let console = RecordingConsole::new();
    let engine = test_engine(&console);

    let plan = RunnerPlanBuilder::new("loop", engine.prefixes())
        .entry(
            sh("tick", "echo tick"),
            restarting("tick", RestartCondition::Always, 3),
        )
        .build();

    with_timeout(execute_runner(&engine, plan)).await?;

    assert_eq!(console.output(), vec!["tick"; 4]);
    assert!(console.contains("Maximum retry attempts (3) reached. Terminating"));
    Ok(())
}

#[tokio::test]
async fn delay_is_applied_before_the_run() -> TestResult {
    init_tracing();
    let console = RecordingConsole::new();
    let engine = test_engine(&console);

    let mut delayed = entry("late");
    delayed.delay = 0.3;
    let plan = RunnerPlanBuilder::new("dev", engine.prefixes())
        .entry(sh("late", "echo late"), delayed)
        .simple(sh("early", "echo early"))
        .build();

    let started = Instant::now();
    with_timeout(execute_runner(&engine, plan)).await?;

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(console.contains("late ⟫ Waiting 0.3 seconds before execution..."));
    assert_eq!(console.output(), vec!["early", "late"]);
    Ok(())
}

#[tokio::test]
async fn entries_sharing_a_name_get_numbered_prefixes() -> TestResult {
    init_tracing();
    let console = RecordingConsole::new();
    let engine = test_engine(&console);

    let plan = RunnerPlanBuilder::new("twice", engine.prefixes())
        .flags(true, false)
        .simple(sh("echo", "echo a"))
        .simple(sh("echo", "echo b"))
        .build();

    with_timeout(execute_runner(&engine, plan)).await?;

    let plain = console.plain();
    assert!(plain.contains(&"1 echo ⟫ a".to_string()), "{}", console.dump());
    assert!(plain.contains(&"2 echo ⟫ b".to_string()));
    Ok(())
}
