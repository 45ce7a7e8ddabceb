//! Pipeline invariants, driven through the public API with the in-memory
//! container fake.
//!
//! These tests pin the guarantees the runner makes: rejected snippets cause
//! no container traffic, transient installs are always undone, snippet
//! files never outlive a run, and pip is never invoked concurrently.

use std::sync::Arc;
use std::time::Duration;

use agentrun::container::mock::MockContainer;
use agentrun::container::{ContainerApi, ContainerStats, ExecOutput};
use agentrun::runner::{INSTALL_FAILED_OUTCOME, OVER_CAPACITY_OUTCOME, TIMEOUT_OUTCOME};
use agentrun::{screen, AgentRun, RunnerConfig};

// -----------------------------------------------------------------------------
// Test helpers
// -----------------------------------------------------------------------------

/// Builds a runner over a fresh fake container and forgets the calls made
/// during construction.
async fn runner_with(config: RunnerConfig) -> (Arc<MockContainer>, AgentRun) {
    let container = Arc::new(MockContainer::new());
    let runner = AgentRun::with_container(config, container.clone() as Arc<dyn ContainerApi>)
        .await
        .expect("runner construction");
    container.clear_calls();
    (container, runner)
}

fn stdout(text: &str) -> ExecOutput {
    ExecOutput {
        stdout: text.to_string(),
        exit_code: 0,
        ..Default::default()
    }
}

fn stderr(text: &str) -> ExecOutput {
    ExecOutput {
        stderr: text.to_string(),
        exit_code: 1,
        ..Default::default()
    }
}

// -----------------------------------------------------------------------------
// Invariant: rejected snippets perform no container-side work
// -----------------------------------------------------------------------------

#[tokio::test]
async fn rejected_snippets_leave_no_trace() {
    let (container, runner) = runner_with(RunnerConfig::new("sandbox")).await;

    for pattern in screen::BLOCKED_PATTERNS {
        let snippet = format!("x = 1\ny = {pattern}\n");
        let outcome = runner.execute(&snippet).await.unwrap();
        assert!(
            outcome.starts_with("Unsafe code:"),
            "pattern {pattern:?} produced {outcome:?}"
        );
    }
    for module in screen::BLOCKED_MODULES {
        let snippet = format!("import {module}\n");
        let outcome = runner.execute(&snippet).await.unwrap();
        assert!(
            outcome.starts_with("Unsafe code:"),
            "module {module:?} produced {outcome:?}"
        );
    }

    assert!(
        container.calls().is_empty(),
        "rejection must be free of side effects"
    );
}

// -----------------------------------------------------------------------------
// Invariant: installed set equals uninstalled set, files never survive
// -----------------------------------------------------------------------------

#[tokio::test]
async fn transient_install_is_mirrored_by_uninstall() {
    let mut config = RunnerConfig::new("sandbox");
    config.dependencies_whitelist = vec!["requests".to_string()];
    let (container, runner) = runner_with(config).await;

    let source = "import requests\nprint(requests.__name__)";
    container.program(source, stdout("requests\n"));

    let outcome = runner.execute(source).await.unwrap();
    assert_eq!(outcome, "requests\n");

    assert_eq!(container.execs_matching("pip install --user requests").len(), 1);
    assert_eq!(container.execs_matching("pip uninstall -y requests").len(), 1);
    assert!(container.installed().is_empty());
    assert!(container.files().is_empty());
}

#[tokio::test]
async fn snippet_file_is_gone_after_every_outcome() {
    let (container, runner) = runner_with(RunnerConfig::new("sandbox")).await;

    container.program("print(1)", stdout("1\n"));
    container.program("1/0", stderr("ZeroDivisionError: division by zero\n"));

    runner.execute("print(1)").await.unwrap();
    assert!(container.files().is_empty());

    runner.execute("1/0").await.unwrap();
    assert!(container.files().is_empty());
}

// -----------------------------------------------------------------------------
// Invariant: pip never runs concurrently
// -----------------------------------------------------------------------------

#[tokio::test]
async fn parallel_runs_serialize_their_installs() {
    let (container, runner) = runner_with(RunnerConfig::new("sandbox")).await;
    container.set_install_delay(Duration::from_millis(50));

    let first = "import numpy\nprint(numpy.__name__)";
    let second = "import pandas\nprint(pandas.__name__)";
    container.program(first, stdout("numpy\n"));
    container.program(second, stdout("pandas\n"));

    let (a, b) = tokio::join!(runner.execute(first), runner.execute(second));
    assert_eq!(a.unwrap(), "numpy\n");
    assert_eq!(b.unwrap(), "pandas\n");

    let installs = container.execs_matching("pip install --user");
    assert_eq!(installs.len(), 2);
    let (x, y) = (&installs[0], &installs[1]);
    assert!(
        x.finished <= y.started || y.finished <= x.started,
        "install windows overlap: {x:?} vs {y:?}"
    );

    assert!(container.installed().is_empty());
}

#[tokio::test]
async fn concurrent_runs_share_a_transient_dependency() {
    let (container, runner) = runner_with(RunnerConfig::new("sandbox")).await;
    container.set_install_delay(Duration::from_millis(20));

    let first = "import requests\nprint('a')";
    let second = "import requests\nprint('b')";
    container.program(first, stdout("a\n"));
    container.program(second, stdout("b\n"));

    let (a, b) = tokio::join!(runner.execute(first), runner.execute(second));
    a.unwrap();
    b.unwrap();

    // One of the runs reused the other's install, and the package is gone
    // only after the last claim was dropped.
    assert_eq!(container.execs_matching("pip install --user requests").len(), 1);
    assert_eq!(container.execs_matching("pip uninstall -y requests").len(), 1);
    assert!(container.installed().is_empty());
}

// -----------------------------------------------------------------------------
// Invariant: cached dependencies make repeat runs pip-free
// -----------------------------------------------------------------------------

#[tokio::test]
async fn cached_runs_are_idempotent_and_pip_free() {
    let mut config = RunnerConfig::new("sandbox");
    config.cached_dependencies = vec!["requests".to_string()];
    let (container, runner) = runner_with(config).await;

    let source = "import requests\nprint(requests.__name__)";
    container.program(source, stdout("requests\n"));

    let first = runner.execute(source).await.unwrap();
    let second = runner.execute(source).await.unwrap();
    assert_eq!(first, "requests\n");
    assert_eq!(first, second);

    assert!(container.execs_matching("pip").is_empty());
    assert!(container.installed().contains("requests"), "cache survives");
}

// -----------------------------------------------------------------------------
// Failure paths
// -----------------------------------------------------------------------------

#[tokio::test]
async fn empty_whitelist_blocks_before_any_install() {
    let mut config = RunnerConfig::new("sandbox");
    config.dependencies_whitelist = vec![];
    let (container, runner) = runner_with(config).await;

    let outcome = runner.execute("import requests\nprint(1)").await.unwrap();
    assert_eq!(outcome, "Dependency not in whitelist: requests");
    assert!(container.execs_matching("pip").is_empty());
}

#[tokio::test]
async fn failed_install_rolls_back_and_reports() {
    let (container, runner) = runner_with(RunnerConfig::new("sandbox")).await;
    container.fail_install("pandas");

    let outcome = runner
        .execute("import numpy\nimport pandas\nprint(1)")
        .await
        .unwrap();
    assert_eq!(outcome, INSTALL_FAILED_OUTCOME);
    assert!(container.installed().is_empty(), "numpy rolled back");
    assert!(container.files().is_empty());
}

#[tokio::test(start_paused = true)]
async fn saturated_container_reports_over_capacity() {
    let (container, runner) = runner_with(RunnerConfig::new("sandbox")).await;
    container.set_stats(ContainerStats {
        cpu_usage_pct: 99.0,
        mem_used: 0,
        mem_limit: 512 * 1024 * 1024,
    });

    let outcome = runner.execute("print(1)").await.unwrap();
    assert_eq!(outcome, OVER_CAPACITY_OUTCOME);
    assert!(container.files().is_empty());
}

#[tokio::test]
async fn construction_fails_when_memswap_below_memory() {
    let mut config = RunnerConfig::new("sandbox");
    config.memory_limit = "512m".to_string();
    config.memswap_limit = "256m".to_string();

    let container = Arc::new(MockContainer::new());
    let result = AgentRun::with_container(config, container.clone() as Arc<dyn ContainerApi>).await;
    assert!(result.is_err());
    assert!(container.calls().is_empty());
}

// -----------------------------------------------------------------------------
// Timeout behavior
// -----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn overlong_run_times_out_and_is_killed() {
    let mut config = RunnerConfig::new("sandbox");
    config.default_timeout = 2;
    let (container, runner) = runner_with(config).await;

    let source = "import time\ntime.sleep(30)";
    container.program_with_delay(source, stdout(""), Duration::from_secs(30));

    let outcome = runner.execute(source).await.unwrap();
    assert_eq!(outcome, TIMEOUT_OUTCOME);

    assert_eq!(container.execs_matching("pkill -9 -f /tmp/agentrun_").len(), 1);
    assert!(container.files().is_empty());
}

#[tokio::test(start_paused = true)]
async fn run_just_inside_the_deadline_completes() {
    let mut config = RunnerConfig::new("sandbox");
    config.default_timeout = 2;
    let (container, runner) = runner_with(config).await;

    let source = "import time\ntime.sleep(1.9)\nprint('done')";
    container.program_with_delay(source, stdout("done\n"), Duration::from_millis(1_900));

    let outcome = runner.execute(source).await.unwrap();
    assert_eq!(outcome, "done\n");
    assert!(container.execs_matching("pkill").is_empty());
}

// -----------------------------------------------------------------------------
// Outcome fidelity
// -----------------------------------------------------------------------------

#[tokio::test]
async fn stderr_traceback_is_passed_through_verbatim() {
    let (container, runner) = runner_with(RunnerConfig::new("sandbox")).await;
    let traceback = "Traceback (most recent call last):\n  File \"/tmp/s.py\", line 1, in <module>\n    1/0\nZeroDivisionError: division by zero\n";
    container.program("1/0", stderr(traceback));

    let outcome = runner.execute("1/0").await.unwrap();
    assert_eq!(outcome, traceback, "leading whitespace preserved");
}

#[tokio::test]
async fn print_then_raise_returns_only_stderr() {
    let (container, runner) = runner_with(RunnerConfig::new("sandbox")).await;
    let source = "print('partial')\nraise ValueError('boom')";
    container.program(
        source,
        ExecOutput {
            stdout: "partial\n".to_string(),
            stderr: "ValueError: boom\n".to_string(),
            exit_code: 1,
        },
    );

    let outcome = runner.execute(source).await.unwrap();
    assert_eq!(outcome, "ValueError: boom\n");
}

#[tokio::test]
async fn carriage_returns_survive_the_round_trip() {
    let (container, runner) = runner_with(RunnerConfig::new("sandbox")).await;
    let noisy = "progress: 10%\rprogress: 100%\ndone\n";
    container.program("noisy", stdout(noisy));

    let outcome = runner.execute("noisy").await.unwrap();
    assert_eq!(outcome, noisy);
}

#[tokio::test]
async fn empty_source_yields_empty_outcome() {
    let (container, runner) = runner_with(RunnerConfig::new("sandbox")).await;
    let outcome = runner.execute("").await.unwrap();
    assert_eq!(outcome, "");
    assert!(container.execs_matching("pip").is_empty());
}
