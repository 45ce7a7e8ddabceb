//! In-memory container fake for tests.
//!
//! Emulates just enough of a container to drive the pipeline end-to-end:
//! a file table for copy-in/removal, a pip package set mutated by
//! install/uninstall commands, programmable interpreter runs keyed by
//! source text, and settable stats. Every adapter call is recorded with
//! entry/exit timestamps so tests can assert ordering and serialization.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{ContainerApi, ContainerError, ContainerStats, ExecOutput, ResourceLimits};

/// One recorded adapter call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    /// Operation name: `exec`, `copy_in`, `remove_path`, `reconfigure`, `stats`.
    pub op: &'static str,
    /// Space-joined command line for `exec`, path for file operations.
    pub detail: String,
    /// When the call entered the adapter.
    pub started: Instant,
    /// When the call returned.
    pub finished: Instant,
}

/// Programmed behavior for one interpreter invocation.
#[derive(Debug, Clone)]
pub struct MockProgram {
    /// Output the interpreter produces.
    pub output: ExecOutput,
    /// How long the run takes before returning.
    pub delay: Duration,
}

#[derive(Default)]
struct MockState {
    files: HashMap<String, Vec<u8>>,
    installed: HashSet<String>,
    programs: HashMap<String, MockProgram>,
    failing_installs: HashSet<String>,
    failing_uninstalls: HashSet<String>,
    calls: Vec<CallRecord>,
    limits: Option<ResourceLimits>,
    stats: ContainerStats,
    install_delay: Duration,
}

/// A fake container that records every call for test assertions.
#[derive(Default)]
pub struct MockContainer {
    state: Mutex<MockState>,
}

impl MockContainer {
    /// Creates a fake container with headroom available and no packages
    /// installed.
    pub fn new() -> Self {
        let container = Self::default();
        container.set_stats(ContainerStats {
            cpu_usage_pct: 5.0,
            mem_used: 10 * 1024 * 1024,
            mem_limit: 512 * 1024 * 1024,
        });
        container
    }

    /// Programs the interpreter output for an exact source text.
    pub fn program(&self, source: &str, output: ExecOutput) {
        self.program_with_delay(source, output, Duration::ZERO);
    }

    /// Programs the interpreter output for an exact source text, taking
    /// `delay` of (tokio) time before returning.
    pub fn program_with_delay(&self, source: &str, output: ExecOutput, delay: Duration) {
        let mut state = self.state.lock().unwrap();
        state
            .programs
            .insert(source.to_string(), MockProgram { output, delay });
    }

    /// Makes `pip install` of the given package exit non-zero.
    pub fn fail_install(&self, package: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_installs
            .insert(package.to_string());
    }

    /// Makes `pip uninstall` of the given package exit non-zero.
    pub fn fail_uninstall(&self, package: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_uninstalls
            .insert(package.to_string());
    }

    /// Marks a package as already present, as if installed out-of-band.
    pub fn preinstall(&self, package: &str) {
        self.state
            .lock()
            .unwrap()
            .installed
            .insert(package.to_string());
    }

    /// Sets the utilization snapshot returned by `stats`.
    pub fn set_stats(&self, stats: ContainerStats) {
        self.state.lock().unwrap().stats = stats;
    }

    /// Makes every `pip install` take the given amount of real time, so
    /// tests can observe whether install windows overlap.
    pub fn set_install_delay(&self, delay: Duration) {
        self.state.lock().unwrap().install_delay = delay;
    }

    /// Returns every call recorded so far.
    pub fn calls(&self) -> Vec<CallRecord> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Forgets recorded calls (e.g. the ones made during construction).
    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Packages currently installed in the fake container.
    pub fn installed(&self) -> HashSet<String> {
        self.state.lock().unwrap().installed.clone()
    }

    /// Paths of files currently present in the fake container.
    pub fn files(&self) -> Vec<String> {
        self.state.lock().unwrap().files.keys().cloned().collect()
    }

    /// Limits applied through `reconfigure`, if any.
    pub fn limits(&self) -> Option<ResourceLimits> {
        self.state.lock().unwrap().limits
    }

    /// Recorded exec calls whose command line starts with the given prefix.
    pub fn execs_matching(&self, prefix: &str) -> Vec<CallRecord> {
        self.calls()
            .into_iter()
            .filter(|call| call.op == "exec" && call.detail.starts_with(prefix))
            .collect()
    }

    fn record(&self, op: &'static str, detail: String, started: Instant) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(CallRecord {
            op,
            detail,
            started,
            finished: Instant::now(),
        });
    }

    async fn dispatch(&self, cmd: &[String]) -> ExecOutput {
        let parts: Vec<&str> = cmd.iter().map(String::as_str).collect();
        match parts.as_slice() {
            ["pip", "show", package] => {
                let present = self.state.lock().unwrap().installed.contains(*package);
                if present {
                    ExecOutput {
                        stdout: format!("Name: {package}\n"),
                        exit_code: 0,
                        ..Default::default()
                    }
                } else {
                    ExecOutput {
                        stderr: format!("WARNING: Package(s) not found: {package}\n"),
                        exit_code: 1,
                        ..Default::default()
                    }
                }
            }
            ["pip", "install", "--user", package] => {
                let (failing, delay) = {
                    let state = self.state.lock().unwrap();
                    (
                        state.failing_installs.contains(*package),
                        state.install_delay,
                    )
                };
                if failing {
                    return ExecOutput {
                        stderr: format!("ERROR: No matching distribution found for {package}\n"),
                        exit_code: 1,
                        ..Default::default()
                    };
                }
                if delay > Duration::ZERO {
                    tokio::time::sleep(delay).await;
                }
                self.state
                    .lock()
                    .unwrap()
                    .installed
                    .insert((*package).to_string());
                ExecOutput {
                    stdout: format!("Successfully installed {package}\n"),
                    exit_code: 0,
                    ..Default::default()
                }
            }
            ["pip", "uninstall", "-y", package] => {
                let failing = self
                    .state
                    .lock()
                    .unwrap()
                    .failing_uninstalls
                    .contains(*package);
                if failing {
                    return ExecOutput {
                        stderr: format!("ERROR: cannot uninstall {package}\n"),
                        exit_code: 1,
                        ..Default::default()
                    };
                }
                self.state.lock().unwrap().installed.remove(*package);
                ExecOutput {
                    stdout: format!("Successfully uninstalled {package}\n"),
                    exit_code: 0,
                    ..Default::default()
                }
            }
            ["python3", path] => {
                let program = {
                    let state = self.state.lock().unwrap();
                    let Some(bytes) = state.files.get(*path) else {
                        return ExecOutput {
                            stderr: format!(
                                "python3: can't open file '{path}': [Errno 2] No such file or directory\n"
                            ),
                            exit_code: 2,
                            ..Default::default()
                        };
                    };
                    let source = String::from_utf8_lossy(bytes).into_owned();
                    state.programs.get(&source).cloned()
                };
                match program {
                    Some(program) => {
                        if program.delay > Duration::ZERO {
                            tokio::time::sleep(program.delay).await;
                        }
                        program.output
                    }
                    // Unprogrammed source behaves like a script that prints
                    // nothing and exits cleanly.
                    None => ExecOutput::default(),
                }
            }
            ["pkill", ..] => ExecOutput::default(),
            ["rm", "-f", path] => {
                self.state.lock().unwrap().files.remove(*path);
                ExecOutput::default()
            }
            _ => ExecOutput::default(),
        }
    }
}

#[async_trait]
impl ContainerApi for MockContainer {
    async fn exec(
        &self,
        cmd: &[String],
        _workdir: Option<&str>,
    ) -> Result<ExecOutput, ContainerError> {
        let started = Instant::now();
        let output = self.dispatch(cmd).await;
        self.record("exec", cmd.join(" "), started);
        Ok(output)
    }

    async fn copy_in(&self, bytes: &[u8], dest_path: &str) -> Result<(), ContainerError> {
        let started = Instant::now();
        self.state
            .lock()
            .unwrap()
            .files
            .insert(dest_path.to_string(), bytes.to_vec());
        self.record("copy_in", dest_path.to_string(), started);
        Ok(())
    }

    async fn remove_path(&self, path: &str) -> Result<(), ContainerError> {
        let started = Instant::now();
        self.state.lock().unwrap().files.remove(path);
        self.record("remove_path", path.to_string(), started);
        Ok(())
    }

    async fn reconfigure(&self, limits: &ResourceLimits) -> Result<(), ContainerError> {
        let started = Instant::now();
        self.state.lock().unwrap().limits = Some(*limits);
        self.record("reconfigure", format!("{limits:?}"), started);
        Ok(())
    }

    async fn stats(&self) -> Result<ContainerStats, ContainerError> {
        let started = Instant::now();
        let stats = self.state.lock().unwrap().stats;
        self.record("stats", String::new(), started);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::command;

    #[tokio::test]
    async fn test_pip_show_reflects_installs() {
        let container = MockContainer::new();

        let missing = container
            .exec(&command(["pip", "show", "requests"]), None)
            .await
            .unwrap();
        assert_eq!(missing.exit_code, 1);

        container
            .exec(&command(["pip", "install", "--user", "requests"]), None)
            .await
            .unwrap();

        let present = container
            .exec(&command(["pip", "show", "requests"]), None)
            .await
            .unwrap();
        assert!(present.success());
        assert!(container.installed().contains("requests"));
    }

    #[tokio::test]
    async fn test_copy_in_and_remove_path() {
        let container = MockContainer::new();
        container.copy_in(b"print(1)", "/tmp/x.py").await.unwrap();
        assert_eq!(container.files(), vec!["/tmp/x.py".to_string()]);

        container.remove_path("/tmp/x.py").await.unwrap();
        assert!(container.files().is_empty());

        // Removing a missing path is not an error.
        container.remove_path("/tmp/x.py").await.unwrap();
    }

    #[tokio::test]
    async fn test_programmed_interpreter_run() {
        let container = MockContainer::new();
        container.program(
            "print('hi')",
            ExecOutput {
                stdout: "hi\n".to_string(),
                exit_code: 0,
                ..Default::default()
            },
        );
        container.copy_in(b"print('hi')", "/tmp/s.py").await.unwrap();

        let output = container
            .exec(&command(["python3", "/tmp/s.py"]), None)
            .await
            .unwrap();
        assert_eq!(output.stdout, "hi\n");
        assert!(output.success());
    }

    #[tokio::test]
    async fn test_missing_script_fails_like_python() {
        let container = MockContainer::new();
        let output = container
            .exec(&command(["python3", "/tmp/gone.py"]), None)
            .await
            .unwrap();
        assert_eq!(output.exit_code, 2);
        assert!(output.stderr.contains("No such file"));
    }

    #[tokio::test]
    async fn test_failing_install_exits_nonzero() {
        let container = MockContainer::new();
        container.fail_install("leftpad");
        let output = container
            .exec(&command(["pip", "install", "--user", "leftpad"]), None)
            .await
            .unwrap();
        assert_eq!(output.exit_code, 1);
        assert!(!container.installed().contains("leftpad"));
    }

    #[tokio::test]
    async fn test_calls_are_recorded_in_order() {
        let container = MockContainer::new();
        container.copy_in(b"x", "/tmp/a.py").await.unwrap();
        container.remove_path("/tmp/a.py").await.unwrap();

        let calls = container.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].op, "copy_in");
        assert_eq!(calls[1].op, "remove_path");
        assert!(calls[0].started <= calls[1].started);
    }
}
