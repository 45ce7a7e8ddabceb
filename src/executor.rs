//! Bounded execution of a screened snippet inside the container.
//!
//! The snippet lands at a unique path under /tmp, runs under a host-side
//! wall-clock deadline, and the file is removed again on every path out of
//! here. When the deadline fires the container-side interpreter is killed
//! by matching the script path in its argv.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::container::{command, ContainerApi, ContainerError, ExecOutput};

/// Outcome returned when the wall-clock deadline fires.
pub const TIMEOUT_OUTCOME: &str = "Execution timed out";

/// Interpreter binary invoked inside the container.
const PYTHON_BIN: &str = "python3";

/// Directory snippets are written to; expected to be tmpfs.
const SNIPPET_DIR: &str = "/tmp";

/// Runs one snippet at a time inside the container.
pub(crate) struct Executor {
    container: Arc<dyn ContainerApi>,
    timeout: Duration,
}

impl Executor {
    pub fn new(container: Arc<dyn ContainerApi>, timeout: Duration) -> Self {
        Self { container, timeout }
    }

    /// Copies the snippet in, runs it bounded by the deadline, and returns
    /// the normalized outcome: stdout on exit 0, stderr otherwise,
    /// [`TIMEOUT_OUTCOME`] on deadline. The snippet file is removed before
    /// returning, error paths included.
    pub async fn run(&self, source: &str) -> Result<String, ContainerError> {
        let path = format!("{SNIPPET_DIR}/agentrun_{}.py", Uuid::new_v4().simple());

        self.container.copy_in(source.as_bytes(), &path).await?;
        let result = self.run_bounded(&path).await;

        if let Err(err) = self.container.remove_path(&path).await {
            warn!("Failed to remove snippet file {}: {}", path, err);
        }

        result
    }

    async fn run_bounded(&self, path: &str) -> Result<String, ContainerError> {
        let cmd = vec![PYTHON_BIN.to_string(), path.to_string()];

        match tokio::time::timeout(self.timeout, self.container.exec(&cmd, Some(SNIPPET_DIR)))
            .await
        {
            Ok(Ok(output)) => Ok(normalize(output)),
            Ok(Err(err)) => Err(err),
            Err(_) => {
                warn!(
                    "Snippet exceeded {}s deadline, killing container process",
                    self.timeout.as_secs()
                );
                self.kill_by_argv(path).await;
                Ok(TIMEOUT_OUTCOME.to_string())
            }
        }
    }

    /// Kills whatever interpreter process carries the script path in its
    /// argv. Best-effort: the process may already be gone.
    async fn kill_by_argv(&self, path: &str) {
        match self
            .container
            .exec(&command(["pkill", "-9", "-f", path]), None)
            .await
        {
            Ok(output) => debug!("pkill for {} exited with {}", path, output.exit_code),
            Err(err) => warn!("Failed to kill timed-out snippet {}: {}", path, err),
        }
    }
}

/// Exit 0 means the program's stdout is the outcome; anything else means
/// the interpreter wrote the error and traceback to stderr, and that text
/// is the outcome. Both are passed through byte-faithfully.
fn normalize(output: ExecOutput) -> String {
    if output.success() {
        output.stdout
    } else {
        output.stderr
    }
}
