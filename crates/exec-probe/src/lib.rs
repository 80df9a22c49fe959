//! # exec-probe
//!
//! Bounded invocation of external executables, plus a cached availability
//! check so callers never launch work against a tool that is known to be
//! missing.
//!
//! ## How it works
//!
//! - [`run`] spawns a program with stdin/stdout detached, waits for it under
//!   a mandatory timeout and returns only the exit status. The child is
//!   killed when the timeout elapses (`kill_on_drop`).
//! - [`probe`] runs a harmless diagnostic invocation (e.g. `pdftoppm -v`)
//!   and reports whether it started and exited successfully.
//! - [`Capability`] wraps one tool: the first successful probe is cached for
//!   the life of the process; a failed probe, or a later spawn failure
//!   reported through [`Capability::run`], sends the next caller back to
//!   probing.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use exec_probe::Capability;
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), exec_probe::ExecError> {
//! let pdftoppm = Capability::new("pdftoppm", ["-v"]);
//! if pdftoppm.ensure().await {
//!     let status = pdftoppm
//!         .run(&["-r", "150", "-png", "in.pdf", "out/page"], Duration::from_secs(60))
//!         .await?;
//!     assert!(status.success());
//! }
//! # Ok(())
//! # }
//! ```

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::sync::RwLock;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

// ── Public constants ─────────────────────────────────────────────────────────

/// Timeout applied to probe invocations unless overridden.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of trailing stderr bytes kept for diagnostics.
const STDERR_TAIL: usize = 512;

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned when an external program cannot be run to completion.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The executable does not exist on `PATH` (or at the given path).
    #[error("Executable '{program}' was not found")]
    NotFound { program: String },

    /// The OS refused to start the process (permissions, resource limits…).
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process did not exit within the allotted time and was killed.
    #[error("'{program}' did not finish within {}ms and was killed", .timeout.as_millis())]
    Timeout { program: String, timeout: Duration },

    /// Waiting on the running process failed.
    #[error("Failed waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExecError {
    /// `true` when the error means the program could not be launched at all,
    /// as opposed to a launched program misbehaving.
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, ExecError::NotFound { .. } | ExecError::Spawn { .. })
    }
}

// ── Invocation ───────────────────────────────────────────────────────────────

/// Run `program` with `args`, bounded by `timeout`.
///
/// Only the exit status is returned; stdout is discarded and the tail of
/// stderr is logged at debug level. A non-zero exit is **not** an error
/// here; callers decide what a failing status means.
pub async fn run<S: AsRef<OsStr>>(
    program: &str,
    args: &[S],
    timeout: Duration,
) -> Result<ExitStatus, ExecError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ExecError::NotFound {
                program: program.to_string(),
            }
        } else {
            ExecError::Spawn {
                program: program.to_string(),
                source: e,
            }
        }
    })?;

    // Dropping the `wait_with_output` future on timeout drops the child,
    // which kills it.
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Err(_) => {
            warn!("'{}' exceeded {}ms, killed", program, timeout.as_millis());
            return Err(ExecError::Timeout {
                program: program.to_string(),
                timeout,
            });
        }
        Ok(result) => result.map_err(|e| ExecError::Wait {
            program: program.to_string(),
            source: e,
        })?,
    };

    if !output.stderr.is_empty() {
        let start = output.stderr.len().saturating_sub(STDERR_TAIL);
        debug!(
            "'{}' stderr: {}",
            program,
            String::from_utf8_lossy(&output.stderr[start..]).trim_end()
        );
    }

    debug!("'{}' exited with {}", program, output.status);
    Ok(output.status)
}

/// Returns `true` if `program args…` starts and exits successfully within
/// `timeout`.
pub async fn probe<S: AsRef<OsStr>>(program: &str, args: &[S], timeout: Duration) -> bool {
    match run(program, args, timeout).await {
        Ok(status) if status.success() => true,
        Ok(status) => {
            debug!("Probe of '{}' exited with {}", program, status);
            false
        }
        Err(e) => {
            debug!("Probe of '{}' failed: {}", program, e);
            false
        }
    }
}

// ── Cached capability ────────────────────────────────────────────────────────

/// Last known availability of a [`Capability`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Never probed, or reset after a launch failure.
    Unknown,
    /// The last probe succeeded.
    Available,
    /// The last probe failed.
    Unavailable,
}

/// An external tool whose presence is checked once and then trusted until
/// something goes wrong.
#[derive(Debug)]
pub struct Capability {
    program: String,
    probe_args: Vec<String>,
    probe_timeout: Duration,
    state: RwLock<Availability>,
}

impl Capability {
    /// Describe a tool by its executable name and a harmless probe argument
    /// list (typically a version flag).
    pub fn new<I, S>(program: impl Into<String>, probe_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            probe_args: probe_args.into_iter().map(Into::into).collect(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            state: RwLock::new(Availability::Unknown),
        }
    }

    /// Override the probe timeout (default: [`DEFAULT_PROBE_TIMEOUT`]).
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// The executable this capability runs.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// The cached availability, without probing.
    pub fn availability(&self) -> Availability {
        self.state
            .read()
            .map(|s| *s)
            .unwrap_or(Availability::Unknown)
    }

    /// Returns `true` if the tool is usable, probing only when the cached
    /// state is not [`Availability::Available`].
    pub async fn ensure(&self) -> bool {
        if self.availability() == Availability::Available {
            return true;
        }

        let ok = probe(&self.program, &self.probe_args, self.probe_timeout).await;
        let next = if ok {
            info!("External tool '{}' is available", self.program);
            Availability::Available
        } else {
            warn!("External tool '{}' is not available", self.program);
            Availability::Unavailable
        };
        self.set(next);
        ok
    }

    /// Forget a cached success so the next [`ensure`](Self::ensure) probes
    /// again.
    pub fn mark_failed(&self) {
        self.set(Availability::Unknown);
    }

    /// Run the tool with `args` under `timeout`.
    ///
    /// A launch failure resets the cached availability.
    pub async fn run<S: AsRef<OsStr>>(
        &self,
        args: &[S],
        timeout: Duration,
    ) -> Result<ExitStatus, ExecError> {
        let result = run(&self.program, args, timeout).await;
        if let Err(ref e) = result {
            if e.is_launch_failure() {
                self.mark_failed();
            }
        }
        result
    }

    fn set(&self, next: Availability) {
        if let Ok(mut state) = self.state.write() {
            *state = next;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const MISSING: &str = "exec-probe-definitely-not-installed-7f3a";

    #[tokio::test]
    async fn run_reports_exit_code() {
        let status = run("sh", &["-c", "exit 3"], Duration::from_secs(5))
            .await
            .expect("sh should run");
        assert_eq!(status.code(), Some(3));
    }

    #[tokio::test]
    async fn run_missing_program_is_not_found() {
        let err = run(MISSING, &["-v"], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::NotFound { .. }), "got: {err}");
        assert!(err.is_launch_failure());
    }

    #[tokio::test]
    async fn run_times_out_and_kills() {
        let err = run("sh", &["-c", "sleep 5"], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }), "got: {err}");
        assert!(!err.is_launch_failure());
    }

    #[tokio::test]
    async fn probe_distinguishes_success_and_failure() {
        assert!(probe("sh", &["-c", "true"], Duration::from_secs(5)).await);
        assert!(!probe("sh", &["-c", "false"], Duration::from_secs(5)).await);
        assert!(!probe(MISSING, &["-v"], Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn capability_caches_success() {
        let cap = Capability::new("sh", ["-c", "true"]);
        assert_eq!(cap.availability(), Availability::Unknown);
        assert!(cap.ensure().await);
        assert_eq!(cap.availability(), Availability::Available);
        cap.mark_failed();
        assert_eq!(cap.availability(), Availability::Unknown);
    }

    #[tokio::test]
    async fn capability_missing_tool_stays_unavailable() {
        let cap = Capability::new(MISSING, ["-v"]);
        assert!(!cap.ensure().await);
        assert_eq!(cap.availability(), Availability::Unavailable);
        let err = cap
            .run(&["whatever"], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_launch_failure());
        assert_eq!(cap.availability(), Availability::Unknown);
    }

    #[test]
    fn timeout_display_mentions_millis() {
        let e = ExecError::Timeout {
            program: "pdftoppm".into(),
            timeout: Duration::from_millis(1500),
        };
        assert!(e.to_string().contains("1500ms"), "got: {e}");
    }
}
