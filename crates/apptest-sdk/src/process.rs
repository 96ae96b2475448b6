//! Native process execution.
//!
//! [`ProcessRunner`] is the single seam to native toolchains: it spawns a
//! command, streams its output into a bounded tail, and reports the exit
//! status. The child handle is held in a scope guard so the process is
//! killed and reaped on every exit path - normal completion, timeout,
//! cancellation, and I/O errors - leaving no orphaned build processes.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// How often the runner checks the child, the cancel flag, and the deadline.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Maximum number of output lines retained in the tail.
const DEFAULT_TAIL_LINES: usize = 200;

/// Cooperative cancellation flag shared between the caller and a running
/// pipeline stage. Cloning produces another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code; -1 if the process was terminated by a signal.
    pub exit_code: i32,
    /// Tail of merged stdout/stderr, newest lines last.
    pub tail: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Errors from spawning or supervising a native process.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("program '{program}' not found")]
    NotFound { program: String },

    #[error("program '{program}' exceeded the {timeout_secs}s timeout and was killed")]
    TimedOut { program: String, timeout_secs: u64 },

    #[error("program '{program}' cancelled")]
    Cancelled { program: String },

    #[error("I/O error running process: {0}")]
    Io(#[from] std::io::Error),
}

/// Spawns native build/test tools with output capture, a wall-clock timeout,
/// and cooperative cancellation.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
    cancel: CancelToken,
    tail_lines: usize,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self {
            timeout: None,
            cancel: CancelToken::new(),
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }

    /// Bounds the total runtime of the child process.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Shares a cancellation flag with the caller.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs `program` with `args` in `cwd` and waits for it to finish.
    ///
    /// The child is killed if the timeout elapses or the cancel token fires;
    /// in both cases it is also reaped before this returns.
    pub fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<ProcessOutput, ProcessError> {
        let child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    ProcessError::NotFound {
                        program: program.to_string(),
                    }
                } else {
                    ProcessError::Io(err)
                }
            })?;

        let mut guard = ChildGuard::new(child);
        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(self.tail_lines)));

        let stdout = guard.child.stdout.take();
        let stderr = guard.child.stderr.take();
        let mut readers = Vec::new();
        if let Some(stream) = stdout {
            readers.push(spawn_tail_reader(stream, Arc::clone(&tail), self.tail_lines));
        }
        if let Some(stream) = stderr {
            readers.push(spawn_tail_reader(stream, Arc::clone(&tail), self.tail_lines));
        }

        let started = Instant::now();
        loop {
            if let Some(status) = guard.child.try_wait()? {
                guard.mark_reaped();
                for reader in readers {
                    let _ = reader.join();
                }
                let tail = drain_tail(&tail);
                return Ok(ProcessOutput {
                    exit_code: status.code().unwrap_or(-1),
                    tail,
                });
            }

            if self.cancel.is_cancelled() {
                // Guard drop kills and reaps the child.
                return Err(ProcessError::Cancelled {
                    program: program.to_string(),
                });
            }

            if let Some(timeout) = self.timeout {
                if started.elapsed() >= timeout {
                    return Err(ProcessError::TimedOut {
                        program: program.to_string(),
                        timeout_secs: timeout.as_secs(),
                    });
                }
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Holds the child handle and guarantees kill + reap unless the process was
/// already waited on.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    fn mark_reaped(&mut self) {
        self.reaped = true;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.reaped {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

fn spawn_tail_reader<R: Read + Send + 'static>(
    stream: R,
    tail: Arc<Mutex<VecDeque<String>>>,
    limit: usize,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let Ok(line) = line else { break };
            let mut tail = tail.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if tail.len() == limit {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    })
}

fn drain_tail(tail: &Arc<Mutex<VecDeque<String>>>) -> String {
    let tail = tail.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    tail.iter().cloned().collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cwd() -> PathBuf {
        std::env::temp_dir()
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    #[cfg(unix)]
    fn captures_exit_code_and_tail() {
        let output = ProcessRunner::new()
            .run("sh", &sh("echo building; echo oops >&2; exit 0"), &cwd())
            .unwrap();
        assert!(output.success());
        assert!(output.tail.contains("building"));
        assert!(output.tail.contains("oops"));
    }

    #[test]
    #[cfg(unix)]
    fn reports_nonzero_exit() {
        let output = ProcessRunner::new().run("sh", &sh("exit 65"), &cwd()).unwrap();
        assert!(!output.success());
        assert_eq!(output.exit_code, 65);
    }

    #[test]
    fn missing_program_is_not_found() {
        let err = ProcessRunner::new()
            .run("definitely-not-a-real-tool-xyz", &[], &cwd())
            .unwrap_err();
        assert!(matches!(err, ProcessError::NotFound { .. }));
    }

    #[test]
    #[cfg(unix)]
    fn kills_child_on_timeout() {
        let started = Instant::now();
        let err = ProcessRunner::new()
            .with_timeout(Duration::from_millis(300))
            .run("sh", &sh("sleep 30"), &cwd())
            .unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
        // The sleep must not run to completion.
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    #[cfg(unix)]
    fn kills_child_on_cancellation() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let started = Instant::now();
        let err = ProcessRunner::new()
            .with_cancel(cancel)
            .run("sh", &sh("sleep 30"), &cwd())
            .unwrap_err();
        assert!(matches!(err, ProcessError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    #[cfg(unix)]
    fn tail_is_bounded() {
        let output = ProcessRunner::new()
            .run("sh", &sh("i=0; while [ $i -lt 500 ]; do echo line-$i; i=$((i+1)); done"), &cwd())
            .unwrap();
        let lines: Vec<&str> = output.tail.lines().collect();
        assert!(lines.len() <= DEFAULT_TAIL_LINES);
        assert_eq!(*lines.last().unwrap(), "line-499");
    }
}
