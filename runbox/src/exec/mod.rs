//! Executors: sandboxed subprocess supervision with pty streaming.
//!
//! An executor owns one child process attached to a fresh pseudoterminal.
//! It streams raw terminal bytes to a callback as they arrive, feeds bytes
//! from an input queue back into the terminal, and enforces the wall-clock
//! limit by killing the child's process group. The private working
//! directory and every descriptor are released on all exit paths.

mod compiled;
mod interpreted;
mod pty;
mod sandbox;

pub use self::compiled::CompiledExecutor;
pub use self::interpreted::InterpretedExecutor;
pub use self::sandbox::SandboxSettings;

use crate::{ExecutionReport, Language};
use commons::prelude_errors::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked synchronously with each chunk read from the pty
/// master, in arrival order.
pub type OutputCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Receiving end of the per-job input bridge. The cooperative side owns
/// the sender; the supervision loop drains it without blocking.
pub type InputQueue = tokio::sync::mpsc::Receiver<Vec<u8>>;

/// Capacity of the input bridge between socket and pty loop.
pub const INPUT_QUEUE_CAPACITY: usize = 64;

/// Cooperative stop signal, observed by the supervision loop at its next
/// poll tick.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Fresh, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination of the supervised child.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether termination has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tunable execution policy, one per deployment.
#[derive(Clone, Debug, SmartDefault)]
pub struct ExecPolicy {
    /// Wall-clock budget for the run phase.
    #[default(Duration::from_secs(7))]
    pub execution_timeout: Duration,

    /// Budget for the build phase of compiled languages.
    #[default(Duration::from_secs(10))]
    pub compilation_timeout: Duration,

    /// Read size on the pty master.
    #[default(4096)]
    pub pty_chunk_bytes: usize,

    /// Idle pacing of the supervision loop.
    #[default(Duration::from_millis(10))]
    pub pty_poll_interval: Duration,

    /// Pause between the terminate and kill signals.
    #[default(Duration::from_millis(500))]
    pub kill_grace: Duration,

    /// Sandbox wrapper configuration.
    pub sandbox: SandboxSettings,
}

/// A language executor.
///
/// `execute` blocks for the lifetime of the child; callers run it on a
/// dedicated worker. An `Err` means the engine failed (spawn, sandbox, or
/// I/O trouble) before or outside the user program; everything the user
/// program does, including dying on a signal or failing to compile, comes
/// back as an `Ok` report.
pub trait Executor: Send + Sync {
    /// Run one snippet to completion.
    fn execute(
        &self,
        source: &str,
        filename: &str,
        on_output: OutputCallback,
        input: InputQueue,
        cancel: CancelFlag,
    ) -> Fallible<ExecutionReport>;
}

/// Executor for a language under a given policy.
pub fn executor_for(language: Language, policy: ExecPolicy) -> Box<dyn Executor> {
    if language.is_compiled() {
        Box::new(CompiledExecutor::new(language, policy))
    } else {
        Box::new(InterpretedExecutor::new(language, policy))
    }
}

/// Create the private working directory for one execution.
fn private_workdir() -> Fallible<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix("runbox-")
        .tempdir()
        .context("could not create private working directory")
}

/// Write the snippet into the workdir under its validated file name.
fn write_source(workdir: &Path, filename: &str, source: &str) -> Fallible<PathBuf> {
    let path = workdir.join(filename);
    std::fs::write(&path, source).context("could not write source file")?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_roundtrip() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        let clone = flag.clone();
        clone.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn policy_defaults_match_deployment_defaults() {
        let policy = ExecPolicy::default();
        assert_eq!(policy.execution_timeout, Duration::from_secs(7));
        assert_eq!(policy.compilation_timeout, Duration::from_secs(10));
        assert_eq!(policy.pty_chunk_bytes, 4096);
        assert_eq!(policy.pty_poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn workdir_is_removed_on_drop() -> Fallible<()> {
        let path = {
            let workdir = private_workdir()?;
            write_source(workdir.path(), "main.py", "print(1)")?;
            assert!(workdir.path().join("main.py").exists());
            workdir.path().to_path_buf()
        };
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn executor_family_selection() {
        for language in &[Language::Python, Language::Javascript] {
            assert!(!language.is_compiled());
        }
        for language in &[Language::C, Language::Cpp, Language::Rust] {
            assert!(language.is_compiled());
        }
        // Both variants construct under the default policy.
        let _ = executor_for(Language::Python, ExecPolicy::default());
        let _ = executor_for(Language::C, ExecPolicy::default());
    }
}
