//! Two-phase executors for compiled languages: a blocking build step with
//! its own timeout, then a supervised run of the produced binary.

use super::{pty, sandbox, CancelFlag, ExecPolicy, Executor, InputQueue, OutputCallback};
use crate::{ExecutionReport, Language, EXIT_CODE_COMPILE_FAILURE};
use commons::prelude_errors::*;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Name of the produced binary inside the workdir.
const BINARY_NAME: &str = "program";

/// Pacing of the build wait loop.
const BUILD_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Executor that builds the source and then runs the binary.
pub struct CompiledExecutor {
    language: Language,
    policy: ExecPolicy,
}

impl CompiledExecutor {
    /// Executor for one compiled language.
    pub fn new(language: Language, policy: ExecPolicy) -> Self {
        Self { language, policy }
    }

    fn build_argv(&self, source_file: &str) -> Vec<String> {
        let source = source_file.to_string();
        let binary = BINARY_NAME.to_string();
        match self.language {
            Language::Cpp => vec![
                "g++".to_string(),
                source,
                "-o".to_string(),
                binary,
                "-std=c++17".to_string(),
            ],
            Language::Rust => vec!["rustc".to_string(), source, "-o".to_string(), binary],
            // The dispatcher only routes compiled languages here.
            _ => vec![
                "gcc".to_string(),
                source,
                "-o".to_string(),
                binary,
                "-std=c11".to_string(),
                "-lm".to_string(),
            ],
        }
    }
}

impl Executor for CompiledExecutor {
    fn execute(
        &self,
        source: &str,
        filename: &str,
        on_output: OutputCallback,
        input: InputQueue,
        cancel: CancelFlag,
    ) -> Fallible<ExecutionReport> {
        let workdir = super::private_workdir()?;
        super::write_source(workdir.path(), filename, source)?;

        let build_argv = self.build_argv(filename);
        debug!("building {} via {:?}", self.language, build_argv);
        let build = run_build(workdir.path(), &build_argv, self.policy.compilation_timeout)?;
        if !build.success {
            let log = if build.timed_out {
                format!(
                    "compilation timed out after {} seconds",
                    self.policy.compilation_timeout.as_secs()
                )
            } else {
                sanitize_build_log(&String::from_utf8_lossy(&build.log), workdir.path())
            };
            return Ok(ExecutionReport::out_of_band(
                EXIT_CODE_COMPILE_FAILURE,
                build.elapsed.as_secs_f64(),
                log,
            ));
        }

        let run_argv = vec![format!("./{}", BINARY_NAME)];
        let cmd = sandbox::wrap(&self.policy, workdir.path(), &run_argv);
        let outcome = pty::supervise(cmd, &self.policy, on_output, input, cancel)?;

        Ok(ExecutionReport {
            success: outcome.exit_code == 0,
            exit_code: outcome.exit_code,
            elapsed_secs: outcome.elapsed.as_secs_f64(),
            stdout: String::from_utf8_lossy(&outcome.captured).into_owned(),
            stderr: String::new(),
        })
    }
}

struct BuildOutcome {
    success: bool,
    timed_out: bool,
    log: Vec<u8>,
    elapsed: Duration,
}

/// Run the build command to completion, capturing its output, with a hard
/// deadline.
fn run_build(workdir: &Path, argv: &[String], timeout: Duration) -> Fallible<BuildOutcome> {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let start = Instant::now();
    let mut child = cmd.spawn().context("could not spawn build command")?;

    // Reader threads keep the pipes drained; a chatty compiler must not
    // deadlock against a full pipe buffer.
    let mut stdout_pipe = child.stdout.take().context("build stdout not piped")?;
    let mut stderr_pipe = child.stderr.take().context("build stderr not piped")?;
    let stdout_reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf);
        buf
    });
    let stderr_reader = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf);
        buf
    });

    let mut timed_out = false;
    let status = loop {
        if let Some(status) = child.try_wait().context("could not poll build status")? {
            break status;
        }
        if start.elapsed() >= timeout {
            timed_out = true;
            let _ = child.kill();
            break child.wait().context("could not reap build command")?;
        }
        std::thread::sleep(BUILD_POLL_INTERVAL);
    };

    let mut log = stderr_reader.join().unwrap_or_default();
    let stdout_bytes = stdout_reader.join().unwrap_or_default();
    log.extend_from_slice(&stdout_bytes);

    Ok(BuildOutcome {
        success: !timed_out && status.success(),
        timed_out,
        log,
        elapsed: start.elapsed(),
    })
}

/// Strip the temporary directory from a build log so only the logical
/// file name leaks to the user.
fn sanitize_build_log(log: &str, workdir: &Path) -> String {
    let dir = workdir.to_string_lossy();
    log.replace(&format!("{}/", dir), "")
        .replace(dir.as_ref(), "")
}
