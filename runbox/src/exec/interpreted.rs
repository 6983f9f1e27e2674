//! Single-phase executors for interpreted languages.

use super::{pty, sandbox, CancelFlag, ExecPolicy, Executor, InputQueue, OutputCallback};
use crate::{ExecutionReport, Language};
use commons::prelude_errors::*;

/// Executor that hands the source straight to an interpreter.
pub struct InterpretedExecutor {
    language: Language,
    policy: ExecPolicy,
}

impl InterpretedExecutor {
    /// Executor for one interpreted language.
    pub fn new(language: Language, policy: ExecPolicy) -> Self {
        Self { language, policy }
    }

    fn command(&self, source_file: &str) -> Vec<String> {
        let interpreter = match self.language {
            Language::Javascript => "node",
            // The dispatcher only routes interpreted languages here.
            _ => "python3",
        };
        vec![interpreter.to_string(), source_file.to_string()]
    }
}

impl Executor for InterpretedExecutor {
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

        let argv = self.command(filename);
        debug!("running {} via {:?}", self.language, argv);
        let cmd = sandbox::wrap(&self.policy, workdir.path(), &argv);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_templates() {
        let python = InterpretedExecutor::new(Language::Python, ExecPolicy::default());
        assert_eq!(python.command("main.py"), vec!["python3", "main.py"]);

        let node = InterpretedExecutor::new(Language::Javascript, ExecPolicy::default());
        assert_eq!(node.command("main.js"), vec!["node", "main.js"]);
    }
}
