//! Sandbox wrapper invocation.
//!
//! The wrapper binary and its profile are external collaborators: they
//! provide the no-network, no-ambient-root, private-filesystem view and
//! the seccomp filter. This module only knows the wrapper by name and by
//! its fixed argv shape. A spawn failure of the wrapper is an engine
//! error, never a user-program error.

use super::ExecPolicy;
use std::path::PathBuf;
use std::process::Command;

/// Sandbox wrapper configuration.
#[derive(Clone, Debug, SmartDefault)]
pub struct SandboxSettings {
    /// Wrapper binary. When unset the command is spawned directly inside
    /// the private workdir; test configurations rely on this, deployments
    /// must not.
    pub binary: Option<PathBuf>,

    /// Profile file handed to the wrapper (seccomp policy and mount plan).
    pub profile: Option<PathBuf>,

    /// Address-space limit for the supervised program.
    #[default(300)]
    pub max_memory_mib: u64,

    /// Largest file the supervised program may create.
    #[default(1)]
    pub max_file_size_mib: u64,

    /// Open-descriptor cap for the supervised program.
    #[default(64)]
    pub max_open_files: u64,
}

/// Build the command for one supervised program, prefixing the sandbox
/// wrapper when configured.
pub(crate) fn wrap(policy: &ExecPolicy, workdir: &std::path::Path, argv: &[String]) -> Command {
    let settings = &policy.sandbox;
    let mut cmd = match &settings.binary {
        Some(binary) => {
            let mut cmd = Command::new(binary);
            if let Some(profile) = &settings.profile {
                cmd.arg("--profile").arg(profile);
            }
            cmd.arg("--workdir").arg(workdir);
            cmd.arg("--memory-limit-mib")
                .arg(settings.max_memory_mib.to_string());
            // CPU limit tracks the wall-clock timeout.
            cmd.arg("--cpu-limit-secs")
                .arg(policy.execution_timeout.as_secs().max(1).to_string());
            cmd.arg("--file-size-limit-mib")
                .arg(settings.max_file_size_mib.to_string());
            cmd.arg("--open-files-limit")
                .arg(settings.max_open_files.to_string());
            cmd.arg("--deny-network");
            cmd.arg("--");
            cmd.args(argv);
            cmd
        }
        None => {
            let mut cmd = Command::new(&argv[0]);
            cmd.args(&argv[1..]);
            cmd
        }
    };
    cmd.current_dir(workdir);
    cmd
}
