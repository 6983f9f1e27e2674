//! Application settings for the execution gateway.

use super::{cli, file};
use commons::prelude_errors::*;
use commons::MergeOptions;
use runbox::exec::{ExecPolicy, SandboxSettings};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;

/// Runtime application settings (validated config).
#[derive(Clone, Debug, SmartDefault)]
pub struct AppSettings {
    /// Listening address for the main service.
    #[default(IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub address: IpAddr,

    /// Listening port for the main service.
    #[default(8080)]
    pub port: u16,

    /// Endpoints namespace for the main service.
    pub path_prefix: String,

    /// Listening address for the status service.
    #[default(IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub status_address: IpAddr,

    /// Listening port for the status service.
    #[default(9080)]
    pub status_port: u16,

    /// Global log level.
    #[default(log::LevelFilter::Warn)]
    pub verbosity: log::LevelFilter,

    /// Wall-clock budget for one execution.
    #[default(Duration::from_secs(7))]
    pub execution_timeout: Duration,

    /// Budget for the build step of compiled languages.
    #[default(Duration::from_secs(10))]
    pub compilation_timeout: Duration,

    /// Largest accepted source snippet.
    #[default(10_240)]
    pub max_code_bytes: usize,

    /// Job record lifetime.
    #[default(Duration::from_secs(3600))]
    pub job_ttl: Duration,

    /// Access-token lifetime; must stay below the job lifetime.
    #[default(Duration::from_secs(120))]
    pub token_ttl: Duration,

    /// Read size on the pty master.
    #[default(4096)]
    pub pty_chunk_bytes: usize,

    /// Idle pacing of the pty supervision loop.
    #[default(Duration::from_millis(10))]
    pub pty_poll_interval: Duration,

    /// Sandbox wrapper binary; unset disables wrapping (tests only).
    pub sandbox_binary: Option<PathBuf>,

    /// Sandbox profile handed to the wrapper.
    pub sandbox_profile: Option<PathBuf>,

    /// Address-space limit for supervised programs, in MiB.
    #[default(300)]
    pub max_memory_mib: u64,

    /// File-size limit for supervised programs, in MiB.
    #[default(1)]
    pub max_file_size_mib: u64,

    /// Open-descriptor cap for supervised programs.
    #[default(64)]
    pub max_open_files: u64,
}

impl AppSettings {
    /// Lookup all optional configs, merge them with defaults, and
    /// transform into valid runtime settings.
    pub fn assemble() -> Fallible<Self> {
        // Source options.
        let cli_opts = cli::CliOptions::from_args();
        let file_opts = match &cli_opts.config_path {
            Some(path) => Some(file::FileOptions::read_filepath(path)?),
            None => None,
        };

        // Combine options into a single config.
        let mut cfg = Self::default();
        cfg.try_merge(cli_opts)?;
        cfg.try_merge(file_opts)?;

        // Validate and convert to settings.
        cfg.try_validate()
    }

    /// Execution policy handed to the executor family.
    pub fn exec_policy(&self) -> ExecPolicy {
        ExecPolicy {
            execution_timeout: self.execution_timeout,
            compilation_timeout: self.compilation_timeout,
            pty_chunk_bytes: self.pty_chunk_bytes,
            pty_poll_interval: self.pty_poll_interval,
            sandbox: SandboxSettings {
                binary: self.sandbox_binary.clone(),
                profile: self.sandbox_profile.clone(),
                max_memory_mib: self.max_memory_mib,
                max_file_size_mib: self.max_file_size_mib,
                max_open_files: self.max_open_files,
            },
            ..ExecPolicy::default()
        }
    }

    /// Validate and build runtime settings.
    fn try_validate(self) -> Fallible<Self> {
        ensure!(
            self.execution_timeout.as_secs() > 0,
            "unexpected 0s execution timeout"
        );
        ensure!(
            self.compilation_timeout.as_secs() > 0,
            "unexpected 0s compilation timeout"
        );
        ensure!(self.max_code_bytes > 0, "unexpected 0-byte code budget");
        ensure!(
            self.token_ttl < self.job_ttl,
            "token TTL must stay below the job TTL"
        );
        ensure!(
            self.pty_poll_interval < Duration::from_secs(1),
            "pty poll interval above one second"
        );
        Ok(self)
    }
}

impl MergeOptions<cli::CliOptions> for AppSettings {
    fn try_merge(&mut self, opts: cli::CliOptions) -> Fallible<()> {
        self.verbosity = match opts.verbosity {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };
        self.try_merge(Some(opts.service))?;
        self.try_merge(Some(opts.status))?;
        self.try_merge(Some(opts.execution))?;
        self.try_merge(Some(opts.sandbox))?;
        Ok(())
    }
}

impl MergeOptions<Option<file::FileOptions>> for AppSettings {
    fn try_merge(&mut self, opts: Option<file::FileOptions>) -> Fallible<()> {
        if let Some(file) = opts {
            assign_if_some!(self.verbosity, file.verbosity);
            self.try_merge(file.service)?;
            self.try_merge(file.status)?;
            self.try_merge(file.execution)?;
            self.try_merge(file.sandbox)?;
        }
        Ok(())
    }
}
