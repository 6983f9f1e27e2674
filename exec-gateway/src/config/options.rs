//! Options shared by CLI and TOML.

use super::AppSettings;
use commons::de::{de_duration_millis, de_duration_secs, de_path_prefix};
use commons::prelude_errors::*;
use commons::MergeOptions;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;

/// Options for the main execution service.
#[derive(Debug, Deserialize, Serialize, StructOpt)]
pub struct ServiceOptions {
    /// Address on which the server will listen
    #[structopt(name = "service_address", long = "service.address")]
    pub address: Option<IpAddr>,

    /// Port to which the server will bind
    #[structopt(name = "service_port", long = "service.port")]
    pub port: Option<u16>,

    /// Namespace prefix for all service endpoints (e.g. '/<prefix>/ws/execute')
    #[structopt(long = "service.path_prefix", parse(from_str = commons::parse_path_prefix))]
    #[serde(default = "Option::default", deserialize_with = "de_path_prefix")]
    pub path_prefix: Option<String>,
}

/// Status service options.
#[derive(Debug, Deserialize, Serialize, StructOpt)]
pub struct StatusOptions {
    /// Address on which the status service will listen
    #[structopt(name = "status_address", long = "status.address")]
    pub address: Option<IpAddr>,

    /// Port to which the status service will bind
    #[structopt(name = "status_port", long = "status.port")]
    pub port: Option<u16>,
}

/// Options for the execution engine.
#[derive(Debug, Deserialize, Serialize, StructOpt)]
pub struct ExecutionOptions {
    /// Wall-clock budget (in seconds) for one execution
    #[structopt(
        long = "execution.timeout_secs",
        parse(try_from_str = duration_from_secs)
    )]
    #[serde(default = "Option::default", deserialize_with = "de_duration_secs")]
    pub timeout_secs: Option<Duration>,

    /// Budget (in seconds) for the build step of compiled languages
    #[structopt(
        long = "execution.compilation_timeout_secs",
        parse(try_from_str = duration_from_secs)
    )]
    #[serde(default = "Option::default", deserialize_with = "de_duration_secs")]
    pub compilation_timeout_secs: Option<Duration>,

    /// Largest accepted source snippet, in bytes
    #[structopt(long = "execution.max_code_bytes")]
    pub max_code_bytes: Option<usize>,

    /// Job record lifetime, in seconds
    #[structopt(
        long = "execution.job_ttl_secs",
        parse(try_from_str = duration_from_secs)
    )]
    #[serde(default = "Option::default", deserialize_with = "de_duration_secs")]
    pub job_ttl_secs: Option<Duration>,

    /// Access-token lifetime, in seconds
    #[structopt(
        long = "execution.token_ttl_secs",
        parse(try_from_str = duration_from_secs)
    )]
    #[serde(default = "Option::default", deserialize_with = "de_duration_secs")]
    pub token_ttl_secs: Option<Duration>,

    /// Read size on the pty master, in bytes
    #[structopt(long = "execution.pty_chunk_bytes")]
    pub pty_chunk_bytes: Option<usize>,

    /// Idle pacing of the pty supervision loop, in milliseconds
    #[structopt(
        long = "execution.pty_poll_interval_ms",
        parse(try_from_str = duration_from_millis)
    )]
    #[serde(default = "Option::default", deserialize_with = "de_duration_millis")]
    pub pty_poll_interval_ms: Option<Duration>,
}

/// Options for the sandbox wrapper.
#[derive(Debug, Deserialize, Serialize, StructOpt)]
pub struct SandboxOptions {
    /// Path of the sandbox wrapper binary
    #[structopt(long = "sandbox.binary")]
    pub binary: Option<PathBuf>,

    /// Path of the sandbox profile handed to the wrapper
    #[structopt(long = "sandbox.profile")]
    pub profile: Option<PathBuf>,

    /// Address-space limit for supervised programs, in MiB
    #[structopt(long = "sandbox.max_memory_mib")]
    pub max_memory_mib: Option<u64>,

    /// File-size limit for supervised programs, in MiB
    #[structopt(long = "sandbox.max_file_size_mib")]
    pub max_file_size_mib: Option<u64>,

    /// Open-descriptor cap for supervised programs
    #[structopt(long = "sandbox.max_open_files")]
    pub max_open_files: Option<u64>,
}

impl MergeOptions<Option<ServiceOptions>> for AppSettings {
    fn try_merge(&mut self, opts: Option<ServiceOptions>) -> Fallible<()> {
        if let Some(service) = opts {
            assign_if_some!(self.address, service.address);
            assign_if_some!(self.port, service.port);
            assign_if_some!(self.path_prefix, service.path_prefix);
        }
        Ok(())
    }
}

impl MergeOptions<Option<StatusOptions>> for AppSettings {
    fn try_merge(&mut self, opts: Option<StatusOptions>) -> Fallible<()> {
        if let Some(status) = opts {
            assign_if_some!(self.status_address, status.address);
            assign_if_some!(self.status_port, status.port);
        }
        Ok(())
    }
}

impl MergeOptions<Option<ExecutionOptions>> for AppSettings {
    fn try_merge(&mut self, opts: Option<ExecutionOptions>) -> Fallible<()> {
        if let Some(execution) = opts {
            assign_if_some!(self.execution_timeout, execution.timeout_secs);
            assign_if_some!(
                self.compilation_timeout,
                execution.compilation_timeout_secs
            );
            assign_if_some!(self.max_code_bytes, execution.max_code_bytes);
            assign_if_some!(self.job_ttl, execution.job_ttl_secs);
            assign_if_some!(self.token_ttl, execution.token_ttl_secs);
            assign_if_some!(self.pty_chunk_bytes, execution.pty_chunk_bytes);
            assign_if_some!(self.pty_poll_interval, execution.pty_poll_interval_ms);
        }
        Ok(())
    }
}

impl MergeOptions<Option<SandboxOptions>> for AppSettings {
    fn try_merge(&mut self, opts: Option<SandboxOptions>) -> Fallible<()> {
        if let Some(sandbox) = opts {
            assign_if_some!(self.sandbox_binary, sandbox.binary.map(Some));
            assign_if_some!(self.sandbox_profile, sandbox.profile.map(Some));
            assign_if_some!(self.max_memory_mib, sandbox.max_memory_mib);
            assign_if_some!(self.max_file_size_mib, sandbox.max_file_size_mib);
            assign_if_some!(self.max_open_files, sandbox.max_open_files);
        }
        Ok(())
    }
}

pub fn duration_from_secs<S>(num: S) -> Fallible<Duration>
where
    S: AsRef<str>,
{
    let secs: u64 = num.as_ref().parse()?;
    Ok(Duration::from_secs(secs))
}

pub fn duration_from_millis<S>(num: S) -> Fallible<Duration>
where
    S: AsRef<str>,
{
    let millis: u64 = num.as_ref().parse()?;
    Ok(Duration::from_millis(millis))
}
