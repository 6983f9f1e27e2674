//! TOML file configuration options.

use super::options;
use commons::prelude_errors::*;
use std::io::Read;
use std::{fs, io, path};

/// TOML configuration, top-level.
#[derive(Debug, Deserialize)]
pub struct FileOptions {
    /// Verbosity level.
    #[serde(default = "Option::default", deserialize_with = "commons::de::de_loglevel")]
    pub verbosity: Option<log::LevelFilter>,

    /// Main service options.
    pub service: Option<options::ServiceOptions>,

    /// Status service options.
    pub status: Option<options::StatusOptions>,

    /// Execution engine options.
    pub execution: Option<options::ExecutionOptions>,

    /// Sandbox wrapper options.
    pub sandbox: Option<options::SandboxOptions>,
}

impl FileOptions {
    /// Parse a TOML configuration file.
    pub fn read_filepath<P: AsRef<path::Path>>(cfg_path: P) -> Fallible<Self> {
        let cfg_file = fs::File::open(&cfg_path).context(format!(
            "failed to open config path {:?}",
            cfg_path.as_ref()
        ))?;
        let mut bufrd = io::BufReader::new(cfg_file);

        let mut content = String::new();
        bufrd.read_to_string(&mut content)?;
        let cfg = toml::from_str(&content).context(format!(
            "failed to read config file {}",
            cfg_path.as_ref().display()
        ))?;

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_sample_config() -> Fallible<()> {
        let sample = r#"
            verbosity = 2

            [service]
            address = "0.0.0.0"
            port = 8080
            path_prefix = "run"

            [execution]
            timeout_secs = 5
            max_code_bytes = 4096
            pty_poll_interval_ms = 20

            [sandbox]
            binary = "/usr/local/bin/boxwrap"
            max_memory_mib = 128
        "#;
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(sample.as_bytes())?;

        let opts = FileOptions::read_filepath(file.path())?;
        assert_eq!(opts.verbosity, Some(log::LevelFilter::Debug));

        let service = opts.service.unwrap();
        assert_eq!(service.port, Some(8080));
        assert_eq!(service.path_prefix.as_deref(), Some("/run"));

        let execution = opts.execution.unwrap();
        assert_eq!(
            execution.timeout_secs,
            Some(std::time::Duration::from_secs(5))
        );
        assert_eq!(
            execution.pty_poll_interval_ms,
            Some(std::time::Duration::from_millis(20))
        );

        let sandbox = opts.sandbox.unwrap();
        assert_eq!(sandbox.max_memory_mib, Some(128));
        Ok(())
    }

    #[test]
    fn missing_config_file_is_an_error() {
        assert!(FileOptions::read_filepath("/nonexistent/config.toml").is_err());
    }
}
