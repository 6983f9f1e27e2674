//! Deserializers.

use std::time::Duration;

/// Deserialize a log-level from a numerical value.
pub fn de_loglevel<'de, D>(deserializer: D) -> Result<Option<log::LevelFilter>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    let numlevel = u8::deserialize(deserializer)?;

    let verbosity = match numlevel {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    Ok(Some(verbosity))
}

/// Deserialize a duration from a number of seconds.
pub fn de_duration_secs<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    let secs = u64::deserialize(deserializer)?;
    Ok(Some(Duration::from_secs(secs)))
}

/// Deserialize a duration from a number of milliseconds.
pub fn de_duration_millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    let millis = u64::deserialize(deserializer)?;
    Ok(Some(Duration::from_millis(millis)))
}

/// Deserialize a path prefix, normalizing leading and trailing slashes.
pub fn de_path_prefix<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    let prefix = String::deserialize(deserializer)?;
    Ok(Some(crate::parse_path_prefix(prefix)))
}
