//! Common utilities for the execution backend.

#![deny(missing_docs)]

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate serde_json;

mod config;
pub use crate::config::MergeOptions;

pub mod de;

mod errors;
pub use crate::errors::{register_metrics, ExecutionError, Fallible};

pub mod prelude_errors {
    //! Error-handling prelude, for wildcard imports.
    pub use crate::errors::Fallible;
    pub use anyhow::{anyhow, bail, ensure, format_err, Context, Error};
}

pub mod metrics;
pub mod testing;

/// Strip all but one leading slash and all trailing slashes
pub fn parse_path_prefix<S>(path_prefix: S) -> String
where
    S: AsRef<str>,
{
    format!("/{}", path_prefix.as_ref().to_string().trim_matches('/'))
}
