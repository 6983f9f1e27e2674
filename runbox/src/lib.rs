// Copyright 2025 The runbox authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Core engine of the execution backend.
//!
//! This crate holds the job data model, the static source validator, the
//! job-store and message-bus adapters, and the executor family that drives
//! sandboxed child processes behind a pseudoterminal. The WebSocket-facing
//! session driver lives in the `exec-gateway` crate.

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate smart_default;

pub mod bus;
pub mod exec;
pub mod store;
pub mod validate;

use commons::ExecutionError;
use std::str::FromStr;

/// Exit code reported when the build step of a compiled language fails.
pub const EXIT_CODE_COMPILE_FAILURE: i32 = -1;

/// Exit code reported when an execution is killed at the wall-clock limit.
pub const EXIT_CODE_KILLED: i32 = -9;

/// Languages accepted by the execution engine.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Serialize,
    Eq,
    Hash,
    PartialEq,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Language {
    /// CPython, run through `python3`.
    Python,
    /// Node.js.
    Javascript,
    /// C, compiled with `gcc`.
    C,
    /// C++, compiled with `g++`.
    Cpp,
    /// Rust, compiled with `rustc`.
    Rust,
}

impl Language {
    /// Whether this language needs a build step before running.
    pub fn is_compiled(&self) -> bool {
        match self {
            Language::Python | Language::Javascript => false,
            Language::C | Language::Cpp | Language::Rust => true,
        }
    }

    /// Parse a client-supplied language tag.
    pub fn parse(tag: &str) -> Result<Self, ExecutionError> {
        Self::from_str(tag).map_err(|_| ExecutionError::UnsupportedLanguage(tag.to_string()))
    }
}

/// Lifecycle states of a job. Transitions are monotone and one-way;
/// `Completed` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    /// Created, not yet picked up by a session.
    Queued,
    /// Attached to a session and executing.
    Processing,
    /// Finished, successfully or not; a report is available.
    Completed,
    /// Aborted by an engine-side failure; an error message is available.
    Failed,
}

impl JobStatus {
    /// Whether the status admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        match self {
            JobStatus::Completed | JobStatus::Failed => true,
            JobStatus::Queued | JobStatus::Processing => false,
        }
    }
}

/// Final outcome of one execution.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ExecutionReport {
    /// Whether the program exited with status zero.
    pub success: bool,
    /// Child exit status; negative values are engine-assigned
    /// ([`EXIT_CODE_COMPILE_FAILURE`], [`EXIT_CODE_KILLED`]).
    pub exit_code: i32,
    /// Wall-clock runtime in seconds.
    pub elapsed_secs: f64,
    /// Captured terminal output. The pty merges the child's stdout and
    /// stderr into this single stream.
    pub stdout: String,
    /// Out-of-band diagnostics: sanitized build logs, spawn errors. Empty
    /// for programs that ran.
    pub stderr: String,
}

impl ExecutionReport {
    /// Report for a failure that happened before the program could run.
    pub fn out_of_band(exit_code: i32, elapsed_secs: f64, stderr: String) -> Self {
        Self {
            success: false,
            exit_code,
            elapsed_secs,
            stdout: String::new(),
            stderr,
        }
    }
}

/// A single user submission with its lifecycle record.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Job {
    /// Opaque, collision-resistant identifier.
    pub id: String,
    /// Submitted source text.
    pub source: String,
    /// Language tag.
    pub language: Language,
    /// File name used on disk for the executor's source file.
    pub filename: String,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Creation time.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Completion time, present in terminal states.
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Execution outcome, present in terminal states.
    pub report: Option<ExecutionReport>,
    /// Engine-side failure message, present iff status is `Failed`.
    pub error: Option<String>,
}

static FILENAME_TOKEN_REGEX_STR: &str = r"^[A-Za-z0-9_.-]+$";

lazy_static! {
    static ref FILENAME_TOKEN_RE: regex::Regex =
        regex::Regex::new(FILENAME_TOKEN_REGEX_STR).expect("could not create filename regex");
}

/// Check a source file name against the accepted token shape.
///
/// Accepted names match `[A-Za-z0-9_.-]+`, which excludes path separators
/// and whitespace; the dot-only names `.` and `..` are refused as well.
pub fn validate_filename(filename: &str) -> Result<(), ExecutionError> {
    let well_formed = FILENAME_TOKEN_RE.is_match(filename)
        && filename != "."
        && filename != ".."
        && !filename.contains("..");
    if well_formed {
        Ok(())
    } else {
        Err(ExecutionError::InvalidFilename(filename.to_string()))
    }
}

/// Check submitted source text against the configured byte budget.
pub fn validate_source_size(source: &str, max_bytes: usize) -> Result<(), ExecutionError> {
    if source.len() > max_bytes {
        return Err(ExecutionError::CodeTooLarge(source.len(), max_bytes));
    }
    Ok(())
}

/// Derive the canonical source file name for a language.
pub fn default_filename(language: Language) -> String {
    let extension = match language {
        Language::Python => "py",
        Language::Javascript => "js",
        Language::C => "c",
        Language::Cpp => "cpp",
        Language::Rust => "rs",
    };
    format!("main.{}", extension)
}

/// Generate an opaque job identifier with at least 128 bits of entropy.
pub fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
