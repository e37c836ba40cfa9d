//! Error kinds surfaced by the ARM core
//!
//! Functions return `anyhow::Result`; the variants below are raised where a
//! caller may need to tell failure kinds apart (`downcast_ref::<ArmError>()`).

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArmError {
    /// A named resource is absent (registry, sink, dependency, package, version)
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Malformed input (JSON, version, constraint, archive)
    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    /// Version resolution found no candidate
    #[error("no version satisfies constraint '{constraint}' (available: {available})")]
    NoMatchingVersion {
        constraint: String,
        available: String,
    },

    /// Well-formed input that breaks an invariant
    #[error("invalid {what}: {message}")]
    Validation { what: String, message: String },

    /// Non-success HTTP response from a registry backend
    #[error("HTTP {status} from {url}: {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    /// A git subprocess exited unsuccessfully
    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    /// Missing or rejected credentials
    #[error("authentication failed for {target}: {message}")]
    Auth { target: String, message: String },

    /// Fetched package content does not match the lockfile
    #[error("integrity verification failed for {key}: expected {expected}, got {actual}")]
    Integrity {
        key: String,
        expected: String,
        actual: String,
    },

    /// Lock acquisition did not complete before the deadline
    #[error("timed out after {timeout:?} waiting for lock {}", path.display())]
    LockTimeout { path: PathBuf, timeout: Duration },

    /// Value outside a closed set (tool, registry type)
    #[error("unsupported {what}: {value}")]
    Unsupported { what: &'static str, value: String },
}

impl ArmError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        ArmError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn validation(what: impl Into<String>, message: impl Into<String>) -> Self {
        ArmError::Validation {
            what: what.into(),
            message: message.into(),
        }
    }

    pub fn parse(what: impl Into<String>, message: impl Into<String>) -> Self {
        ArmError::Parse {
            what: what.into(),
            message: message.into(),
        }
    }

    /// True when the error chain contains a `NotFound`
    pub fn is_not_found(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<ArmError>(),
                Some(ArmError::NotFound { .. })
            )
        })
    }
}
