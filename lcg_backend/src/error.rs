//! Error types shared by the trace reader, the stimulus encoder and the configuration graph.
//!
//! Every fallible operation of the crate returns [`LcgResult`]. Errors fall in four kinds,
//! reported by [`LcgError::kind`]:
//!
//! - [`ErrorKind::Format`]: a trace container whose version is unknown or whose required
//!   structure is missing. The reader refuses such files instead of guessing.
//! - [`ErrorKind::Io`]: a file that cannot be opened, read or written.
//! - [`ErrorKind::Validation`]: rejected input (duplicate entity id, dangling connection,
//!   negative segment duration, malformed attribute or record).
//! - [`ErrorKind::State`]: mutation of a configuration document that was already written.
//!
//! Each variant carries the context the caller needs to decide whether to abort a
//! trial sequence or skip a single trial: the file path, the detected version, the offending id.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub type LcgResult<T> = Result<T, LcgError>;

/// Coarse classification of an [`LcgError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Format,
    Io,
    Validation,
    State,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ErrorKind::Format => "FormatError",
                ErrorKind::Io => "IOError",
                ErrorKind::Validation => "ValidationError",
                ErrorKind::State => "StateError",
            }
        )
    }
}

#[derive(Error, Debug)]
pub enum LcgError {
    #[error("format error in {}{}: {reason}", .path.display(), version_suffix(.version))]
    Format {
        path: PathBuf,
        version: Option<i64>,
        reason: String,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("state error: cannot {operation} a configuration document that was already written")]
    State { operation: &'static str },
}

/// Input rejected before anything is written.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("entity id {id} is already present in the document")]
    DuplicateId { id: u32 },

    #[error("entity {id} is stored under id {key}")]
    MisplacedEntity { key: u32, id: u32 },

    #[error("entity {entity} is connected to entity {target}, which does not exist")]
    DanglingConnection { entity: u32, target: u32 },

    #[error("segment {index} has negative duration {duration}")]
    NegativeDuration { index: usize, duration: f64 },

    #[error("{entity}: attribute {attribute} is malformed ({reason})")]
    MalformedAttribute {
        entity: &'static str,
        attribute: &'static str,
        reason: String,
    },

    #[error("stimulus record at line {line} is malformed ({reason})")]
    MalformedRecord { line: usize, reason: String },
}

fn version_suffix(version: &Option<i64>) -> String {
    match version {
        Some(v) => format!(" (version {})", v),
        None => String::new(),
    }
}

impl LcgError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LcgError::Format { .. } => ErrorKind::Format,
            LcgError::Io { .. } => ErrorKind::Io,
            LcgError::Validation(_) => ErrorKind::Validation,
            LcgError::State { .. } => ErrorKind::State,
        }
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        LcgError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn format(path: impl AsRef<Path>, version: Option<i64>, reason: impl Into<String>) -> Self {
        LcgError::Format {
            path: path.as_ref().to_path_buf(),
            version,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kinds_follow_variants() {
        let err = LcgError::from(ValidationError::DuplicateId { id: 1 });
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(LcgError::State { operation: "write" }.kind(), ErrorKind::State);
        let err = LcgError::io(
            "missing.h5",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn messages_carry_context() {
        let err = LcgError::format("trace.h5", Some(7), "unsupported version");
        let msg = err.to_string();
        assert!(msg.contains("trace.h5") && msg.contains("version 7"), "{}", msg);

        let err = LcgError::from(ValidationError::DanglingConnection {
            entity: 3,
            target: 9,
        });
        let msg = err.to_string();
        assert!(msg.contains("entity 3") && msg.contains("entity 9"), "{}", msg);
    }
}
