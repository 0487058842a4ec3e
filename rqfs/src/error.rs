use std::{error, fmt, io};

use serde::{Deserialize, Serialize};

use crate::path::PathBuf;

/// An error type shared by the overlay tree and its collaborators.
///
/// Each kind has a stable identifier, preserved through serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Error {
    /// A name does not exist where required.
    NotFound(PathBuf),
    /// Create would overwrite an existing entry.
    AlreadyExists(PathBuf),
    /// Directory delete refused.
    NotEmpty(PathBuf),
    /// Orphaned local state cannot be safely reconciled.
    Conflict(PathBuf),
    /// Lower-level filesystem failure.
    Io(String),
    /// HTTP failure against the remote repository.
    Remote { status: Option<u16>, msg: String },
    /// Durable-queue failure.
    Queue(String),
}

impl Error {
    pub fn remote(status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::Remote {
            status,
            msg: msg.into(),
        }
    }

    /// HTTP status carried by a remote error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Remote { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(..)) || self.status() == Some(404)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "No such entry: {path}"),
            Self::AlreadyExists(path) => write!(f, "Entry already exists: {path}"),
            Self::NotEmpty(path) => write!(f, "Directory is not empty: {path}"),
            Self::Conflict(path) => write!(f, "Conflicting local state: {path}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
            Self::Remote {
                status: Some(status),
                msg,
            } => write!(f, "Remote error ({status}): {msg}"),
            Self::Remote { status: None, msg } => write!(f, "Remote error: {msg}"),
            Self::Queue(msg) => write!(f, "Queue error: {msg}"),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        match value.kind() {
            io::ErrorKind::NotFound => Self::NotFound(PathBuf::new()),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(PathBuf::new()),
            _ => Self::Io(value.to_string()),
        }
    }
}

impl From<camino::FromPathBufError> for Error {
    fn from(value: camino::FromPathBufError) -> Self {
        Self::Io(format!(
            "Non UTF-8 path: {}",
            value.as_path().display()
        ))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[macro_export]
macro_rules! io_bail {
    ($($t:tt)*) => {
        return ::core::result::Result::Err($crate::Error::Io(format!($($t)*)));
    };
}

#[macro_export]
macro_rules! queue_bail {
    ($($t:tt)*) => {
        return ::core::result::Result::Err($crate::Error::Queue(format!($($t)*)));
    };
}

#[macro_export]
macro_rules! io_error {
    ($($t:tt)*) => {
        $crate::Error::Io(format!($($t)*))
    };
}

#[macro_export]
macro_rules! remote_error {
    ($status:expr, $($t:tt)*) => {
        $crate::Error::Remote { status: $status, msg: format!($($t)*) }
    };
}

#[macro_export]
macro_rules! queue_error {
    ($($t:tt)*) => {
        $crate::Error::Queue(format!($($t)*))
    };
}
