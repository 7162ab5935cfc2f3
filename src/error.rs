//! Error taxonomy for the EWF storage engine.

use std::fmt;
use std::io;

/// The coarse kind of failure, independent of the message attached to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A caller-supplied argument (path, offset, config value) is invalid.
    InvalidArgument,
    /// A recognized but unsupported on-disk feature (encryption, …).
    Unsupported,
    /// The underlying file system failed a read/write/seek/open.
    Io,
    /// An Adler-32 (or MD5 integrity hash) verification failed.
    ChecksumMismatch,
    /// The section/chunk-table shape is structurally inconsistent.
    CorruptData,
    /// A requested offset or chunk index is outside the valid range.
    OutOfBounds,
    /// An allocation could not be satisfied.
    MemoryFailure,
    /// The operation observed the abort flag and unwound early.
    Aborted,
    /// A required segment file is missing.
    NotFound,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Io => "io error",
            ErrorKind::ChecksumMismatch => "checksum mismatch",
            ErrorKind::CorruptData => "corrupt data",
            ErrorKind::OutOfBounds => "out of bounds",
            ErrorKind::MemoryFailure => "memory failure",
            ErrorKind::Aborted => "aborted",
            ErrorKind::NotFound => "not found",
        };
        f.write_str(s)
    }
}

/// An error produced by the storage engine, with an optional cause chain.
pub struct Error {
    kind: ErrorKind,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn not_found(segment: u16) -> Self {
        Error::new(
            ErrorKind::NotFound,
            format!("segment file {} is missing", segment),
        )
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(source) = &self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|b| b.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => ErrorKind::InvalidArgument,
            _ => ErrorKind::Io,
        };
        Error::with_source(kind, "underlying I/O operation failed", err)
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match err.kind {
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            ErrorKind::InvalidArgument | ErrorKind::OutOfBounds => io::ErrorKind::InvalidInput,
            ErrorKind::Aborted => io::ErrorKind::Interrupted,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A recoverable condition surfaced alongside a successful result: chunk
/// table reconciliation converts a `table` failure into a warning if
/// `table2` succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// `table` failed its Adler-32 check but `table2` in the same segment
    /// verified, so the table was rebuilt from the backup copy.
    TableRecoveredFromBackup { segment: u16 },
    /// A chunk's checksum failed verification and was wiped per
    /// `wipe_on_error` instead of failing the read.
    ChunkWiped { chunk_index: usize },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::TableRecoveredFromBackup { segment } => write!(
                f,
                "segment {}: table section recovered from table2 backup",
                segment
            ),
            Warning::ChunkWiped { chunk_index } => {
                write!(f, "chunk {} wiped after checksum mismatch", chunk_index)
            }
        }
    }
}
