//! Named playback streams.

use core::fmt;
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read};

/// Source of playback streams addressed by name.
pub trait PlaybackLibrary {
    type Stream: Read + Send + 'static;

    /// Names of the available streams, sorted.
    fn list(&self) -> Result<Vec<String>, LibraryError>;

    fn open(&self, name: &str) -> Result<Self::Stream, LibraryError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LibraryError {
    NotFound(String),
    InvalidName(String),
    Io(io::ErrorKind),
}

impl fmt::Display for LibraryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryError::NotFound(name) => write!(f, "no playback file named `{name}`"),
            LibraryError::InvalidName(name) => write!(f, "`{name}` is not a valid playback name"),
            LibraryError::Io(kind) => write!(f, "library read failed: {kind}"),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<io::Error> for LibraryError {
    fn from(error: io::Error) -> Self {
        LibraryError::Io(error.kind())
    }
}

/// In-memory library.
#[derive(Clone, Debug, Default)]
pub struct MemoryLibrary {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.entries.insert(name.into(), bytes);
    }
}

impl PlaybackLibrary for MemoryLibrary {
    type Stream = Cursor<Vec<u8>>;

    fn list(&self) -> Result<Vec<String>, LibraryError> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn open(&self, name: &str) -> Result<Self::Stream, LibraryError> {
        self.entries
            .get(name)
            .map(|bytes| Cursor::new(bytes.clone()))
            .ok_or_else(|| LibraryError::NotFound(name.to_string()))
    }
}
