//! Field path ⇄ storage key.
//!
//! Keys are path segments joined with a single separator character:
//! `firstname`, `pet.name`, or in collection layout `0.pet.breed`. Segments
//! are taken verbatim, so a segment containing the separator is rejected
//! rather than stored, since it could not be split back apart.

use thiserror::Error;

/// Default path separator.
pub const DEFAULT_SEPARATOR: char = '.';

/// Keys starting with this character belong to the adapter, not to records.
pub const RESERVED_PREFIX: char = '\u{0}';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Empty key path")]
    EmptyPath,
    #[error("Empty segment in key path {0:?}")]
    EmptySegment(Vec<String>),
    #[error("Key segment '{segment}' contains the separator '{separator}'")]
    SeparatorInSegment { segment: String, separator: char },
    #[error("Key segment '{0}' starts with a reserved character")]
    ReservedSegment(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCodec {
    separator: char,
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR)
    }
}

impl KeyCodec {
    pub fn new(separator: char) -> Self {
        Self { separator }
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    /// Join `path` into a key.
    pub fn encode<S: AsRef<str>>(&self, path: &[S]) -> Result<String, KeyError> {
        if path.is_empty() {
            return Err(KeyError::EmptyPath);
        }
        let mut key = String::new();
        for (i, segment) in path.iter().enumerate() {
            let segment = segment.as_ref();
            self.check_segment(segment, path)?;
            if i > 0 {
                key.push(self.separator);
            }
            key.push_str(segment);
        }
        Ok(key)
    }

    /// Split a key back into its path segments.
    pub fn decode(&self, key: &str) -> Vec<String> {
        key.split(self.separator).map(str::to_string).collect()
    }

    /// Prefix shared by every key strictly below `path`.
    pub fn prefix<S: AsRef<str>>(&self, path: &[S]) -> Result<String, KeyError> {
        let mut prefix = self.encode(path)?;
        prefix.push(self.separator);
        Ok(prefix)
    }

    pub fn is_reserved(key: &str) -> bool {
        key.starts_with(RESERVED_PREFIX)
    }

    fn check_segment<S: AsRef<str>>(&self, segment: &str, path: &[S]) -> Result<(), KeyError> {
        if segment.is_empty() {
            return Err(KeyError::EmptySegment(
                path.iter().map(|s| s.as_ref().to_string()).collect(),
            ));
        }
        if segment.contains(self.separator) {
            return Err(KeyError::SeparatorInSegment {
                segment: segment.to_string(),
                separator: self.separator,
            });
        }
        if segment.starts_with(RESERVED_PREFIX) {
            return Err(KeyError::ReservedSegment(segment.to_string()));
        }
        Ok(())
    }
}
