//! Firmware image loaded once per session.

use std::path::{Path, PathBuf};
use std::{fs, io};

use musload_proto::{SizeError, WORD_SIZE};

/// Reasons an image cannot be used for a session.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ImageError {
    /// The file could not be read.
    #[error("unable to read {}: {source}", path.display())]
    Read {
        /// Image path as supplied by the caller.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The payload length cannot be negotiated.
    #[error(transparent)]
    Layout(#[from] SizeError),
}

/// Immutable raw binary image.
///
/// The length is a positive multiple of [`WORD_SIZE`] no larger than
/// [`musload_proto::MAX_IMAGE_LEN`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    /// Image contents.
    bytes: Box<[u8]>,
}

impl ImageBuffer {
    /// Reads and validates the image at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| ImageError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_bytes(bytes)?)
    }

    /// Validates an in-memory image.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, SizeError> {
        let bytes = bytes.into();
        musload_proto::validate_len(bytes.len())?;
        Ok(Self {
            bytes: bytes.into_boxed_slice(),
        })
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always `false`; empty images are rejected at construction.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of 32-bit words.
    pub fn words(&self) -> usize {
        self.bytes.len() / WORD_SIZE
    }

    /// Image contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
