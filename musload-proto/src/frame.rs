//! Size negotiation frame.
//!
//! The frame is `(len / 4) - 1` as a little-endian `u32`, truncated to its
//! three low-order bytes.

use crate::{MAX_IMAGE_LEN, SIZE_FRAME_LEN, WORD_SIZE};

/// Reasons an image length cannot be negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum SizeError {
    /// The image holds no words.
    #[error("image is empty")]
    Empty,

    /// The length is not a whole number of 32-bit words.
    #[error("image length {len} is not a multiple of {} bytes", WORD_SIZE)]
    Unaligned {
        /// Offending length in bytes.
        len: usize,
    },

    /// The length exceeds the 24-bit word count of the size frame.
    #[error("image length {len} exceeds the protocol limit of {} bytes", MAX_IMAGE_LEN)]
    TooLarge {
        /// Offending length in bytes.
        len: usize,
    },
}

/// Checks that `len` bytes can be negotiated and returns the word count.
pub fn validate_len(len: usize) -> Result<u32, SizeError> {
    if len == 0 {
        return Err(SizeError::Empty);
    }
    if len % WORD_SIZE != 0 {
        return Err(SizeError::Unaligned { len });
    }
    if len > MAX_IMAGE_LEN {
        return Err(SizeError::TooLarge { len });
    }
    // Bounded by MAX_IMAGE_LEN above, so the word count fits in 25 bits.
    #[allow(clippy::cast_possible_truncation)]
    let words = (len / WORD_SIZE) as u32;
    Ok(words)
}

/// Encodes the size frame for an image of `len` bytes.
pub fn encode_size(len: usize) -> Result<[u8; SIZE_FRAME_LEN], SizeError> {
    let words = validate_len(len)?;
    let [b0, b1, b2, _] = (words - 1).to_le_bytes();
    Ok([b0, b1, b2])
}

/// Decodes a size frame back into an image length in bytes.
pub fn decode_size(frame: [u8; SIZE_FRAME_LEN]) -> usize {
    let [b0, b1, b2] = frame;
    let last_word = u32::from_le_bytes([b0, b1, b2, 0]);
    (last_word as usize + 1) * WORD_SIZE
}
