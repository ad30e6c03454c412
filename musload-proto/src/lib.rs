//! Wire format of the musoc serial boot protocol.
//!
//! After a physical reset the target's bootloader sends the three-byte
//! [`READY_TOKEN`]. The host answers with a three-byte size frame (see
//! [`encode_size`]) which the target echoes, then streams the raw image one
//! byte at a time, waiting for each byte to be echoed before sending the
//! next one.
//!
//! There is no framing, checksum, or acknowledgement beyond the echoes.

mod frame;

pub use frame::{SizeError, decode_size, encode_size, validate_len};

/// Token sent once by the target after reset.
pub const READY_TOKEN: &[u8; 3] = b"USB";

/// Images are negotiated in 32-bit words.
pub const WORD_SIZE: usize = 4;

/// Length of the size negotiation frame.
pub const SIZE_FRAME_LEN: usize = 3;

/// Number of words addressable by the 24-bit size frame.
///
/// This is a protocol ceiling: the frame encodes `words - 1` in three bytes,
/// so at most 2^24 words can be negotiated.
pub const MAX_WORDS: u32 = 1 << 24;

/// Largest image the protocol can transfer (64 MiB).
pub const MAX_IMAGE_LEN: usize = WORD_SIZE * MAX_WORDS as usize;

/// Line speed expected by the bootloader.
pub const BAUD_RATE: u32 = 115_200;
