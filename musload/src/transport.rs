//! Byte transport between host and target.
//!
//! The engine never talks to a serial device directly: it asks a
//! [`Connector`] for a [`Transport`] and owns it until the session ends.

use std::io;
use std::time::{Duration, Instant};

use crate::config::SerialParams;

/// A duplex byte stream whose reads and writes are bounded by timeouts.
///
/// Timeouts are reported as short counts, never as errors. An `Err` always
/// means the link itself failed (device removed, port closed, …).
pub trait Transport {
    /// Reads at most `buf.len()` bytes, waiting up to `timeout` for the first
    /// one. Returns `0` only if the timeout elapsed with nothing received.
    fn read_up_to(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Writes `bytes`, waiting up to `timeout`. Returns how many bytes were
    /// accepted; `0` means the write timed out.
    fn write(&mut self, bytes: &[u8], timeout: Duration) -> io::Result<usize>;

    /// Discards any bytes received but not yet read.
    fn clear_input(&mut self) -> io::Result<()>;

    /// Releases the link. No I/O may follow.
    fn close(&mut self) -> io::Result<()>;

    /// Fills `buf` from repeated reads until it is full or `timeout` has
    /// elapsed. Returns the number of bytes received.
    fn read_within(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut filled = 0;
        while filled < buf.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let n = self.read_up_to(&mut buf[filled..], remaining)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

/// Opens transports by port name.
pub trait Connector {
    /// Transport produced by this connector.
    type Link: Transport;

    /// Opens `port` with the given line parameters.
    fn open(&mut self, port: &str, params: &SerialParams) -> io::Result<Self::Link>;
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Delivers queued chunks, one per read.
    struct Chunks(VecDeque<Vec<u8>>);

    impl Transport for Chunks {
        fn read_up_to(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
            let Some(chunk) = self.0.pop_front() else {
                return Ok(0);
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            Ok(n)
        }

        fn write(&mut self, bytes: &[u8], _timeout: Duration) -> io::Result<usize> {
            Ok(bytes.len())
        }

        fn clear_input(&mut self) -> io::Result<()> {
            self.0.clear();
            Ok(())
        }

        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn read_within_joins_partial_reads() {
        let mut t = Chunks(VecDeque::from([b"U".to_vec(), b"SB".to_vec()]));
        let mut buf = [0u8; 3];
        assert_eq!(t.read_within(&mut buf, Duration::from_secs(1)).unwrap(), 3);
        assert_eq!(&buf, b"USB");
    }

    #[test]
    fn read_within_reports_short_count() {
        let mut t = Chunks(VecDeque::from([b"US".to_vec()]));
        let mut buf = [0u8; 3];
        assert_eq!(t.read_within(&mut buf, Duration::from_secs(1)).unwrap(), 2);
    }

    #[test]
    fn zero_timeout_reads_nothing() {
        let mut t = Chunks(VecDeque::from([b"USB".to_vec()]));
        let mut buf = [0u8; 3];
        assert_eq!(t.read_within(&mut buf, Duration::ZERO).unwrap(), 0);
    }
}
