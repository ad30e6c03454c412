//! Protocol engine: drives one boot session over a [`Transport`].
//!
//! ```text
//! Idle -> AwaitingReadyToken -> NegotiatingSize -> TransferringData -> Completed
//!   \__________________\__________________\__________________\____> Failed(reason)
//! ```
//!
//! The engine is synchronous; every blocking call is bounded by one of the
//! [`Timeouts`](crate::Timeouts) and cancellation is polled between calls.

use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use musload_proto::{READY_TOKEN, SIZE_FRAME_LEN};

use crate::cancel::CancelToken;
use crate::config::{EchoPolicy, SessionConfig};
use crate::error::{Failure, FailureReason, Outcome, Report};
use crate::event::Reporter;
use crate::image::ImageBuffer;
use crate::transport::{Connector, Transport};

/// Longest single blocking read while waiting for the ready token, so that
/// cancellation stays responsive.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    /// Nothing opened yet.
    Idle,
    /// Link open, waiting for the target's ready token.
    AwaitingReadyToken,
    /// Token received, size frame being exchanged.
    NegotiatingSize,
    /// Streaming image bytes.
    TransferringData,
    /// Every byte accepted.
    Completed,
    /// Session failed.
    Failed(FailureReason),
}

impl State {
    /// `Completed` and `Failed` have no outgoing transitions.
    const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

/// Runs one session.
pub(crate) struct Engine<'a> {
    /// Session configuration.
    config: SessionConfig,
    /// Event sink.
    reporter: &'a Reporter,
    /// Caller's cancellation flag.
    cancel: CancelToken,
    /// Current state.
    state: State,
    /// Image bytes accepted by the transport.
    bytes_sent: usize,
    /// Data bytes whose echo was missing or wrong.
    echo_errors: usize,
    /// Failure that ended the session, if any.
    last_error: Option<Failure>,
}

impl<'a> Engine<'a> {
    /// Creates an idle engine.
    pub(crate) fn new(config: SessionConfig, reporter: &'a Reporter, cancel: CancelToken) -> Self {
        Self {
            config,
            reporter,
            cancel,
            state: State::Idle,
            bytes_sent: 0,
            echo_errors: 0,
            last_error: None,
        }
    }

    /// Current state.
    #[cfg(test)]
    pub(crate) const fn state(&self) -> State {
        self.state
    }

    /// Failure recorded by the last run.
    #[cfg(test)]
    pub(crate) const fn last_error(&self) -> Option<&Failure> {
        self.last_error.as_ref()
    }

    /// Runs the session to a terminal state.
    ///
    /// The link, if opened, is closed before this returns.
    pub(crate) fn run<C: Connector>(&mut self, connector: &mut C, port: &str, image: &Path) -> Outcome {
        let result = self.execute(connector, port, image);
        self.conclude(result)
    }

    /// Checks preconditions, opens the link, and drives the protocol.
    fn execute<C: Connector>(&mut self, connector: &mut C, port: &str, image: &Path) -> Outcome {
        if port.trim().is_empty() {
            return Err(Failure::new(FailureReason::PortUnavailable, "no serial port selected"));
        }
        let image = ImageBuffer::load(image)
            .map_err(|e| Failure::new(FailureReason::FileUnavailable, e.to_string()))?;
        self.check_cancel()?;

        let mut link = connector.open(port, &self.config.serial).map_err(|e| {
            Failure::new(FailureReason::PortUnavailable, format!("unable to open {port}: {e}"))
        })?;
        self.advance(State::AwaitingReadyToken);
        self.reporter.info(format!("target size = {} bytes", image.len()));

        let result = self.drive(&mut link, &image);
        if let Err(e) = link.close() {
            tracing::warn!(port, error = %e, "closing link failed");
        }
        result
    }

    /// Runs the protocol phases in order.
    fn drive<T: Transport>(&mut self, link: &mut T, image: &ImageBuffer) -> Outcome {
        self.await_ready_token(link)?;
        self.negotiate_size(link, image)?;
        self.transfer(link, image)
    }

    /// Waits for the target's ready token.
    fn await_ready_token<T: Transport>(&mut self, link: &mut T) -> Result<(), Failure> {
        link.clear_input().map_err(fault)?;
        self.reporter.info("please reset the target");

        let timeout = self.config.timeouts.ready_token;
        let mut token = [0u8; READY_TOKEN.len()];
        let received = self.read_cancellable(link, &mut token, timeout)?;
        if received < token.len() {
            return Err(Failure::new(
                FailureReason::TargetNotDetected,
                format!("no ready token within {timeout:?} ({received} bytes received)"),
            ));
        }

        self.reporter.info("target detected");
        if &token != READY_TOKEN {
            return Err(Failure::new(
                FailureReason::InvalidStartToken,
                format!(
                    "expected \"USB\", received {token:02x?} (\"{}\")",
                    token.escape_ascii()
                ),
            ));
        }
        self.reporter.info("start token received");
        self.advance(State::NegotiatingSize);
        Ok(())
    }

    /// Sends the size frame and checks its echo.
    fn negotiate_size<T: Transport>(&mut self, link: &mut T, image: &ImageBuffer) -> Result<(), Failure> {
        let frame = musload_proto::encode_size(image.len())
            .map_err(|e| Failure::new(FailureReason::FileUnavailable, e.to_string()))?;
        tracing::debug!(words = image.words(), ?frame, "sending size frame");

        let accepted = self.write_all(link, &frame)?;
        if accepted < frame.len() {
            return Err(Failure::new(
                FailureReason::TransportFault,
                format!("size frame write accepted {accepted} of {SIZE_FRAME_LEN} bytes"),
            ));
        }

        self.check_cancel()?;
        let mut echo = [0u8; SIZE_FRAME_LEN];
        let received = link
            .read_within(&mut echo, self.config.timeouts.size_echo)
            .map_err(fault)?;
        if received == 0 {
            return Err(Failure::new(
                FailureReason::TransportFault,
                "target stopped responding after the size frame",
            ));
        }
        if received < echo.len() || echo != frame {
            return Err(Failure::new(
                FailureReason::SizeEchoMismatch,
                format!("sent {frame:02x?}, received {:02x?}", &echo[..received]),
            ));
        }

        self.advance(State::TransferringData);
        self.reporter.info("sending image");
        Ok(())
    }

    /// Streams the image one byte at a time, checking each echo.
    fn transfer<T: Transport>(&mut self, link: &mut T, image: &ImageBuffer) -> Outcome {
        let total = image.len();
        let timeouts = self.config.timeouts;
        let mut fault: Option<io::Error> = None;
        // The previous byte's echo timed out and may still arrive.
        let mut owed = false;

        for (index, &byte) in image.as_bytes().iter().enumerate() {
            self.check_cancel()?;
            match link.write(&[byte], timeouts.write) {
                Ok(0) => {
                    tracing::warn!(index, "write timed out");
                    break;
                }
                Ok(_) => self.bytes_sent += 1,
                Err(e) => {
                    tracing::warn!(index, error = %e, "link failed during transfer");
                    fault = Some(e);
                    break;
                }
            }

            self.check_cancel()?;
            let mut echo = [0u8; 2];
            let want = 1 + usize::from(owed);
            let received = match link.read_within(&mut echo[..want], timeouts.byte_echo) {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(index, error = %e, "link failed awaiting echo");
                    fault = Some(e);
                    break;
                }
            };
            let got = match received {
                0 => None,
                2 => {
                    tracing::debug!(index, late = echo[0], "discarded late echo");
                    Some(echo[1])
                }
                _ if owed && echo[0] != byte => {
                    tracing::debug!(index, late = echo[0], "discarded late echo");
                    None
                }
                _ => Some(echo[0]),
            };
            owed = got.is_none();
            if got != Some(byte) {
                self.echo_mismatch(index, byte, got)?;
            }

            let step = self.config.progress_step;
            if step > 0 && (self.bytes_sent % step == 0 || self.bytes_sent == total) {
                self.reporter.progress(self.bytes_sent, total);
            }
        }

        if self.bytes_sent != total {
            let mut detail = format!("{} of {total} bytes accepted", self.bytes_sent);
            if let Some(e) = &fault {
                detail.push_str(&format!(" ({e})"));
            }
            return Err(Failure::new(FailureReason::TruncatedTransfer, detail));
        }
        if let Some(e) = fault {
            return Err(fault_detail(&e));
        }

        Ok(Report {
            image_len: total,
            bytes_sent: self.bytes_sent,
            echo_errors: self.echo_errors,
            elapsed: self.reporter.elapsed(),
        })
    }

    /// Applies the echo policy to a missing or wrong data-byte echo.
    fn echo_mismatch(&mut self, index: usize, expected: u8, received: Option<u8>) -> Result<(), Failure> {
        self.echo_errors += 1;
        let message = match received {
            Some(got) => format!(
                "echo mismatch at byte {index}: expected 0x{expected:02x}, received 0x{got:02x}"
            ),
            None => format!("no echo for byte {index} (expected 0x{expected:02x})"),
        };
        match self.config.echo_policy {
            EchoPolicy::Permissive => {
                self.reporter.error(message);
                Ok(())
            }
            EchoPolicy::Strict => Err(Failure::new(FailureReason::DataEchoMismatch, message)),
        }
    }

    /// Writes `bytes` fully unless the transport stops accepting them.
    fn write_all<T: Transport>(&self, link: &mut T, bytes: &[u8]) -> Result<usize, Failure> {
        let mut written = 0;
        while written < bytes.len() {
            let n = link
                .write(&bytes[written..], self.config.timeouts.write)
                .map_err(fault)?;
            if n == 0 {
                break;
            }
            written += n;
        }
        Ok(written)
    }

    /// Like [`Transport::read_within`], but polls for cancellation while
    /// waiting.
    fn read_cancellable<T: Transport>(
        &self,
        link: &mut T,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, Failure> {
        let deadline = Instant::now() + timeout;
        let mut filled = 0;
        while filled < buf.len() {
            self.check_cancel()?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            filled += link
                .read_up_to(&mut buf[filled..], remaining.min(CANCEL_POLL))
                .map_err(fault)?;
        }
        Ok(filled)
    }

    /// Fails with `Cancelled` once the caller has asked to stop.
    fn check_cancel(&self) -> Result<(), Failure> {
        if self.cancel.is_cancelled() {
            return Err(Failure::new(FailureReason::Cancelled, "cancelled by caller"));
        }
        Ok(())
    }

    /// Moves to `next`, refusing to leave a terminal state.
    fn advance(&mut self, next: State) {
        debug_assert!(!self.state.is_terminal(), "{:?} is terminal", self.state);
        tracing::debug!(from = ?self.state, to = ?next, "state transition");
        self.state = next;
    }

    /// Records the terminal state and reports it.
    fn conclude(&mut self, result: Outcome) -> Outcome {
        match result {
            Ok(report) => {
                self.advance(State::Completed);
                self.reporter.info("done");
                Ok(report)
            }
            Err(mut failure) => {
                failure.bytes_sent = self.bytes_sent;
                self.advance(State::Failed(failure.reason));
                self.reporter
                    .error(format!("{failure} ({})", failure.reason.hint()));
                Err(self.last_error.insert(failure).clone())
            }
        }
    }
}

/// Maps a link error to a transport fault.
fn fault(e: io::Error) -> Failure {
    fault_detail(&e)
}

/// Builds a transport fault from an I/O error.
fn fault_detail(e: &io::Error) -> Failure {
    Failure::new(FailureReason::TransportFault, e.to_string())
}
