//! Error types for musload operations.

use std::time::Duration;

use serde::Serialize;

/// Alias for `Result<T, musload::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised outside a boot session (spawning workers, listing ports).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The serial port layer reported an error.
    #[error(transparent)]
    Serial(#[from] serialport::Error),

    /// An I/O error from the host system.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Why a boot session ended in failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum FailureReason {
    /// The named serial device cannot be opened.
    PortUnavailable,
    /// The image file is missing, unreadable, or has an unusable length.
    FileUnavailable,
    /// No ready token arrived within the timeout.
    TargetNotDetected,
    /// Three bytes arrived but they were not the ready token.
    InvalidStartToken,
    /// The target's echo of the size frame did not match.
    SizeEchoMismatch,
    /// A data byte was not echoed faithfully under the strict echo policy.
    DataEchoMismatch,
    /// Fewer bytes were accepted than the image contains.
    TruncatedTransfer,
    /// The connection failed or closed unexpectedly.
    TransportFault,
    /// The caller cancelled the session.
    Cancelled,
}

impl FailureReason {
    /// Suggested user action for this failure.
    pub const fn hint(self) -> &'static str {
        match self {
            Self::PortUnavailable => "check that the serial device exists and is not in use",
            Self::FileUnavailable => {
                "check that the image exists and its size is a non-zero multiple of 4 bytes"
            }
            Self::TargetNotDetected => "check the wiring and reset the target",
            Self::InvalidStartToken => "check the baud rate and that the bootloader is running",
            Self::SizeEchoMismatch | Self::DataEchoMismatch => {
                "line noise or a baud mismatch; reset the target and try again"
            }
            Self::TruncatedTransfer => {
                "the processor is in an unknown state; reset the target and try again"
            }
            Self::TransportFault => "the serial link was lost; reconnect and reset the target",
            Self::Cancelled => "reset the target before the next attempt",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::PortUnavailable => "port unavailable",
            Self::FileUnavailable => "file unavailable",
            Self::TargetNotDetected => "target not detected",
            Self::InvalidStartToken => "invalid start token",
            Self::SizeEchoMismatch => "size echo mismatch",
            Self::DataEchoMismatch => "data echo mismatch",
            Self::TruncatedTransfer => "truncated transfer",
            Self::TransportFault => "transport fault",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Terminal failure of a boot session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{reason}: {detail}")]
#[non_exhaustive]
pub struct Failure {
    /// Failure category.
    pub reason: FailureReason,
    /// Diagnostic detail (received bytes, counts, OS error text).
    pub detail: String,
    /// Image bytes accepted by the transport before the session ended.
    pub bytes_sent: usize,
}

impl Failure {
    /// Creates a failure with no bytes sent yet.
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
            bytes_sent: 0,
        }
    }
}

/// Summary of a completed boot session.
///
/// Completion means every image byte was accepted by the transport. The
/// protocol has no boot acknowledgement, so it does not prove the target
/// started executing the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct Report {
    /// Image length in bytes.
    pub image_len: usize,
    /// Bytes accepted by the transport (equals `image_len`).
    pub bytes_sent: usize,
    /// Data bytes whose echo was missing or wrong.
    pub echo_errors: usize,
    /// Wall time from session start to completion.
    pub elapsed: Duration,
}

/// Terminal result of a boot session.
pub type Outcome = std::result::Result<Report, Failure>;
