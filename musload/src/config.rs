//! Session configuration: line parameters, timeouts, echo policy.

use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, StopBits};

/// Serial line parameters.
///
/// Defaults to the bootloader's fixed 115200 8N1 without flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct SerialParams {
    /// Line speed in baud.
    pub baud_rate: u32,
    /// Data bits per character.
    pub data_bits: DataBits,
    /// Parity mode.
    pub parity: Parity,
    /// Stop bits per character.
    pub stop_bits: StopBits,
    /// Flow control mode.
    pub flow_control: FlowControl,
}

impl Default for SerialParams {
    fn default() -> Self {
        Self {
            baud_rate: musload_proto::BAUD_RATE,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

/// Bounds on every blocking operation of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct Timeouts {
    /// Wait for the ready token after the user is asked to reset the target.
    pub ready_token: Duration,
    /// Wait for the three-byte echo of the size frame.
    pub size_echo: Duration,
    /// Wait for the echo of a single data byte.
    pub byte_echo: Duration,
    /// Wait for the transport to accept a write.
    pub write: Duration,
}

impl Timeouts {
    /// Default ready-token timeout.
    pub const READY_TOKEN: Duration = Duration::from_secs(5);
    /// Default size-echo timeout.
    pub const SIZE_ECHO: Duration = Duration::from_secs(1);
    /// Default per-byte echo timeout.
    pub const BYTE_ECHO: Duration = Duration::from_millis(50);
    /// Default write timeout.
    pub const WRITE: Duration = Duration::from_millis(100);
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            ready_token: Self::READY_TOKEN,
            size_echo: Self::SIZE_ECHO,
            byte_echo: Self::BYTE_ECHO,
            write: Self::WRITE,
        }
    }
}

/// How the engine treats a data byte whose echo is missing or wrong.
///
/// The size frame is always checked strictly; this only governs image bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum EchoPolicy {
    /// Log an `ERROR` status event and keep streaming.
    ///
    /// Once the target has started receiving the image there is no way to
    /// bring it back to a known state short of a reset, so the remaining
    /// bytes are still sent.
    #[default]
    Permissive,
    /// Fail the session with [`FailureReason::DataEchoMismatch`].
    ///
    /// [`FailureReason::DataEchoMismatch`]: crate::FailureReason::DataEchoMismatch
    Strict,
}

/// Complete configuration of one boot session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct SessionConfig {
    /// Serial line parameters.
    pub serial: SerialParams,
    /// Timeouts for each blocking step.
    pub timeouts: Timeouts,
    /// Data-byte echo policy.
    pub echo_policy: EchoPolicy,
    /// Emit a progress event every this many bytes (`0` disables them).
    pub progress_step: usize,
}

impl SessionConfig {
    /// Default progress granularity in bytes.
    pub const PROGRESS_STEP: usize = 1024;
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            serial: SerialParams::default(),
            timeouts: Timeouts::default(),
            echo_policy: EchoPolicy::default(),
            progress_step: Self::PROGRESS_STEP,
        }
    }
}
