//! Host side of the musoc serial boot protocol.
//!
//! `musload` uploads a raw binary image to a bare-metal target over a
//! serial line and checks every byte through the target's echo:
//!
//! 1. wait for the target to reset and send its ready token (`"USB"`),
//! 2. negotiate the image size in 32-bit words,
//! 3. stream the image one byte at a time, each echoed back,
//! 4. report the outcome.
//!
//! A [`Session`] runs the protocol on a worker thread and exposes an
//! ordered stream of [`SessionEvent`]s ending in exactly one
//! [`SessionEvent::Finished`].
//!
//! # Quick start
//!
//! ```no_run
//! use musload::{EchoPolicy, Session};
//!
//! let outcome = Session::new("/dev/ttyUSB0", "out/program.bin")
//!     .echo_policy(EchoPolicy::Permissive)
//!     .start()
//!     .expect("failed to spawn session worker")
//!     .wait_blocking(|event| println!("{event:?}"));
//!
//! match outcome {
//!     Ok(report) => println!("sent {} bytes", report.bytes_sent),
//!     Err(failure) => eprintln!("{failure}"),
//! }
//! ```

mod cancel;
mod config;
mod engine;
mod error;
mod event;
mod image;
mod runner;
mod serial;
#[cfg(test)]
mod testing;
mod transport;

pub use cancel::CancelToken;
pub use config::{EchoPolicy, SerialParams, SessionConfig, Timeouts};
pub use error::{Error, Failure, FailureReason, Outcome, Report, Result};
pub use event::{Level, SessionEvent, StatusEvent};
pub use image::{ImageBuffer, ImageError};
pub use runner::{Session, SessionHandle};
pub use serial::{PortInfo, SerialConnector, SerialLink, available_ports};
pub use transport::{Connector, Transport};
