//! Session runner: executes the engine on a worker thread and streams its
//! events back to the caller.
//!
//! One [`Session`] is one attempt. There is no retry: re-run the session
//! after resetting the target again.

use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::cancel::CancelToken;
use crate::config::{EchoPolicy, SessionConfig, Timeouts};
use crate::engine::Engine;
use crate::error::{Failure, FailureReason, Outcome, Result};
use crate::event::{Reporter, SessionEvent};
use crate::serial::SerialConnector;
use crate::transport::Connector;

/// A configured, not yet started, boot session.
///
/// # Example
///
/// ```no_run
/// use musload::{Session, SessionEvent};
///
/// let mut handle = Session::new("/dev/ttyUSB0", "out/program.bin")
///     .start()
///     .expect("failed to spawn session worker");
///
/// while let Some(event) = handle.blocking_next_event() {
///     if let SessionEvent::Status(line) = &event {
///         println!("{line}");
///     }
/// }
/// ```
#[derive(Debug)]
#[must_use = "a Session does nothing until .start() is called"]
pub struct Session<C = SerialConnector> {
    /// Serial device name.
    port: String,
    /// Image file.
    image: PathBuf,
    /// Engine configuration.
    config: SessionConfig,
    /// Transport factory.
    connector: C,
    /// Cancellation flag handed to the engine.
    cancel: CancelToken,
}

impl Session {
    /// Configures a session on a real serial port with default settings.
    pub fn new(port: impl Into<String>, image: impl Into<PathBuf>) -> Self {
        Self {
            port: port.into(),
            image: image.into(),
            config: SessionConfig::default(),
            connector: SerialConnector,
            cancel: CancelToken::new(),
        }
    }
}

impl<C> Session<C> {
    /// Replaces the whole configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the timeouts.
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.config.timeouts = timeouts;
        self
    }

    /// Sets the data-byte echo policy.
    pub fn echo_policy(mut self, policy: EchoPolicy) -> Self {
        self.config.echo_policy = policy;
        self
    }

    /// Uses `connector` instead of the serial port layer.
    pub fn connector<D: Connector>(self, connector: D) -> Session<D> {
        Session {
            port: self.port,
            image: self.image,
            config: self.config,
            connector,
            cancel: self.cancel,
        }
    }

    /// Returns a token that cancels this session once started.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

impl<C> Session<C>
where
    C: Connector + Send + 'static,
{
    /// Spawns the worker and returns a handle to its event stream.
    ///
    /// Fails only if the worker thread cannot be created.
    pub fn start(self) -> Result<SessionHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = self.cancel.clone();
        let Self {
            port,
            image,
            config,
            mut connector,
            cancel: worker_cancel,
        } = self;

        let worker = thread::Builder::new()
            .name("musload-session".into())
            .spawn(move || {
                let span = tracing::info_span!("session", %port);
                let _enter = span.enter();
                let reporter = Reporter::new(tx);
                let outcome =
                    Engine::new(config, &reporter, worker_cancel).run(&mut connector, &port, &image);
                reporter.finish(outcome);
            })?;

        Ok(SessionHandle {
            events: rx,
            cancel,
            worker: Some(worker),
            finished: false,
        })
    }
}

/// Caller's view of a running session.
///
/// Yields status and progress events in protocol order, then exactly one
/// [`SessionEvent::Finished`], then `None`.
#[derive(Debug)]
pub struct SessionHandle {
    /// Events from the worker.
    events: UnboundedReceiver<SessionEvent>,
    /// Cancellation flag shared with the worker.
    cancel: CancelToken,
    /// Worker thread, joined after the terminal event.
    worker: Option<JoinHandle<()>>,
    /// Whether the terminal event has been yielded.
    finished: bool,
}

impl SessionHandle {
    /// Returns a token that cancels this session.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the next event.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        if self.finished {
            return None;
        }
        let event = self.events.recv().await;
        self.accept(event)
    }

    /// Blocking variant of [`next_event`](Self::next_event).
    ///
    /// # Panics
    ///
    /// Panics if called from within an async runtime.
    pub fn blocking_next_event(&mut self) -> Option<SessionEvent> {
        if self.finished {
            return None;
        }
        let event = self.events.blocking_recv();
        self.accept(event)
    }

    /// Drains the stream, passing each non-terminal event to `on_event`,
    /// and returns the outcome.
    pub async fn wait(mut self, mut on_event: impl FnMut(&SessionEvent)) -> Outcome {
        loop {
            match self.next_event().await {
                Some(SessionEvent::Finished { outcome }) => return outcome,
                Some(event) => on_event(&event),
                None => return Err(lost_worker()),
            }
        }
    }

    /// Blocking variant of [`wait`](Self::wait).
    pub fn wait_blocking(mut self, mut on_event: impl FnMut(&SessionEvent)) -> Outcome {
        loop {
            match self.blocking_next_event() {
                Some(SessionEvent::Finished { outcome }) => return outcome,
                Some(event) => on_event(&event),
                None => return Err(lost_worker()),
            }
        }
    }

    /// Tracks the terminal event, synthesizing one if the worker vanished.
    fn accept(&mut self, event: Option<SessionEvent>) -> Option<SessionEvent> {
        let event = event.unwrap_or_else(|| {
            tracing::error!("session worker exited without a result");
            SessionEvent::Finished {
                outcome: Err(lost_worker()),
            }
        });
        if event.is_terminal() {
            self.finished = true;
            self.join_worker();
        }
        Some(event)
    }

    /// Reaps the worker thread once it has reported.
    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("session worker panicked");
            }
        }
    }
}

/// Failure reported when the worker dies before sending a result.
fn lost_worker() -> Failure {
    Failure::new(
        FailureReason::TransportFault,
        "session worker exited without reporting a result",
    )
}
