//! Simulated bootloader target for tests.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use musload_proto::{READY_TOKEN, SIZE_FRAME_LEN};

use crate::cancel::CancelToken;
use crate::config::SerialParams;
use crate::transport::{Connector, Transport};

/// How the target answers the size frame.
#[derive(Debug, Clone, Copy)]
enum SizeEcho {
    /// Echo it unchanged.
    Faithful,
    /// Echo it with the first byte flipped.
    Corrupt,
    /// Never answer.
    Silent,
}

/// Scripted target behaviour plus everything observed on the link.
#[derive(Debug)]
struct Sim {
    token: Vec<u8>,
    token_sent: bool,
    size_echo: SizeEcho,
    drop_echo: Option<usize>,
    corrupt_echo: Option<usize>,
    late_echo: Option<usize>,
    held_echo: Option<u8>,
    reads_fail_after: Option<usize>,
    reads_fail: bool,
    clear_fails: bool,
    disconnect_after: Option<usize>,
    stall_after: Option<usize>,
    cancel_at: Option<(usize, CancelToken)>,
    refuse_open: bool,

    pending: VecDeque<u8>,
    open: bool,
    dead: bool,
    probe: Probe,
}

/// What the target saw.
#[derive(Debug, Clone, Default)]
pub(crate) struct Probe {
    /// Successful opens.
    pub opens: usize,
    /// Calls to `close`.
    pub closes: usize,
    /// Reads or writes attempted on a closed link.
    pub io_after_close: usize,
    /// Every byte the host wrote, size frame first.
    pub written: Vec<u8>,
}

impl Probe {
    /// The size frame, once fully received.
    pub fn size_frame(&self) -> Option<[u8; SIZE_FRAME_LEN]> {
        self.written.get(..SIZE_FRAME_LEN)?.try_into().ok()
    }

    /// Image bytes received after the size frame.
    pub fn data(&self) -> &[u8] {
        self.written.get(SIZE_FRAME_LEN..).unwrap_or_default()
    }
}

/// A [`Connector`] whose links talk to an in-memory target.
#[derive(Debug, Clone)]
pub(crate) struct SimTarget(Arc<Mutex<Sim>>);

impl SimTarget {
    /// A well-behaved target.
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Sim {
            token: READY_TOKEN.to_vec(),
            token_sent: false,
            size_echo: SizeEcho::Faithful,
            drop_echo: None,
            corrupt_echo: None,
            late_echo: None,
            held_echo: None,
            reads_fail_after: None,
            reads_fail: false,
            clear_fails: false,
            disconnect_after: None,
            stall_after: None,
            cancel_at: None,
            refuse_open: false,
            pending: VecDeque::new(),
            open: false,
            dead: false,
            probe: Probe::default(),
        })))
    }

    fn edit(self, f: impl FnOnce(&mut Sim)) -> Self {
        f(&mut self.lock());
        self
    }

    fn lock(&self) -> MutexGuard<'_, Sim> {
        self.0.lock().unwrap()
    }

    /// The port cannot be opened.
    pub fn refuse_open(self) -> Self {
        self.edit(|s| s.refuse_open = true)
    }

    /// Sends `token` instead of the ready token.
    pub fn token(self, token: &[u8]) -> Self {
        self.edit(|s| s.token = token.to_vec())
    }

    /// Never sends anything.
    pub fn silent(self) -> Self {
        self.token(&[])
    }

    /// Echoes a damaged size frame.
    pub fn corrupt_size_echo(self) -> Self {
        self.edit(|s| s.size_echo = SizeEcho::Corrupt)
    }

    /// Does not echo the size frame.
    pub fn no_size_echo(self) -> Self {
        self.edit(|s| s.size_echo = SizeEcho::Silent)
    }

    /// Withholds the echo of data byte `index`.
    pub fn drop_echo(self, index: usize) -> Self {
        self.edit(|s| s.drop_echo = Some(index))
    }

    /// Echoes the complement of data byte `index`.
    pub fn corrupt_echo(self, index: usize) -> Self {
        self.edit(|s| s.corrupt_echo = Some(index))
    }

    /// Holds the echo of data byte `index` back until the next byte is
    /// written.
    pub fn late_echo(self, index: usize) -> Self {
        self.edit(|s| s.late_echo = Some(index))
    }

    /// Reads fail with a hard error from the start.
    pub fn reads_fail(self) -> Self {
        self.edit(|s| s.reads_fail = true)
    }

    /// Reads fail with a hard error once data byte `index` is written.
    pub fn reads_fail_after(self, index: usize) -> Self {
        self.edit(|s| s.reads_fail_after = Some(index))
    }

    /// Discarding pending input fails.
    pub fn clear_fails(self) -> Self {
        self.edit(|s| s.clear_fails = true)
    }

    /// The link breaks after `count` data bytes have been echoed.
    pub fn disconnect_after(self, count: usize) -> Self {
        self.edit(|s| s.disconnect_after = Some(count))
    }

    /// Writes time out after `count` data bytes.
    pub fn stall_writes_after(self, count: usize) -> Self {
        self.edit(|s| s.stall_after = Some(count))
    }

    /// Triggers `token` when data byte `index` arrives.
    pub fn cancel_at(self, index: usize, token: CancelToken) -> Self {
        self.edit(|s| s.cancel_at = Some((index, token)))
    }

    /// Snapshot of what the target observed.
    pub fn probe(&self) -> Probe {
        self.lock().probe.clone()
    }
}

impl Connector for SimTarget {
    type Link = SimLink;

    fn open(&mut self, _port: &str, _params: &SerialParams) -> io::Result<SimLink> {
        let mut s = self.lock();
        if s.refuse_open {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
        }
        s.probe.opens += 1;
        s.open = true;
        Ok(SimLink(Arc::clone(&self.0)))
    }
}

/// Host end of a simulated link.
#[derive(Debug)]
pub(crate) struct SimLink(Arc<Mutex<Sim>>);

impl SimLink {
    /// Locks the target, rejecting I/O on a closed or broken link.
    fn live(&self) -> io::Result<MutexGuard<'_, Sim>> {
        let mut s = self.0.lock().unwrap();
        if !s.open {
            s.probe.io_after_close += 1;
            return Err(io::ErrorKind::NotConnected.into());
        }
        if s.dead {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        Ok(s)
    }
}

impl Transport for SimLink {
    fn read_up_to(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let mut s = self.live()?;
        if s.reads_fail {
            return Err(io::ErrorKind::ConnectionReset.into());
        }
        if !s.token_sent {
            s.token_sent = true;
            let token = s.token.clone();
            s.pending.extend(token);
        }
        if s.pending.is_empty() {
            drop(s);
            std::thread::sleep(timeout);
            return Ok(0);
        }
        let n = buf.len().min(s.pending.len());
        for slot in &mut buf[..n] {
            *slot = s.pending.pop_front().unwrap();
        }
        Ok(n)
    }

    fn write(&mut self, bytes: &[u8], _timeout: Duration) -> io::Result<usize> {
        let mut s = self.live()?;
        let mut accepted = 0;
        for &b in bytes {
            let pos = s.probe.written.len();
            if pos < SIZE_FRAME_LEN {
                s.probe.written.push(b);
                accepted += 1;
                if pos + 1 == SIZE_FRAME_LEN {
                    let mut frame = s.probe.written.clone();
                    let mode = s.size_echo;
                    match mode {
                        SizeEcho::Faithful => s.pending.extend(frame),
                        SizeEcho::Corrupt => {
                            frame[0] ^= 0xFF;
                            s.pending.extend(frame);
                        }
                        SizeEcho::Silent => {}
                    }
                }
                continue;
            }

            let index = pos - SIZE_FRAME_LEN;
            if s.disconnect_after.is_some_and(|k| index >= k) {
                s.dead = true;
                if accepted == 0 {
                    return Err(io::ErrorKind::BrokenPipe.into());
                }
                return Ok(accepted);
            }
            if s.stall_after.is_some_and(|k| index >= k) {
                return Ok(accepted);
            }
            s.probe.written.push(b);
            accepted += 1;
            if let Some((at, token)) = &s.cancel_at {
                if *at == index {
                    token.cancel();
                }
            }
            if s.reads_fail_after == Some(index) {
                s.reads_fail = true;
            }
            if let Some(late) = s.held_echo.take() {
                s.pending.push_back(late);
            }
            if s.drop_echo == Some(index) {
                continue;
            }
            let echo = if s.corrupt_echo == Some(index) { !b } else { b };
            if s.late_echo == Some(index) {
                s.held_echo = Some(echo);
                continue;
            }
            s.pending.push_back(echo);
        }
        Ok(accepted)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        let mut s = self.live()?;
        if s.clear_fails {
            return Err(io::ErrorKind::PermissionDenied.into());
        }
        s.pending.clear();
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        let mut s = self.0.lock().unwrap();
        s.probe.closes += 1;
        s.open = false;
        Ok(())
    }
}
