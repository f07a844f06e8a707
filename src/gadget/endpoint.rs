//! Gadget endpoint writer
//!
//! Wraps one HID function node. The node is opened lazily with
//! `O_NONBLOCK`, so a host that has not enumerated the gadget yet
//! surfaces as EAGAIN/EPIPE instead of blocking the event loop.
//!
//! A failed write never sleeps. It arms a retry deadline instead; sends
//! before that deadline fail fast without touching the node, and the
//! event loop wakes at `retry_at()` to push the latest state again.

use log::{debug, info, trace, warn};
use nix::errno::Errno;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::ReportSink;
use crate::constants::MAX_WRITE_BACKOFF;
use crate::error::GadgetWriteError;
use crate::hid::HidReport;

/// Retry pacing for a busy endpoint
#[derive(Debug, Clone, Copy)]
pub struct WritePolicy {
    /// Failed attempts tolerated quietly before the endpoint is reported stalled
    pub retries: u32,
    /// Delay before the first retry, doubled per failure up to `MAX_WRITE_BACKOFF`
    pub backoff: Duration,
}

impl WritePolicy {
    /// Delay after the `failures`-th consecutive failure
    pub fn delay_after(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1 << shift).min(MAX_WRITE_BACKOFF)
    }
}

/// How a failed write is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureClass {
    /// Host busy or not enumerated yet
    Retry,
    /// Endpoint was torn down and re-created; reopen the node
    Reopen,
    /// Node is gone
    Gone,
}

fn classify(err: &io::Error) -> FailureClass {
    match err.raw_os_error().map(Errno::from_i32) {
        Some(Errno::ESHUTDOWN) => FailureClass::Reopen,
        Some(Errno::ENODEV | Errno::ENOENT | Errno::ENXIO | Errno::EBADF) => FailureClass::Gone,
        // EAGAIN, EINTR, EPIPE, ENOTCONN, short writes, anything unexpected
        _ => FailureClass::Retry,
    }
}

/// Writer for one gadget function, typed by the report it accepts
pub struct GadgetEndpoint<R> {
    path: PathBuf,
    file: Option<File>,
    policy: WritePolicy,
    /// Consecutive failed attempts
    failures: u32,
    /// No write is attempted before this instant
    retry_due: Option<Instant>,
    _report: PhantomData<R>,
}

impl<R: HidReport> GadgetEndpoint<R> {
    /// Create the writer; the node is opened on first use
    pub fn new(path: impl Into<PathBuf>, policy: WritePolicy) -> Self {
        Self {
            path: path.into(),
            file: None,
            policy,
            failures: 0,
            retry_due: None,
            _report: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Open the node now if it is not open yet
    pub fn ensure_open(&mut self) -> io::Result<&mut File> {
        let file = match self.file.take() {
            Some(file) => file,
            None => {
                // No O_TRUNC/O_EXCL: a previous instance may still hold the node
                let file = OpenOptions::new()
                    .write(true)
                    .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
                    .open(&self.path)?;
                info!("{} gadget endpoint opened: {}", R::FUNCTION, self.path.display());
                file
            }
        };
        Ok(self.file.insert(file))
    }

    /// Close the handle; the next write reopens it
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("{} gadget endpoint closed: {}", R::FUNCTION, self.path.display());
        }
    }

    fn write_once(&mut self, bytes: &[u8]) -> io::Result<()> {
        let file = self.ensure_open()?;
        let n = file.write(bytes)?;
        if n != bytes.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write: {} of {} bytes", n, bytes.len()),
            ));
        }
        Ok(())
    }

    /// One write, plus an immediate reopen-and-write after ESHUTDOWN
    fn attempt(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.write_once(bytes) {
            Err(e) if classify(&e) == FailureClass::Reopen => {
                debug!("{}: endpoint shut down, reopening", self.path.display());
                self.close();
                self.write_once(bytes)
            }
            other => other,
        }
    }
}

impl<R: HidReport> ReportSink<R> for GadgetEndpoint<R> {
    fn send(&mut self, report: &R) -> Result<(), GadgetWriteError> {
        let bytes = report.as_bytes();
        debug_assert_eq!(bytes.len(), R::LEN);

        let now = Instant::now();
        if self.retry_due.map_or(false, |due| now < due) {
            return Err(GadgetWriteError::Transient {
                node: self.path.clone(),
                attempts: self.failures,
                source: io::Error::new(io::ErrorKind::WouldBlock, "backing off after a failed write"),
            });
        }

        let err = match self.attempt(bytes) {
            Ok(()) => {
                if self.failures > 0 {
                    debug!("{}: accepted after {} failed attempts", self.path.display(), self.failures);
                }
                self.failures = 0;
                self.retry_due = None;
                return Ok(());
            }
            Err(e) => e,
        };

        if classify(&err) == FailureClass::Gone {
            self.close();
            self.failures = 0;
            self.retry_due = None;
            return Err(GadgetWriteError::Terminal {
                node: self.path.clone(),
                source: err,
            });
        }

        self.failures = self.failures.saturating_add(1);
        let delay = self.policy.delay_after(self.failures);
        self.retry_due = Some(now + delay);
        if self.failures == self.policy.retries.saturating_add(1) {
            warn!(
                "{}: host not accepting {} reports ({}), retrying every {:?}",
                self.path.display(),
                R::FUNCTION,
                err,
                MAX_WRITE_BACKOFF
            );
        } else {
            trace!(
                "{}: attempt {} failed ({}), next in {:?}",
                self.path.display(),
                self.failures,
                err,
                delay
            );
        }

        Err(GadgetWriteError::Transient {
            node: self.path.clone(),
            attempts: self.failures,
            source: err,
        })
    }

    fn retry_at(&self) -> Option<Instant> {
        self.retry_due
    }
}

impl<R> Drop for GadgetEndpoint<R> {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            debug!("Gadget endpoint released: {}", self.path.display());
        }
    }
}
