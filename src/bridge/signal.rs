//! Shutdown signals through signalfd
//!
//! SIGTERM, SIGINT and SIGHUP are blocked on the calling thread and read
//! from a signalfd, so they wake the poll loop like any other source.

use anyhow::{Context, Result};
use log::{info, warn};
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::signal::{SigSet, SigmaskHow, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use std::os::unix::io::{AsRawFd, BorrowedFd, RawFd};
use std::time::{Duration, Instant};

const SHUTDOWN_SIGNALS: [Signal; 3] = [Signal::SIGTERM, Signal::SIGINT, Signal::SIGHUP];

pub struct ShutdownSignal {
    signal_fd: SignalFd,
    /// Mask in effect before we blocked the shutdown signals
    old_sigmask: SigSet,
    received: Option<Signal>,
}

impl ShutdownSignal {
    /// Block the shutdown signals on this thread and open the signalfd.
    /// Must run before any other thread is spawned.
    pub fn new() -> Result<Self> {
        let mut mask = SigSet::empty();
        for signal in SHUTDOWN_SIGNALS {
            mask.add(signal);
        }

        let old_sigmask = mask
            .thread_swap_mask(SigmaskHow::SIG_BLOCK)
            .context("Failed to block shutdown signals")?;

        let signal_fd = match SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
        {
            Ok(fd) => fd,
            Err(e) => {
                old_sigmask.thread_set_mask().ok();
                return Err(e).context("Failed to create signalfd");
            }
        };

        Ok(Self {
            signal_fd,
            old_sigmask,
            received: None,
        })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.signal_fd.as_raw_fd()
    }

    /// Signal that requested shutdown, if any
    pub fn received(&self) -> Option<Signal> {
        self.received
    }

    /// Drain the signalfd; true once a shutdown signal has arrived
    pub fn check(&mut self) -> bool {
        while self.received.is_none() {
            match self.signal_fd.read_signal() {
                Ok(Some(siginfo)) => match Signal::try_from(siginfo.ssi_signo as i32) {
                    Ok(signal) => {
                        info!("Received {}, shutting down", signal);
                        self.received = Some(signal);
                    }
                    Err(_) => warn!("Unexpected signal {} on signalfd", siginfo.ssi_signo),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("signalfd read error: {}", e);
                    break;
                }
            }
        }
        self.received.is_some()
    }

    /// Sleep up to `duration`; returns false if shutdown was requested
    pub fn sleep(&mut self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.check() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let timeout = timeout_ms(deadline - now);

            // Safety: the signalfd outlives this call
            let fd = unsafe { BorrowedFd::borrow_raw(self.raw_fd()) };
            let mut fds = [PollFd::new(&fd, PollFlags::POLLIN)];
            match poll(&mut fds, timeout) {
                Ok(_) | Err(nix::errno::Errno::EINTR) => {}
                Err(e) => {
                    warn!("poll on signalfd failed: {}", e);
                    std::thread::sleep(deadline - now);
                }
            }
        }
    }
}

impl Drop for ShutdownSignal {
    fn drop(&mut self) {
        if let Err(e) = self.old_sigmask.thread_set_mask() {
            warn!("Failed to restore signal mask: {}", e);
        }
    }
}

/// Milliseconds for poll(2), rounded up so deadlines are not spun on
pub fn timeout_ms(duration: Duration) -> libc::c_int {
    let ms = duration.as_micros().div_ceil(1000);
    ms.min(libc::c_int::MAX as u128) as libc::c_int
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_rounds_up() {
        assert_eq!(timeout_ms(Duration::ZERO), 0);
        assert_eq!(timeout_ms(Duration::from_micros(1)), 1);
        assert_eq!(timeout_ms(Duration::from_millis(8)), 8);
        assert_eq!(timeout_ms(Duration::from_secs(u64::MAX)), libc::c_int::MAX);
    }

    #[test]
    fn test_thread_directed_signal_is_seen() {
        let mut signal = ShutdownSignal::new().unwrap();
        assert!(!signal.check());
        assert!(signal.sleep(Duration::from_millis(5)));

        // SIGHUP is blocked on this thread, so it stays pending for the signalfd
        nix::sys::pthread::pthread_kill(nix::sys::pthread::pthread_self(), Signal::SIGHUP)
            .unwrap();
        assert!(!signal.sleep(Duration::from_secs(5)));
        assert_eq!(signal.received(), Some(Signal::SIGHUP));
    }
}
