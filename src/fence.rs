//! Acquire fences.
//!
//! A fence is a sync-file fd that becomes readable once the hardware work it
//! guards has finished. CPU access to a buffer waits on it first.

use crate::error::{Error, Result};
use rustix::event::{PollFd, PollFlags, Timespec, poll};
use rustix::fd::{AsFd, BorrowedFd, OwnedFd};
use rustix::io::Errno;
use std::time::{Duration, Instant};

/// An owned sync-file fd. Dropping it closes the fd.
#[derive(Debug)]
pub struct Fence(OwnedFd);

impl Fence {
    /// Take ownership of a fence fd.
    pub fn new(fd: OwnedFd) -> Self {
        Self(fd)
    }

    /// Block until the fence signals.
    ///
    /// `None` waits indefinitely. Interrupted waits resume with the
    /// remaining time.
    ///
    /// # Errors
    ///
    /// - [`Error::NoResources`] if the timeout elapsed first
    /// - [`Error::BadValue`] if the fd is not pollable
    pub fn wait(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let timespec = remaining.map(|r| Timespec {
                tv_sec: r.as_secs() as _,
                tv_nsec: r.subsec_nanos() as _,
            });

            let mut fds = [PollFd::new(&self.0, PollFlags::IN)];
            match poll(&mut fds, timespec.as_ref()) {
                Ok(0) => {
                    tracing::warn!(?timeout, "fence wait timed out");
                    return Err(Error::NoResources("fence wait timed out".into()));
                }
                Ok(_) => {
                    let revents = fds[0].revents();
                    if revents.intersects(PollFlags::ERR | PollFlags::NVAL) {
                        tracing::error!(?revents, "fence fd is in an error state");
                        return Err(Error::BadValue(format!("fence poll returned {revents:?}")));
                    }
                    return Ok(());
                }
                Err(Errno::INTR) | Err(Errno::AGAIN) => continue,
                Err(e) => {
                    tracing::error!(error = %e, "fence wait failed");
                    return Err(e.into());
                }
            }
        }
    }

    /// Wait indefinitely, then close the fence.
    pub fn wait_and_close(self) -> Result<()> {
        self.wait(None)
    }
}

impl AsFd for Fence {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl From<OwnedFd> for Fence {
    fn from(fd: OwnedFd) -> Self {
        Self(fd)
    }
}
