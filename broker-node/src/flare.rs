//! Flare: a file-descriptor-backed ready signal
//!
//! A UNIX pipe whose read end becomes readable while the flare is
//! "fired", so it integrates with select/poll loops outside this
//! process's control. Firing and extinguishing must be coordinated by
//! the owner (the shared queues toggle it under their mutex); waiting
//! never consumes.

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd::{read, write};
use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::time::Instant;

pub struct Flare {
    read_end: OwnedFd,
    write_end: OwnedFd,
}

impl Flare {
    /// Open the pipe; both ends are non-blocking.
    pub fn new() -> io::Result<Self> {
        let (read_end, write_end) = nix::unistd::pipe().map_err(io::Error::from)?;
        for fd in [&read_end, &write_end] {
            fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK)).map_err(io::Error::from)?;
        }
        Ok(Self { read_end, write_end })
    }

    /// The descriptor that polls readable while fired.
    pub fn fd(&self) -> RawFd {
        self.read_end.as_raw_fd()
    }

    /// Put the flare into the ready state by writing `num` bytes. A full
    /// pipe already signals plenty; short writes are fine.
    pub fn fire(&self, num: usize) {
        let buf = vec![0u8; num.max(1)];
        let _ = write(self.write_end.as_fd(), &buf);
    }

    /// Drain every pending byte. Returns how many were consumed.
    pub fn extinguish(&self) -> usize {
        let mut total = 0;
        let mut buf = [0u8; 256];
        while let Ok(n) = read(self.read_end.as_raw_fd(), &mut buf) {
            if n == 0 {
                break;
            }
            total += n;
        }
        total
    }

    /// Consume at most one byte, possibly leaving the flare fired.
    /// Returns whether a byte was read.
    pub fn extinguish_one(&self) -> bool {
        let mut buf = [0u8; 1];
        matches!(read(self.read_end.as_raw_fd(), &mut buf), Ok(1))
    }

    /// Block until the flare is fired. Does not consume.
    pub fn await_ready(&self) {
        let mut fds = [PollFd::new(self.read_end.as_fd(), PollFlags::POLLIN)];
        loop {
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(n) if n > 0 => return,
                Ok(_) | Err(nix::errno::Errno::EINTR) => continue,
                Err(_) => return,
            }
        }
    }

    /// Block until the flare is fired or `deadline` passes. Returns
    /// whether it fired in time. Does not consume.
    pub fn await_deadline(&self, deadline: Instant) -> bool {
        loop {
            let now = Instant::now();
            if deadline <= now {
                return false;
            }
            let ms = (deadline - now).as_millis().min(i32::MAX as u128) as i32;
            let timeout = PollTimeout::try_from(ms).unwrap_or(PollTimeout::MAX);
            let mut fds = [PollFd::new(self.read_end.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, timeout) {
                Ok(n) if n > 0 => return true,
                Ok(_) => return false,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(_) => return false,
            }
        }
    }
}

impl std::fmt::Debug for Flare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flare").field("fd", &self.fd()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fire_then_extinguish() {
        let flare = Flare::new().unwrap();
        assert!(!flare.extinguish_one());
        flare.fire(1);
        assert!(flare.extinguish_one());
        assert!(!flare.extinguish_one());

        flare.fire(3);
        assert_eq!(flare.extinguish(), 3);
    }

    #[test]
    fn waiting_sees_the_signal_without_consuming() {
        let flare = Flare::new().unwrap();
        flare.fire(1);
        flare.await_ready();
        // Still fired: waiting must not consume.
        assert!(flare.await_deadline(Instant::now() + Duration::from_millis(10)));
        assert!(flare.extinguish_one());
    }

    #[test]
    fn deadline_expires_cleanly() {
        let flare = Flare::new().unwrap();
        let before = Instant::now();
        assert!(!flare.await_deadline(before + Duration::from_millis(20)));
        assert!(before.elapsed() >= Duration::from_millis(20));
        // An already-passed deadline returns immediately.
        assert!(!flare.await_deadline(Instant::now() - Duration::from_millis(1)));
    }

    #[test]
    fn cross_thread_wakeup() {
        let flare = std::sync::Arc::new(Flare::new().unwrap());
        let waiter = flare.clone();
        let handle = std::thread::spawn(move || {
            waiter.await_ready();
            true
        });
        std::thread::sleep(Duration::from_millis(20));
        flare.fire(1);
        assert!(handle.join().unwrap());
    }
}
