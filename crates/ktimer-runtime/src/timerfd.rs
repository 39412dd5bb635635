//! `TimerFdDriver` - Linux timerfd descriptors
//!
//! Every descriptor runs on `CLOCK_MONOTONIC`, the clock `Instant` reads,
//! so deadlines computed by the engine line up with kernel expirations.
//! Descriptors are non-blocking: reading one with no pending expiration
//! returns `EAGAIN`, which is how a reactor thread learns that another
//! thread already consumed the tick.

use std::io;
use std::os::fd::{AsFd, AsRawFd};
use std::time::Duration;

use nix::sys::time::TimeSpec;
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};

use ktimer_core::constants::MIN_ARM_DELAY;
use ktimer_core::traits::RawDescriptor;
use ktimer_core::{DescriptorMode, TimerDescriptor, TimerDriver};

/// Creates timerfd-backed descriptors
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerFdDriver;

impl TimerFdDriver {
    pub fn new() -> Self {
        Self
    }
}

impl TimerDriver for TimerFdDriver {
    type Descriptor = TimerFdDescriptor;

    fn create(&self, mode: DescriptorMode) -> io::Result<TimerFdDescriptor> {
        let fd = TimerFd::new(
            ClockId::CLOCK_MONOTONIC,
            TimerFlags::TFD_NONBLOCK | TimerFlags::TFD_CLOEXEC,
        )?;
        let descriptor = TimerFdDescriptor { fd };

        if let DescriptorMode::Periodic(period) = mode {
            // Interval fires first after one period, then every period
            descriptor.fd.set(
                Expiration::Interval(timespec(period)),
                TimerSetTimeFlags::empty(),
            )?;
        }
        Ok(descriptor)
    }

    fn name(&self) -> &'static str {
        "timerfd"
    }
}

/// An owned timerfd; closed on drop
#[derive(Debug)]
pub struct TimerFdDescriptor {
    fd: TimerFd,
}

impl TimerDescriptor for TimerFdDescriptor {
    fn raw(&self) -> RawDescriptor {
        self.fd.as_fd().as_raw_fd()
    }

    fn arm(&self, delay: Duration) -> io::Result<()> {
        // A zero one-shot value would disarm instead
        let delay = delay.max(MIN_ARM_DELAY);
        self.fd
            .set(Expiration::OneShot(timespec(delay)), TimerSetTimeFlags::empty())?;
        Ok(())
    }

    fn disarm(&self) -> io::Result<()> {
        self.fd.unset()?;
        Ok(())
    }

    fn read_and_ack(&self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        let ret = unsafe {
            libc::read(
                self.raw(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // Nothing pending: another reactor thread read it first
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(0);
            }
            return Err(err);
        }
        if ret as usize != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "short read from timerfd",
            ));
        }
        Ok(u64::from_ne_bytes(buf))
    }
}

#[inline]
fn timespec(d: Duration) -> TimeSpec {
    TimeSpec::from_duration(d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_shared_descriptor_starts_disarmed() {
        let desc = TimerFdDriver.create(DescriptorMode::Shared).unwrap();
        assert!(desc.raw() >= 0);
        thread::sleep(Duration::from_millis(5));
        assert_eq!(desc.read_and_ack().unwrap(), 0);
    }

    #[test]
    fn test_oneshot_expires_once() {
        let desc = TimerFdDriver.create(DescriptorMode::Shared).unwrap();
        desc.arm(Duration::from_millis(2)).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(desc.read_and_ack().unwrap(), 1);
        assert_eq!(desc.read_and_ack().unwrap(), 0);
    }

    #[test]
    fn test_zero_delay_still_fires() {
        let desc = TimerFdDriver.create(DescriptorMode::Shared).unwrap();
        desc.arm(Duration::ZERO).unwrap();
        thread::sleep(Duration::from_millis(5));
        assert_eq!(desc.read_and_ack().unwrap(), 1);
    }

    #[test]
    fn test_disarm_cancels_pending_expiration() {
        let desc = TimerFdDriver.create(DescriptorMode::Shared).unwrap();
        desc.arm(Duration::from_millis(20)).unwrap();
        desc.disarm().unwrap();
        thread::sleep(Duration::from_millis(40));
        assert_eq!(desc.read_and_ack().unwrap(), 0);
    }

    #[test]
    fn test_periodic_coalesces_expirations() {
        let desc = TimerFdDriver
            .create(DescriptorMode::Periodic(Duration::from_millis(2)))
            .unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(desc.read_and_ack().unwrap() >= 2);
    }
}
