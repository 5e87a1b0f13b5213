use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    Interrupt,
    Cancelled,
}

pub trait Driver: Send + Sync {
    fn read_user(&self, addr: usize, data: &mut [u8]) -> Result<(), Error>;
    fn write_user(&self, addr: usize, data: &[u8]) -> Result<(), Error>;

    /// Writes `value` to the register at `addr` (normally the master interrupt enable) and
    /// blocks until the board raises an interrupt or `unblock_wait` is called.
    fn wait_for_interrupt(&self, addr: usize, value: u32) -> Result<Wakeup, Error>;
    /// Wakes up a thread blocked in `wait_for_interrupt`, or the next one to block.
    fn unblock_wait(&self) -> Result<(), Error>;
    /// Discards a pending `unblock_wait` left over from a previous session.
    fn rearm_wait(&self) -> Result<(), Error>;
}

#[cfg(any(target_os = "linux"))]
#[path = "linux.rs"]
pub mod imp;

#[cfg(not(any(target_os = "linux")))]
#[path = "stub.rs"]
pub mod imp;

#[cfg(test)]
pub mod mock;
