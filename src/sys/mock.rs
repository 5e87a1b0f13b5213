//! Simulated register file of an AP235, for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::{Result, NUM_CHANNELS};
use crate::regs::ap235 as regs;
use super::Wakeup;

#[derive(Debug, Default)]
struct State {
    regs: HashMap<usize, u32>,
    writes: Vec<(usize, u32)>,
    fifos: [Vec<u16>; NUM_CHANNELS],
    flash: HashMap<u32, u8>,
    spi_tx: Vec<u8>,
    spi_rx: VecDeque<u8>,
    pending: u32,
    interrupt: bool,
    cancelled: bool,
    waits: usize,
    failing: Option<usize>,
    unblock_failing: bool,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    changed: Condvar,
}

/// Shared handle to the simulated board; clones observe the same registers.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    inner: Arc<Inner>,
}

const TIMEOUT: Duration = Duration::from_secs(5);

impl MockDriver {
    /// A board with a valid identification string and all coefficients zero.
    pub fn new() -> MockDriver {
        let driver = MockDriver::default();
        // the identification sits inside the coefficient area, past the last channel's ranges
        driver.set_flash(regs::FLASH_ADDR_COEFFICIENTS, &[0; NUM_CHANNELS * regs::FLASH_COEFFICIENT_STRIDE as usize]);
        driver.set_flash(regs::FLASH_ADDR_ID, b"AP235 16CH DAC\0\0");
        driver
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap()
    }

    pub fn set_flash(&self, addr: u32, data: &[u8]) {
        let mut state = self.lock();
        for (offset, &byte) in data.iter().enumerate() {
            state.flash.insert(addr + offset as u32, byte);
        }
    }

    pub fn reg(&self, addr: usize) -> u32 {
        self.lock().regs.get(&addr).copied().unwrap_or(0)
    }

    pub fn set_reg(&self, addr: usize, value: u32) {
        self.lock().regs.insert(addr, value);
    }

    /// Every 32-bit register write so far, in order, excluding FIFO data.
    pub fn writes(&self) -> Vec<(usize, u32)> {
        self.lock().writes.clone()
    }

    pub fn writes_to(&self, addr: usize) -> Vec<u32> {
        self.lock().writes.iter().filter(|(a, _)| *a == addr).map(|&(_, v)| v).collect()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear()
    }

    /// Samples pushed into the FIFO of `channel` so far.
    pub fn fifo(&self, channel: usize) -> Vec<u16> {
        self.lock().fifos[channel].clone()
    }

    pub fn pending(&self) -> u32 {
        self.lock().pending
    }

    /// Makes every write to `addr` fail.
    pub fn fail_writes_to(&self, addr: usize) {
        self.lock().failing = Some(addr)
    }

    /// Makes cancelling an interrupt wait fail; the waiting thread stays blocked.
    pub fn fail_unblock(&self) {
        self.lock().unblock_failing = true
    }

    /// Flags the interrupt sources in `mask` as pending and raises the interrupt line.
    pub fn raise(&self, mask: u32) {
        let mut state = self.lock();
        state.pending |= mask;
        state.interrupt = true;
        self.inner.changed.notify_all();
    }

    /// Number of times a thread has blocked waiting for an interrupt.
    pub fn waits(&self) -> usize {
        self.lock().waits
    }

    /// Blocks until a thread has started waiting for an interrupt at least `count` times.
    pub fn wait_for_waiters(&self, count: usize) {
        let state = self.lock();
        let (_state, timeout) = self.inner.changed
            .wait_timeout_while(state, TIMEOUT, |state| state.waits < count)
            .unwrap();
        assert!(!timeout.timed_out(), "interrupt service did not block {} times", count);
    }

    /// Blocks until no interrupt sources are pending.
    pub fn wait_for_acknowledge(&self) {
        let state = self.lock();
        let (_state, timeout) = self.inner.changed
            .wait_timeout_while(state, TIMEOUT, |state| state.pending != 0)
            .unwrap();
        assert!(!timeout.timed_out(), "interrupts were not acknowledged");
    }

    fn spi_status(state: &State) -> u32 {
        let mut status = regs::SpiStatus::TxEmpty;
        if state.spi_rx.is_empty() {
            status |= regs::SpiStatus::RxEmpty;
        }
        status.bits()
    }

    fn spi_transfer(state: &mut State) {
        let tx = std::mem::take(&mut state.spi_tx);
        if tx.len() < 4 || tx[0] != regs::FLASH_CMD_READ {
            state.spi_rx.extend(tx.iter().map(|_| 0xFF));
            return
        }
        let addr = u32::from_be_bytes([0, tx[1], tx[2], tx[3]]);
        state.spi_rx.extend([0xFF; 4]);
        for offset in 0..tx.len() as u32 - 4 {
            let byte = state.flash.get(&(addr + offset)).copied().unwrap_or(0xFF);
            state.spi_rx.push_back(byte);
        }
    }
}

impl super::Driver for MockDriver {
    fn read_user(&self, addr: usize, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), 4, "unexpected read of {} bytes at {:#x}", data.len(), addr);
        let mut state = self.lock();
        let value = match addr {
            regs::ADDR_INTC_IPR => state.pending,
            regs::ADDR_QSPI_SPISR => Self::spi_status(&state),
            regs::ADDR_QSPI_SPIDRR => state.spi_rx.pop_front().unwrap_or(0) as u32,
            _ => state.regs.get(&addr).copied().unwrap_or(0),
        };
        data.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn write_user(&self, addr: usize, data: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if state.failing == Some(addr) {
            return Err(std::io::Error::other("bus error").into())
        }
        let fifo = (0..NUM_CHANNELS).find(|&channel| regs::addr_fifo(channel) == addr);
        match (data, fifo) {
            (&[a, b], Some(channel)) => {
                state.fifos[channel].push(u16::from_le_bytes([a, b]));
                return Ok(())
            }
            (&[a, b, c, d], Some(channel)) => {
                state.fifos[channel].push(u16::from_le_bytes([a, b]));
                state.fifos[channel].push(u16::from_le_bytes([c, d]));
                return Ok(())
            }
            (&[a, b, c, d], None) => {
                let value = u32::from_le_bytes([a, b, c, d]);
                state.writes.push((addr, value));
                match addr {
                    regs::ADDR_INTC_IAR => state.pending &= !value,
                    regs::ADDR_QSPI_SRR => {
                        state.spi_tx.clear();
                        state.spi_rx.clear();
                    }
                    regs::ADDR_QSPI_SPIDTR => state.spi_tx.push(value as u8),
                    regs::ADDR_QSPI_SPICR => {
                        let control = regs::SpiControl::from_bits_retain(value);
                        if control.contains(regs::SpiControl::RxFifoReset) {
                            state.spi_rx.clear();
                        }
                        let selected = state.regs.get(&regs::ADDR_QSPI_SPISSR).map_or(false, |ssr| ssr & 1 == 0);
                        if selected && !control.contains(regs::SpiControl::MasterTransInhibit) {
                            Self::spi_transfer(&mut state);
                        }
                    }
                    _ => (),
                }
                state.regs.insert(addr, value);
            }
            _ => panic!("unexpected write of {} bytes at {:#x}", data.len(), addr),
        }
        self.inner.changed.notify_all();
        Ok(())
    }

    fn wait_for_interrupt(&self, addr: usize, value: u32) -> Result<Wakeup> {
        self.write_user(addr, &value.to_le_bytes())?;
        let mut state = self.lock();
        state.waits += 1;
        self.inner.changed.notify_all();
        loop {
            if state.cancelled {
                state.cancelled = false;
                return Ok(Wakeup::Cancelled)
            }
            if state.interrupt {
                state.interrupt = false;
                return Ok(Wakeup::Interrupt)
            }
            state = self.inner.changed.wait(state).unwrap();
        }
    }

    fn unblock_wait(&self) -> Result<()> {
        let mut state = self.lock();
        if state.unblock_failing {
            return Err(std::io::Error::other("eventfd write failed").into())
        }
        state.cancelled = true;
        self.inner.changed.notify_all();
        Ok(())
    }

    fn rearm_wait(&self) -> Result<()> {
        self.lock().cancelled = false;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_identification_survives_coefficients() {
        let mock = MockDriver::new();
        let state = mock.lock();
        let id: Vec<u8> = (0..5).map(|offset| state.flash[&(regs::FLASH_ADDR_ID + offset)]).collect();
        assert_eq!(id, b"AP235");
        assert_eq!(state.flash[&(regs::FLASH_ADDR_COEFFICIENTS + 15 * regs::FLASH_COEFFICIENT_STRIDE)], 0);
    }
}
