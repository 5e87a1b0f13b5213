//! Background refill of the channel FIFOs while waveforms play.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::Result;
use crate::device::Shared;
use crate::regs::ap235::{self as regs, ChannelMask, MasterEnable};
use crate::sys::{Driver, Wakeup};

pub(crate) fn spawn<D: Driver + 'static>(shared: Arc<Shared<D>>) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("ap235-refill".to_owned())
        .spawn(move || {
            log::debug!("interrupt service started");
            match run(&shared) {
                Ok(()) => log::debug!("interrupt service stopped"),
                Err(error) => {
                    log::error!("interrupt service failed: {}", error);
                    shared.record_fault(error);
                }
            }
        })?;
    Ok(handle)
}

fn run<D: Driver>(shared: &Shared<D>) -> Result<()> {
    loop {
        match shared.driver.wait_for_interrupt(regs::ADDR_INTC_MER, MasterEnable::all().bits())? {
            Wakeup::Cancelled => return Ok(()),
            Wakeup::Interrupt => (),
        }
        let pending = ChannelMask::from_bits_retain(shared.read_u32(regs::ADDR_INTC_IPR)?);
        log::debug!("interrupt: {:?}", pending);
        if pending.is_empty() {
            return Ok(())
        }
        let channels = pending & ChannelMask::Channels;
        for channel in channels.channels() {
            let mut state = shared.lock();
            if !state.playing { return Ok(()) }
            shared.transfer(&mut state, channel)?;
        }
        let state = shared.lock();
        if !state.playing { return Ok(()) }
        // sources other than the channels are acknowledged but stay disabled
        shared.write_u32(regs::ADDR_INTC_IAR, pending.bits())?;
        if !channels.is_empty() {
            shared.write_u32(regs::ADDR_INTC_SIE, channels.bits())?;
        }
    }
}
