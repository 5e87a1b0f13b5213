use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{sleep, JoinHandle};
use std::time::Duration;

use crate::{Error, Result};
use crate::{CalibrationTable, Coefficients, OutputRange};
use crate::{ChannelConfiguration, DeviceConfiguration, OperatingMode, OutputScale, TriggerSource};
use crate::sys::Driver;
use crate::regs::ap235::{self as regs, ChannelMask, CommonControl, SpiControl, SpiStatus};
use crate::waveform::{self, WaveformBuffer, MAX_SAMPLES};
use crate::service;

pub use crate::regs::ap235::ChannelStatus;

pub const NUM_CHANNELS: usize = 16;

/// Period of one timer divider count.
pub const TIMER_TICK_NS: u32 = 32;
/// Below this divider the DAC cannot follow the timer.
const MIN_TIMER_DIVIDER: u32 = 310;
/// Below this divider refills cannot keep up when all channels play waveforms.
const MIN_TIMER_DIVIDER_ALL_CHANNELS: u32 = 620;
pub const DEFAULT_TIMER_DIVIDER: u32 = MIN_TIMER_DIVIDER_ALL_CHANNELS;

/// Settling time of a direct access write.
const DIRECT_ACCESS_DELAY: Duration = Duration::from_micros(2);
/// Number of status reads before giving up on the flash.
const FLASH_POLL_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoardStatus {
    /// Carrier slot the board is plugged into.
    pub location: u32,
    pub firmware_revision: u32,
    /// FPGA die temperature in degrees Celsius.
    pub temperature: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveformInfo {
    pub sample_count: usize,
    /// Index of the next sample to be moved into the FIFO.
    pub cursor: usize,
}

#[derive(Debug)]
pub(crate) struct State {
    channels: [ChannelConfiguration; NUM_CHANNELS],
    buffers: [Option<WaveformBuffer>; NUM_CHANNELS],
    calibration: CalibrationTable,
    timer_divider: u32,
    trigger_output: bool,
    pub(crate) playing: bool,
    worker: Option<JoinHandle<()>>,
}

/// Everything the interrupt service needs; shared between it and the device handle.
#[derive(Debug)]
pub(crate) struct Shared<D: Driver> {
    pub(crate) driver: D,
    state: Mutex<State>,
    fault: Mutex<Option<Error>>,
}

impl<D: Driver> Shared<D> {
    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn record_fault(&self, error: Error) {
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(error)
    }

    pub(crate) fn read_u32(&self, addr: usize) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.driver.read_user(addr, &mut bytes[..])?;
        let data = u32::from_le_bytes(bytes);
        log::trace!("read_u32({:#x}) = {:#x}", addr, data);
        Ok(data)
    }

    pub(crate) fn write_u32(&self, addr: usize, data: u32) -> Result<()> {
        log::trace!("write_u32({:#x}, {:#x})", addr, data);
        self.driver.write_user(addr, &data.to_le_bytes()[..])
    }

    fn modify_common_control<F: FnOnce(&mut CommonControl)>(&self, f: F) -> Result<()> {
        let mut value = CommonControl::from_bits_retain(self.read_u32(regs::ADDR_COMMON_CONTROL)?);
        f(&mut value);
        log::debug!("write_common_control({:?})", value);
        self.write_u32(regs::ADDR_COMMON_CONTROL, value.bits())
    }

    /// Writes the complete configuration of `channel` to the board.
    fn push_config(&self, state: &State, channel: usize) -> Result<()> {
        let config = &state.channels[channel];
        log::debug!("configure channel {}: {:?}", channel, config);
        let mask = ChannelMask::channel(channel);
        self.write_u32(regs::ADDR_INTC_CIE, mask.bits())?;
        self.write_u32(regs::addr_direct(channel), config.dac_control_word())?;
        self.write_u32(regs::addr_status(channel), config.status_word())?;
        self.write_u32(regs::ADDR_TIMER_DIVIDER, state.timer_divider)?;
        let trigger_output = state.trigger_output;
        self.modify_common_control(|val| val.set(CommonControl::TriggerOutput, trigger_output))?;
        self.write_u32(regs::addr_control(channel), config.channel_control_word())?;
        if config.operating_mode == OperatingMode::Waveform && config.interrupt_source {
            self.write_u32(regs::ADDR_INTC_SIE, mask.bits())?;
        }
        Ok(())
    }

    fn write_direct(&self, channel: usize, command: u32, data: u32) -> Result<()> {
        self.write_u32(regs::addr_direct(channel), regs::dac_command(command, data))?;
        sleep(DIRECT_ACCESS_DELAY);
        Ok(())
    }

    /// Moves the next chunk of the waveform of `channel` into its FIFO.
    pub(crate) fn transfer(&self, state: &mut State, channel: usize) -> Result<()> {
        let Some(buffer) = state.buffers[channel].as_mut() else {
            log::warn!("refill requested for channel {} without a waveform", channel);
            return Ok(())
        };
        let chunk = buffer.next_chunk();
        log::debug!("transfer channel {}: {} samples at {} ({} bytes)",
            channel, chunk.length, chunk.offset, chunk.byte_span());
        let fifo = regs::addr_fifo(channel);
        let mut pairs = buffer.samples(chunk).chunks_exact(2);
        for pair in &mut pairs {
            let word = pair[0] as u32 | (pair[1] as u32) << 16;
            self.driver.write_user(fifo, &word.to_le_bytes()[..])?;
        }
        if let [last] = *pairs.remainder() {
            self.driver.write_user(fifo, &last.to_le_bytes()[..])?;
        }
        Ok(())
    }

    fn wait_spi_status<F: Fn(SpiStatus) -> bool>(&self, f: F) -> Result<()> {
        for _ in 0..FLASH_POLL_LIMIT {
            let status = SpiStatus::from_bits_retain(self.read_u32(regs::ADDR_QSPI_SPISR)?);
            if f(status) { return Ok(()) }
        }
        Err(Error::FlashTimeout)
    }

    /// Runs one SPI transaction with the flash: shifts out `command`, then clocks in
    /// `response.len()` bytes.
    fn transact_spi(&self, command: &[u8], response: &mut [u8]) -> Result<()> {
        log::trace!("transact_spi({:02x?}, {})", command, response.len());
        let control = SpiControl::SpiEnable | SpiControl::Master | SpiControl::ManualSlaveSelect;
        self.write_u32(regs::ADDR_QSPI_SPICR, (control | SpiControl::MasterTransInhibit |
            SpiControl::TxFifoReset | SpiControl::RxFifoReset).bits())?;
        self.write_u32(regs::ADDR_QSPI_SPISSR, !1)?;
        // the response is clocked in by transmitting dummy bytes
        for &byte in command.iter().chain(std::iter::repeat(&0).take(response.len())) {
            self.write_u32(regs::ADDR_QSPI_SPIDTR, byte as u32)?;
        }
        self.write_u32(regs::ADDR_QSPI_SPICR, control.bits())?;
        self.wait_spi_status(|status| status.contains(SpiStatus::TxEmpty))?;
        for index in 0..command.len() + response.len() {
            self.wait_spi_status(|status| !status.contains(SpiStatus::RxEmpty))?;
            let byte = self.read_u32(regs::ADDR_QSPI_SPIDRR)? as u8;
            if let Some(slot) = index.checked_sub(command.len()) {
                response[slot] = byte;
            }
        }
        self.write_u32(regs::ADDR_QSPI_SPICR, (control | SpiControl::MasterTransInhibit).bits())?;
        self.write_u32(regs::ADDR_QSPI_SPISSR, !0)?;
        Ok(())
    }

    fn read_flash(&self, addr: u32, data: &mut [u8]) -> Result<()> {
        log::debug!("read_flash({:#08x}, {})", addr, data.len());
        self.write_u32(regs::ADDR_QSPI_SRR, regs::QSPI_RESET_KEY)?;
        // the command and the response share the FIFO
        let chunk_len = regs::QSPI_FIFO_DEPTH - 4;
        for (index, chunk) in data.chunks_mut(chunk_len).enumerate() {
            let [_, a2, a1, a0] = (addr + (index * chunk_len) as u32).to_be_bytes();
            self.transact_spi(&[regs::FLASH_CMD_READ, a2, a1, a0], chunk)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Device<D: Driver + 'static> {
    shared: Arc<Shared<D>>,
    identification: String,
}

impl Device<crate::sys::imp::Ap235DriverImpl> {
    /// Opens the board exposed as `/dev/uio{index}`.
    pub fn open(index: usize) -> Result<Device<crate::sys::imp::Ap235DriverImpl>> {
        Self::new(crate::sys::imp::Ap235DriverImpl::new(index)?)
    }
}

fn check_channel(channel: usize) -> Result<()> {
    if channel < NUM_CHANNELS { Ok(()) } else { Err(Error::InvalidChannel(channel)) }
}

fn consistency(config: &ChannelConfiguration, channel: usize) -> Result<()> {
    if config.is_consistent() {
        Ok(())
    } else {
        log::warn!("channel {}: {:?} mode cannot be driven by the {:?} trigger",
            channel, config.operating_mode, config.trigger_source);
        Err(Error::IncompatibleOperatingTrigger(channel))
    }
}

impl<D: Driver + 'static> Device<D> {
    /// Identifies the board and loads its calibration from flash.
    pub fn new(driver: D) -> Result<Device<D>> {
        let shared = Shared {
            driver,
            state: Mutex::new(State {
                channels: [ChannelConfiguration::default(); NUM_CHANNELS],
                buffers: std::array::from_fn(|_| None),
                calibration: CalibrationTable::default(),
                timer_divider: DEFAULT_TIMER_DIVIDER,
                trigger_output: false,
                playing: false,
                worker: None,
            }),
            fault: Mutex::new(None),
        };

        let mut id_bytes = [0u8; regs::FLASH_ID_LEN];
        shared.read_flash(regs::FLASH_ADDR_ID, &mut id_bytes)?;
        let id_len = id_bytes.iter().position(|&byte| byte == 0).unwrap_or(id_bytes.len());
        let identification = String::from_utf8_lossy(&id_bytes[..id_len]).trim().to_owned();
        if !identification.contains("AP235") {
            return Err(Error::BadIdentification(identification))
        }

        let mut calibration = CalibrationTable::default();
        for channel in 0..NUM_CHANNELS {
            let mut block = [0u8; CalibrationTable::BLOCK_LEN];
            let addr = regs::FLASH_ADDR_COEFFICIENTS + channel as u32 * regs::FLASH_COEFFICIENT_STRIDE;
            shared.read_flash(addr, &mut block)?;
            calibration.load_block(channel, &block);
        }
        shared.lock().calibration = calibration;

        // start from a quiet interrupt controller
        shared.write_u32(regs::ADDR_INTC_CIE, ChannelMask::All.bits())?;
        shared.write_u32(regs::ADDR_INTC_MER, 0)?;

        log::info!("opened {:?}", identification);
        Ok(Device { shared: Arc::new(shared), identification })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.lock()
    }

    pub fn identification(&self) -> &str {
        &self.identification
    }

    fn modify_channel<F: FnOnce(&mut ChannelConfiguration)>(&self, channel: usize, f: F) -> Result<()> {
        check_channel(channel)?;
        let mut state = self.lock();
        f(&mut state.channels[channel]);
        self.shared.push_config(&state, channel)
    }

    pub fn channel_configuration(&self, channel: usize) -> Result<ChannelConfiguration> {
        check_channel(channel)?;
        Ok(self.lock().channels[channel])
    }

    fn get<T, F: FnOnce(&ChannelConfiguration) -> T>(&self, channel: usize, f: F) -> Result<T> {
        Ok(f(&self.channel_configuration(channel)?))
    }

    pub fn set_range(&self, channel: usize, range: OutputRange) -> Result<()> {
        self.modify_channel(channel, |config| config.range = range)
    }

    pub fn range(&self, channel: usize) -> Result<OutputRange> {
        self.get(channel, |config| config.range)
    }

    pub fn set_power_up_voltage(&self, channel: usize, scale: OutputScale) -> Result<()> {
        self.modify_channel(channel, |config| config.power_up_scale = scale)
    }

    pub fn power_up_voltage(&self, channel: usize) -> Result<OutputScale> {
        self.get(channel, |config| config.power_up_scale)
    }

    pub fn set_clear_voltage(&self, channel: usize, scale: OutputScale) -> Result<()> {
        self.modify_channel(channel, |config| config.clear_scale = scale)
    }

    pub fn clear_voltage(&self, channel: usize) -> Result<OutputScale> {
        self.get(channel, |config| config.clear_scale)
    }

    pub fn set_over_temp_behavior(&self, channel: usize, shutdown: bool) -> Result<()> {
        self.modify_channel(channel, |config| config.thermal_shutdown = shutdown)
    }

    pub fn over_temp_behavior(&self, channel: usize) -> Result<bool> {
        self.get(channel, |config| config.thermal_shutdown)
    }

    pub fn set_over_range(&self, channel: usize, allowed: bool) -> Result<()> {
        self.modify_channel(channel, |config| config.over_range = allowed)
    }

    pub fn over_range(&self, channel: usize) -> Result<bool> {
        self.get(channel, |config| config.over_range)
    }

    pub fn set_output_simultaneous(&self, channel: usize, simultaneous: bool) -> Result<()> {
        self.modify_channel(channel, |config| config.simultaneous = simultaneous)
    }

    pub fn output_simultaneous(&self, channel: usize) -> Result<bool> {
        self.get(channel, |config| config.simultaneous)
    }

    pub fn set_clear_on_underflow(&self, channel: usize, clear: bool) -> Result<()> {
        self.modify_channel(channel, |config| config.underflow_clear = clear)
    }

    pub fn clear_on_underflow(&self, channel: usize) -> Result<bool> {
        self.get(channel, |config| config.underflow_clear)
    }

    /// Selects the trigger source of `channel`. The change is always applied; an
    /// `IncompatibleOperatingTrigger` error reports that it does not suit the operating mode.
    pub fn set_trigger_mode(&self, channel: usize, source: TriggerSource) -> Result<()> {
        check_channel(channel)?;
        let mut state = self.lock();
        state.channels[channel].trigger_source = source;
        self.shared.push_config(&state, channel)?;
        consistency(&state.channels[channel], channel)
    }

    pub fn trigger_mode(&self, channel: usize) -> Result<TriggerSource> {
        self.get(channel, |config| config.trigger_source)
    }

    /// Selects the operating mode of `channel`. Switching to single output discards the
    /// waveform of the channel. The change is always applied; an `IncompatibleOperatingTrigger`
    /// error reports that it does not suit the trigger source.
    pub fn set_operating_mode(&self, channel: usize, mode: OperatingMode) -> Result<()> {
        check_channel(channel)?;
        let mut state = self.lock();
        if state.playing {
            return Err(Error::PlaybackActive)
        }
        state.channels[channel].operating_mode = mode;
        if mode == OperatingMode::Single {
            state.channels[channel].interrupt_source = false;
            state.buffers[channel] = None;
        }
        self.shared.push_config(&state, channel)?;
        consistency(&state.channels[channel], channel)
    }

    pub fn operating_mode(&self, channel: usize) -> Result<OperatingMode> {
        self.get(channel, |config| config.operating_mode)
    }

    /// Makes the external trigger pin an output (`true`) or an input (`false`).
    pub fn set_trigger_direction(&self, output: bool) -> Result<()> {
        let mut state = self.lock();
        state.trigger_output = output;
        self.shared.modify_common_control(|val| val.set(CommonControl::TriggerOutput, output))
    }

    pub fn trigger_direction(&self) -> bool {
        self.lock().trigger_output
    }

    /// Sets the period of the sample timer, truncated to a multiple of 32 ns. Periods too short
    /// for the DAC to settle are applied anyway and reported with an advisory error.
    pub fn set_timer_period(&self, nanoseconds: u32) -> Result<()> {
        let mut state = self.lock();
        let divider = nanoseconds / TIMER_TICK_NS;
        state.timer_divider = divider;
        self.shared.write_u32(regs::ADDR_TIMER_DIVIDER, divider)?;
        if divider < MIN_TIMER_DIVIDER {
            log::warn!("timer divider {} below {}", divider, MIN_TIMER_DIVIDER);
            return Err(Error::TimerTooFast(divider))
        }
        if divider < MIN_TIMER_DIVIDER_ALL_CHANNELS {
            log::warn!("timer divider {} below {}: refills may not keep up with all channels playing",
                divider, MIN_TIMER_DIVIDER_ALL_CHANNELS);
        }
        Ok(())
    }

    pub fn timer_period(&self) -> u32 {
        self.lock().timer_divider * TIMER_TICK_NS
    }

    /// Applies a complete configuration. Everything is applied even if some of it is
    /// inconsistent; the first advisory error encountered is returned afterwards.
    pub fn configure(&self, config: &DeviceConfiguration) -> Result<()> {
        if self.is_playing() {
            return Err(Error::PlaybackActive)
        }
        let mut advisory = match self.set_timer_period(config.timer_period_ns) {
            Ok(()) => None,
            Err(error) if error.is_advisory() => Some(error),
            Err(error) => return Err(error),
        };
        let mut state = self.lock();
        state.trigger_output = config.trigger_output;
        for (channel, channel_config) in config.channels.iter().enumerate() {
            state.channels[channel] = *channel_config;
            if channel_config.operating_mode == OperatingMode::Single {
                state.buffers[channel] = None;
            }
            self.shared.push_config(&state, channel)?;
            if let Err(error) = consistency(channel_config, channel) {
                advisory.get_or_insert(error);
            }
        }
        match advisory {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Outputs `volts` on `channel`, converted through its calibration. Values outside of the
    /// output range are clipped.
    pub fn output(&self, channel: usize, volts: f64) -> Result<()> {
        check_channel(channel)?;
        let state = self.lock();
        let config = &state.channels[channel];
        let code = state.calibration.convert(channel, config.range, volts);
        self.output_locked(&state, channel, code)
    }

    /// Outputs a raw straight binary `code` on `channel`.
    pub fn output_code(&self, channel: usize, code: u16) -> Result<()> {
        check_channel(channel)?;
        let state = self.lock();
        self.output_locked(&state, channel, code)
    }

    fn output_locked(&self, state: &State, channel: usize, code: u16) -> Result<()> {
        let config = &state.channels[channel];
        if config.operating_mode == OperatingMode::Waveform {
            return Err(Error::IncompatibleWaveform(channel))
        }
        log::debug!("output channel {}: {:#06x}", channel, code);
        self.shared.write_direct(channel, config.sample_command(), code as u32)
    }

    /// Outputs `volts[i]` on `channels[i]`, then triggers a simultaneous update if the channels
    /// hold their samples. All channels must be software triggered and share an update mode.
    pub fn output_multi(&self, channels: &[usize], volts: &[f64]) -> Result<()> {
        self.output_multi_with(channels, volts.len(), |calibration, config, channel, index| {
            calibration.convert(channel, config.range, volts[index])
        })
    }

    /// Like `output_multi`, with raw straight binary codes.
    pub fn output_multi_codes(&self, channels: &[usize], codes: &[u16]) -> Result<()> {
        self.output_multi_with(channels, codes.len(), |_, _, _, index| codes[index])
    }

    fn output_multi_with<F>(&self, channels: &[usize], values: usize, encode: F) -> Result<()>
        where F: Fn(&CalibrationTable, &ChannelConfiguration, usize, usize) -> u16
    {
        if channels.len() != values {
            return Err(Error::LengthMismatch { channels: channels.len(), values })
        }
        let Some(&first) = channels.first() else { return Ok(()) };
        channels.iter().try_for_each(|&channel| check_channel(channel))?;
        let state = self.lock();
        for &channel in channels {
            if state.channels[channel].trigger_source != TriggerSource::Software {
                return Err(Error::NotSoftwareTriggered(channel))
            }
        }
        let simultaneous = state.channels[first].simultaneous;
        if channels.iter().any(|&channel| state.channels[channel].simultaneous != simultaneous) {
            return Err(Error::MixedUpdateModes)
        }
        if let Some(&channel) = channels.iter()
                .find(|&&channel| state.channels[channel].operating_mode == OperatingMode::Waveform) {
            return Err(Error::IncompatibleWaveform(channel))
        }
        for (index, &channel) in channels.iter().enumerate() {
            let config = &state.channels[channel];
            let code = encode(&state.calibration, config, channel, index);
            self.output_locked(&state, channel, code)?;
        }
        if simultaneous {
            self.flush_locked()?;
        }
        Ok(())
    }

    /// Updates all outputs holding a sample in simultaneous mode.
    pub fn flush(&self) -> Result<()> {
        let _state = self.lock();
        self.flush_locked()
    }

    fn flush_locked(&self) -> Result<()> {
        log::debug!("flush");
        self.shared.write_u32(regs::ADDR_SOFTWARE_TRIGGER, 1)
    }

    /// Resets the output of `channel` to its clear level, keeping its configuration.
    pub fn clear(&self, channel: usize) -> Result<()> {
        check_channel(channel)?;
        let state = self.lock();
        if state.playing {
            return Err(Error::PlaybackActive)
        }
        self.shared.write_direct(channel, regs::DAC_CMD_DATA_RESET, 0)
    }

    /// Resets both the output and the configuration of `channel`, discarding its waveform.
    pub fn reset(&self, channel: usize) -> Result<()> {
        check_channel(channel)?;
        let mut state = self.lock();
        if state.playing {
            return Err(Error::PlaybackActive)
        }
        self.shared.write_direct(channel, regs::DAC_CMD_FULL_RESET, 0)?;
        state.channels[channel] = ChannelConfiguration::default();
        state.buffers[channel] = None;
        self.shared.push_config(&state, channel)
    }

    /// Replaces the waveform of `channel` with the calibrated `volts`, switches the channel to
    /// waveform mode, and primes its FIFO. If the trigger source cannot drive a waveform, the
    /// waveform is installed anyway and `IncompatibleOperatingTrigger` is returned.
    pub fn populate_waveform(&self, channel: usize, volts: &[f64]) -> Result<()> {
        check_channel(channel)?;
        waveform::check_length(volts.len())?;
        let mut state = self.lock();
        if state.playing {
            return Err(Error::PlaybackActive)
        }

        state.channels[channel].operating_mode = OperatingMode::Waveform;
        self.shared.push_config(&state, channel)?;
        let advisory = consistency(&state.channels[channel], channel).err();

        let range = state.channels[channel].range;
        let buffer = WaveformBuffer::calibrate(&state.calibration, channel, range, volts)?;
        self.shared.write_direct(channel, regs::DAC_CMD_DATA_RESET, 0)?;
        state.buffers[channel] = Some(buffer);

        state.channels[channel].interrupt_source = true;
        self.shared.push_config(&state, channel)?;

        let start = (channel * MAX_SAMPLES) as u32;
        self.shared.write_u32(regs::addr_start(channel), start)?;
        self.shared.write_u32(regs::addr_end(channel), start + MAX_SAMPLES as u32 - 1)?;
        self.shared.transfer(&mut state, channel)?;
        log::debug!("populated channel {} with {} samples", channel, volts.len());

        match advisory {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub fn waveform_info(&self, channel: usize) -> Result<Option<WaveformInfo>> {
        check_channel(channel)?;
        Ok(self.lock().buffers[channel].as_ref().map(|buffer| WaveformInfo {
            sample_count: buffer.sample_count(),
            cursor: buffer.cursor(),
        }))
    }

    /// Starts playback on every channel in waveform mode, with a background thread refilling
    /// their FIFOs as the board requests.
    pub fn start_waveform(&self) -> Result<()> {
        let mut state = self.lock();
        if state.playing {
            return Err(Error::AlreadyPlaying)
        }
        self.shared.driver.rearm_wait()?;
        state.worker = Some(service::spawn(self.shared.clone())?);
        state.playing = true;
        if let Err(error) = self.shared.modify_common_control(|val| val.insert(CommonControl::StartWaveforms)) {
            state.playing = false;
            let worker = state.worker.take();
            drop(state);
            if let Err(reap_error) = self.reap_worker(worker) {
                log::error!("failed to shut down interrupt service: {}", reap_error);
            }
            return Err(error)
        }
        log::info!("waveform playback started");
        Ok(())
    }

    /// Stops playback and waits for the refill thread to exit.
    pub fn stop_waveform(&self) -> Result<()> {
        let (result, worker) = {
            let mut state = self.lock();
            if !state.playing {
                return Err(Error::NotPlaying)
            }
            state.playing = false;
            let result = self.shared.modify_common_control(|val| val.remove(CommonControl::StartWaveforms))
                .and_then(|()| self.shared.write_u32(regs::ADDR_INTC_CIE, ChannelMask::All.bits()))
                .and_then(|()| self.shared.write_u32(regs::ADDR_INTC_MER, 0));
            (result, state.worker.take())
        };
        let reaped = self.reap_worker(worker);
        log::info!("waveform playback stopped");
        result.and(reaped)
    }

    /// Cancels the interrupt wait of the refill thread, joins it, and disables the interrupt
    /// controller again. The join is attempted even if the wait could not be cancelled.
    fn reap_worker(&self, worker: Option<JoinHandle<()>>) -> Result<()> {
        let cancelled = self.shared.driver.unblock_wait();
        if let Err(error) = &cancelled {
            log::error!("cannot cancel interrupt wait, joining on next interrupt: {}", error);
        }
        if let Some(worker) = worker {
            if worker.join().is_err() {
                log::error!("interrupt service panicked");
            }
        }
        // the service enables the controller each time it waits
        let disabled = self.shared.write_u32(regs::ADDR_INTC_MER, 0);
        cancelled.and(disabled)
    }

    pub fn is_playing(&self) -> bool {
        self.lock().playing
    }

    /// Returns the error that terminated the refill thread, if any, and clears it.
    pub fn take_fault(&self) -> Option<Error> {
        self.shared.fault.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub fn status(&self, channel: usize) -> Result<ChannelStatus> {
        check_channel(channel)?;
        let value = ChannelStatus::from_bits_truncate(self.shared.read_u32(regs::addr_status(channel))?);
        log::debug!("status({}) = {:?}", channel, value);
        Ok(value)
    }

    pub fn board_status(&self) -> Result<BoardStatus> {
        let temperature_code = self.shared.read_u32(regs::ADDR_XADC_TEMPERATURE)? >> 4;
        Ok(BoardStatus {
            location: self.shared.read_u32(regs::ADDR_LOCATION)? & 0xFF,
            firmware_revision: self.shared.read_u32(regs::ADDR_FIRMWARE_REVISION)?,
            temperature: temperature_code as f64 * 503.975 / 4096.0 - 273.15,
        })
    }

    pub fn calibration(&self, channel: usize, range: OutputRange) -> Result<Coefficients> {
        check_channel(channel)?;
        Ok(self.lock().calibration.coefficients(channel, range))
    }

    /// Overrides the coefficients of `channel` in `range` until the device is reopened. Affects
    /// waveforms populated afterwards.
    pub fn set_calibration(&self, channel: usize, range: OutputRange, coefficients: Coefficients) -> Result<()> {
        check_channel(channel)?;
        self.lock().calibration.set_coefficients(channel, range, coefficients);
        Ok(())
    }
}

impl<D: Driver + 'static> Drop for Device<D> {
    fn drop(&mut self) {
        if self.is_playing() {
            if let Err(error) = self.stop_waveform() {
                log::error!("failed to stop playback: {}", error);
            }
        }
    }
}
