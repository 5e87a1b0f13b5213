#![allow(dead_code)]

use bitflags::bitflags;

// The interrupt controller is a Xilinx AXI INTC; sources 0..15 are the DAC channels.

/// Interrupt Status Register
pub const ADDR_INTC_ISR: usize = 0x2000;
/// Interrupt Pending Register
pub const ADDR_INTC_IPR: usize = 0x2004;
/// Interrupt Enable Register
pub const ADDR_INTC_IER: usize = 0x2008;
/// Interrupt Acknowledge Register
pub const ADDR_INTC_IAR: usize = 0x200C;
/// Set Interrupt Enables
pub const ADDR_INTC_SIE: usize = 0x2010;
/// Clear Interrupt Enables
pub const ADDR_INTC_CIE: usize = 0x2014;
/// Master Enable Register
pub const ADDR_INTC_MER: usize = 0x201C;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MasterEnable: u32 {
        const ME  = 1<<0;
        const HIE = 1<<1;
    }
}

bitflags! {
    /// One bit per interrupt source, as used by IPR, IAR, SIE and CIE.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChannelMask: u32 {
        const Channels = 0xFFFF;
        const All      = 0x1FFFF;
    }
}

impl ChannelMask {
    pub fn channel(index: usize) -> Self {
        assert!(index < 16);
        ChannelMask::from_bits_retain(1 << index)
    }

    /// Channel indices flagged in this mask, in ascending order.
    pub fn channels(self) -> impl Iterator<Item = usize> {
        (0..16).filter(move |&index| self.bits() & (1 << index) != 0)
    }
}

// XADC system monitor.

pub const ADDR_XADC_TEMPERATURE: usize = 0x3200;
pub const ADDR_XADC_VCCINT: usize = 0x3204;
pub const ADDR_XADC_VCCAUX: usize = 0x3208;

/// Firmware Revision Register
pub const ADDR_FIRMWARE_REVISION: usize = 0x4000;

// For the QSPI registers, see the documentation for the Xilinx AXI Quad SPI v3.2 core (PG153).

/// QSPI Software Reset Register
pub const ADDR_QSPI_SRR: usize = 0x5040;
/// QSPI Control Register
pub const ADDR_QSPI_SPICR: usize = 0x5060;
/// QSPI Status Register
pub const ADDR_QSPI_SPISR: usize = 0x5064;
/// QSPI Data Transmit Register
pub const ADDR_QSPI_SPIDTR: usize = 0x5068;
/// QSPI Data Receive Register
pub const ADDR_QSPI_SPIDRR: usize = 0x506C;
/// QSPI Slave Select Register
pub const ADDR_QSPI_SPISSR: usize = 0x5070;

/// Writing this value to SRR resets the core.
pub const QSPI_RESET_KEY: u32 = 0x0000_000A;
/// Depth of the QSPI transmit and receive FIFOs.
pub const QSPI_FIFO_DEPTH: usize = 16;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SpiControl: u32 {
        const Loopback               = 1<<0;
        const SpiEnable              = 1<<1;
        const Master                 = 1<<2;
        const ClockPolarity          = 1<<3;
        const ClockPhase             = 1<<4;
        const TxFifoReset            = 1<<5;
        const RxFifoReset            = 1<<6;
        const ManualSlaveSelect      = 1<<7;
        const MasterTransInhibit     = 1<<8;
        const LsbFirst               = 1<<9;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SpiStatus: u32 {
        const RxEmpty                = 1<<0;
        const RxFull                 = 1<<1;
        const TxEmpty                = 1<<2;
        const TxFull                 = 1<<3;
        const ModeFault              = 1<<4;
    }
}

/// Board Location Register
pub const ADDR_LOCATION: usize = 0x6000;

// M25P-compatible configuration flash behind the QSPI core.

pub const FLASH_CMD_READ: u8 = 0x03;
pub const FLASH_ADDR_COEFFICIENTS: u32 = 0x3FE000;
pub const FLASH_COEFFICIENT_STRIDE: u32 = 256;
pub const FLASH_ADDR_ID: u32 = 0x3FEFF0;
pub const FLASH_ID_LEN: usize = 16;

// DAC channel register blocks.

const ADDR_DAC_BASE: usize = 0x40000;
const DAC_STRIDE: usize = 0x20;

/// Waveform Memory Start Address Register
pub fn addr_start(channel: usize) -> usize { ADDR_DAC_BASE + channel * DAC_STRIDE + 0x00 }
/// Waveform Memory End Address Register
pub fn addr_end(channel: usize) -> usize { ADDR_DAC_BASE + channel * DAC_STRIDE + 0x04 }
/// Sample FIFO Data Port
pub fn addr_fifo(channel: usize) -> usize { ADDR_DAC_BASE + channel * DAC_STRIDE + 0x08 }
/// Channel Control Register
pub fn addr_control(channel: usize) -> usize { ADDR_DAC_BASE + channel * DAC_STRIDE + 0x10 }
/// Channel Status Register
pub fn addr_status(channel: usize) -> usize { ADDR_DAC_BASE + channel * DAC_STRIDE + 0x14 }
/// DAC Direct Access Register
pub fn addr_direct(channel: usize) -> usize { ADDR_DAC_BASE + channel * DAC_STRIDE + 0x18 }

/// Common Control Register
pub const ADDR_COMMON_CONTROL: usize = 0x40200;
/// Timer Divider Register
pub const ADDR_TIMER_DIVIDER: usize = 0x40204;
/// Software Trigger Register
pub const ADDR_SOFTWARE_TRIGGER: usize = 0x40208;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommonControl: u32 {
        /// Starts waveform playback on all channels in waveform mode.
        const StartWaveforms         = 1<<0;
        /// External trigger pin is an output.
        const TriggerOutput          = 1<<3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChannelStatus: u32 {
        const FifoEmpty              = 1<<0;
        const FifoHalfFull           = 1<<1;
        const FifoFull               = 1<<2;
        const FifoUnderflow          = 1<<3;
        const BurstSingleComplete    = 1<<4;
        const Busy                   = 1<<5;
    }
}

// Commands for the DAC Direct Access Register, placed in bits 19:16.

pub const DAC_CMD_WRITE_INPUT: u32 = 0x1;
pub const DAC_CMD_UPDATE: u32 = 0x2;
pub const DAC_CMD_WRITE_UPDATE: u32 = 0x3;
pub const DAC_CMD_WRITE_CONTROL: u32 = 0x4;
pub const DAC_CMD_DATA_RESET: u32 = 0x7;
pub const DAC_CMD_FULL_RESET: u32 = 0xF;

pub fn dac_command(command: u32, data: u32) -> u32 {
    command << 16 | data & 0xFFFF
}
