//! Configuration of the DAC channels.

use std::fmt;
use std::str::FromStr;

use crate::{Error, OutputRange};
use crate::regs::ap235 as regs;

/// Output level selected on power-up or on clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputScale {
    Zero,
    #[default]
    Mid,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerSource {
    #[default]
    Software,
    Timer,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperatingMode {
    /// Samples are written one at a time through the direct access register.
    #[default]
    Single,
    /// Samples are streamed from the waveform memory through the channel FIFO.
    Waveform,
}

macro_rules! text_enum {
    ($ty:ident, $err:ident, { $( $variant:ident => $text:literal ),* $(,)? }) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.pad(match self { $( Self::$variant => $text ),* })
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $( $text => Ok(Self::$variant), )*
                    _ => Err(Error::$err(s.to_owned()))
                }
            }
        }
    };
}

text_enum!(OutputScale, InvalidScale, {
    Zero => "zero",
    Mid  => "mid",
    Full => "full",
});

text_enum!(TriggerSource, InvalidTriggerSource, {
    Software => "software",
    Timer    => "timer",
    External => "external",
});

text_enum!(OperatingMode, InvalidOperatingMode, {
    Single   => "single",
    Waveform => "waveform",
});

impl OutputScale {
    fn code(self) -> u32 {
        self as u32
    }
}

impl TriggerSource {
    fn code(self) -> u32 {
        self as u32
    }
}

impl OperatingMode {
    fn code(self) -> u32 {
        match self {
            Self::Single   => 0, // direct access
            Self::Waveform => 2, // FIFO
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelConfiguration {
    pub range: OutputRange,
    pub power_up_scale: OutputScale,
    pub clear_scale: OutputScale,
    /// Allow the output to exceed the nominal range by 5%.
    pub over_range: bool,
    /// Shut the output down when the DAC overheats.
    pub thermal_shutdown: bool,
    /// Clear the output when the FIFO underflows.
    pub underflow_clear: bool,
    /// Hold written samples until a software trigger instead of updating immediately.
    pub simultaneous: bool,
    pub trigger_source: TriggerSource,
    pub operating_mode: OperatingMode,
    /// Request FIFO refills from the interrupt service.
    pub interrupt_source: bool,
}

impl ChannelConfiguration {
    /// Whether the operating mode can be driven by the selected trigger source. Only
    /// software-triggered single output and timer- or externally-triggered waveforms work.
    pub fn is_consistent(&self) -> bool {
        matches!((self.operating_mode, self.trigger_source),
            (OperatingMode::Single, TriggerSource::Software) |
            (OperatingMode::Waveform, TriggerSource::Timer | TriggerSource::External))
    }

    pub(crate) fn dac_control_word(&self) -> u32 {
        regs::dac_command(regs::DAC_CMD_WRITE_CONTROL,
            self.clear_scale.code() << 9 |
            (self.over_range as u32) << 8 |
            (self.thermal_shutdown as u32) << 6 |
            self.power_up_scale.code() << 3 |
            self.range.code())
    }

    pub(crate) fn status_word(&self) -> u32 {
        if self.underflow_clear { regs::ChannelStatus::FifoUnderflow.bits() } else { 0 }
    }

    pub(crate) fn channel_control_word(&self) -> u32 {
        self.operating_mode.code() | self.trigger_source.code() << 2
    }

    pub(crate) fn sample_command(&self) -> u32 {
        if self.simultaneous { regs::DAC_CMD_WRITE_INPUT } else { regs::DAC_CMD_WRITE_UPDATE }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceConfiguration {
    pub channels: [ChannelConfiguration; crate::device::NUM_CHANNELS],
    /// Period of the sample timer shared by all timer-triggered channels.
    pub timer_period_ns: u32,
    /// Drive the external trigger pin instead of sensing it.
    pub trigger_output: bool,
}

impl Default for DeviceConfiguration {
    fn default() -> Self {
        DeviceConfiguration {
            channels: [ChannelConfiguration::default(); crate::device::NUM_CHANNELS],
            timer_period_ns: crate::device::DEFAULT_TIMER_DIVIDER * crate::device::TIMER_TICK_NS,
            trigger_output: false,
        }
    }
}
