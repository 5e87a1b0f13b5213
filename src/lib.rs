mod sys;
mod regs;
mod calibration;
mod config;
mod waveform;
mod device;
mod service;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("device not connected")]
    NotFound,
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("flash identification {0:?} does not belong to an AP235")]
    BadIdentification(String),
    #[error("timed out waiting for the configuration flash")]
    FlashTimeout,

    #[error("channel {0} does not exist")]
    InvalidChannel(usize),
    #[error("unknown output range {0:?}")]
    InvalidRange(String),
    #[error("unknown trigger source {0:?}")]
    InvalidTriggerSource(String),
    #[error("unknown operating mode {0:?}")]
    InvalidOperatingMode(String),
    #[error("unknown output scale {0:?}")]
    InvalidScale(String),

    #[error("operating mode and trigger source of channel {0} are incompatible; change accepted, state inconsistent")]
    IncompatibleOperatingTrigger(usize),
    #[error("timer divider {0} is too fast for the DAC; change accepted")]
    TimerTooFast(u32),

    #[error("single output commands are not possible when channel {0} is configured for waveform playback")]
    IncompatibleWaveform(usize),
    #[error("channel {0} must use the software trigger for batched output")]
    NotSoftwareTriggered(usize),
    #[error("batched output channels must all use the same update mode")]
    MixedUpdateModes,
    #[error("got {channels} channels but {values} values")]
    LengthMismatch { channels: usize, values: usize },
    #[error("waveform must contain at least one sample")]
    EmptyWaveform,
    #[error("waveform of {0} samples exceeds the {max} sample memory", max = waveform::MAX_SAMPLES)]
    WaveformTooLong(usize),
    #[error("cannot change waveform tables or operating modes during playback")]
    PlaybackActive,
    #[error("already playing back")]
    AlreadyPlaying,
    #[error("not playing back")]
    NotPlaying,
}

impl Error {
    /// Returns `true` if the operation reporting this error was carried out regardless.
    pub fn is_advisory(&self) -> bool {
        matches!(self,
            Self::IncompatibleOperatingTrigger(_) |
            Self::TimerTooFast(_))
    }
}

pub type Result<T> =
    core::result::Result<T, Error>;

pub use sys::{Driver, Wakeup};

pub use calibration::{
    OutputRange,
    RangeProfile,
    Coefficients,
    CalibrationTable,
};

pub use config::{
    OutputScale,
    TriggerSource,
    OperatingMode,
    ChannelConfiguration,
    DeviceConfiguration,
};

pub use waveform::{
    TransferChunk,
    MAX_SAMPLES,
    MAX_TRANSFER,
};

pub use device::{
    ChannelStatus,
    BoardStatus,
    WaveformInfo,
    NUM_CHANNELS,
};

pub type Device =
    device::Device<crate::sys::imp::Ap235DriverImpl>;
