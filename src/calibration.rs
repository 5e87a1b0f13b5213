//! Conversion between output voltages and DAC codes.
//!
//! The DAC natively takes straight binary codes. Conversion goes through binary two's complement
//! (BTC) first, where the gain and offset corrections stored in flash are applied.

use std::fmt;
use std::str::FromStr;

use crate::Error;

pub const NUM_RANGES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputRange {
    #[default]
    Bipolar10V,
    Unipolar10V,
    Bipolar5V,
    Unipolar5V,
    Minus2V5To7V5,
    Bipolar3V,
    Unipolar16V,
    Unipolar20V,
}

/// Ideal (uncalibrated) transfer function of one output range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeProfile {
    /// Code for 0 V, straight binary.
    pub zero_straight: i32,
    /// Code for 0 V, binary two's complement.
    pub zero_btc: i32,
    /// Codes per volt.
    pub slope: f64,
    pub low_volts: f64,
    pub high_volts: f64,
    pub clip_low: i32,
    pub clip_high: i32,
}

const fn profile(zero_straight: i32, zero_btc: i32, slope: f64, low_volts: f64, high_volts: f64) -> RangeProfile {
    RangeProfile { zero_straight, zero_btc, slope, low_volts, high_volts, clip_low: -32768, clip_high: 32767 }
}

const PROFILES: [RangeProfile; NUM_RANGES] = [
    profile(32768,      0,  3276.8,  -10.0, 10.0),
    profile(    0, -32768,  6553.6,    0.0, 10.0),
    profile(32768,      0,  6553.6,   -5.0,  5.0),
    profile(    0, -32768, 13107.2,    0.0,  5.0),
    profile(16384, -16384,  6553.6,   -2.5,  7.5),
    profile(32768,      0, 10922.67,  -3.0,  3.0),
    profile(    0, -32768,  4095.9,    0.0, 16.0),
    profile(    0, -32768,  3276.8,    0.0, 20.0),
];

impl OutputRange {
    pub const ALL: [OutputRange; NUM_RANGES] = [
        Self::Bipolar10V,
        Self::Unipolar10V,
        Self::Bipolar5V,
        Self::Unipolar5V,
        Self::Minus2V5To7V5,
        Self::Bipolar3V,
        Self::Unipolar16V,
        Self::Unipolar20V,
    ];

    /// Range select code, as written to the DAC control word.
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn profile(self) -> &'static RangeProfile {
        &PROFILES[self.index()]
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Bipolar10V    => "-10,10",
            Self::Unipolar10V   => "0,10",
            Self::Bipolar5V     => "-5,5",
            Self::Unipolar5V    => "0,5",
            Self::Minus2V5To7V5 => "-2.5,7.5",
            Self::Bipolar3V     => "-3,3",
            Self::Unipolar16V   => "0,16",
            Self::Unipolar20V   => "0,20",
        }
    }
}

impl fmt::Display for OutputRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for OutputRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        Self::ALL.into_iter()
            .find(|range| range.as_str() == normalized)
            .ok_or_else(|| Error::InvalidRange(s.to_owned()))
    }
}

/// Gain and offset correction of one channel in one range, in the units stored in flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Coefficients {
    /// Offset in sixteenths of a code.
    pub offset: i16,
    /// Gain error in units of 2⁻²⁰.
    pub gain: i16,
}

impl Coefficients {
    fn gain_factor(self) -> f64 {
        1.0 + self.gain as f64 / (65536.0 * 16.0)
    }

    fn offset_codes(self) -> f64 {
        self.offset as f64 / 16.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTable {
    coefficients: [[Coefficients; NUM_RANGES]; crate::device::NUM_CHANNELS],
}

impl Default for CalibrationTable {
    fn default() -> Self {
        CalibrationTable {
            coefficients: [[Coefficients::default(); NUM_RANGES]; crate::device::NUM_CHANNELS]
        }
    }
}

impl CalibrationTable {
    /// Size of the per-channel coefficient record in flash.
    pub const BLOCK_LEN: usize = NUM_RANGES * 4;

    pub fn coefficients(&self, channel: usize, range: OutputRange) -> Coefficients {
        self.coefficients[channel][range.index()]
    }

    pub fn set_coefficients(&mut self, channel: usize, range: OutputRange, coefficients: Coefficients) {
        self.coefficients[channel][range.index()] = coefficients
    }

    /// Loads the coefficients of `channel` from its flash record: for each range in order,
    /// a little-endian offset followed by a little-endian gain.
    pub fn load_block(&mut self, channel: usize, block: &[u8; Self::BLOCK_LEN]) {
        for (range, bytes) in block.chunks_exact(4).enumerate() {
            self.coefficients[channel][range] = Coefficients {
                offset: i16::from_le_bytes([bytes[0], bytes[1]]),
                gain:   i16::from_le_bytes([bytes[2], bytes[3]]),
            };
        }
    }

    /// Converts `volts` to a calibrated binary two's complement code, clipping to the range.
    pub fn convert_btc(&self, channel: usize, range: OutputRange, volts: f64) -> i16 {
        let profile = range.profile();
        let coefficients = self.coefficients(channel, range);
        let code = coefficients.gain_factor() * profile.slope * volts
            + profile.zero_btc as f64
            + coefficients.offset_codes();
        // `round` rounds half away from zero; NaN saturates to 0 in the cast below
        let code = code.round().clamp(profile.clip_low as f64, profile.clip_high as f64);
        code as i16
    }

    /// Converts `volts` to the straight binary code written to the DAC.
    pub fn convert(&self, channel: usize, range: OutputRange, volts: f64) -> u16 {
        self.convert_btc(channel, range, volts) as u16 ^ 0x8000
    }

    /// Voltage that a straight binary `code` produces under this calibration.
    pub fn to_volts(&self, channel: usize, range: OutputRange, code: u16) -> f64 {
        let profile = range.profile();
        let coefficients = self.coefficients(channel, range);
        let btc = (code ^ 0x8000) as i16 as f64;
        (btc - profile.zero_btc as f64 - coefficients.offset_codes())
            / (coefficients.gain_factor() * profile.slope)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_range_strings() {
        for range in OutputRange::ALL {
            assert_eq!(range.to_string().parse::<OutputRange>().unwrap(), range);
        }
        assert_eq!(" -2.5, 7.5".parse::<OutputRange>().unwrap(), OutputRange::Minus2V5To7V5);
        assert!(matches!("0,12".parse::<OutputRange>(), Err(Error::InvalidRange(_))));
    }

    #[test]
    fn test_ideal_bipolar() {
        let table = CalibrationTable::default();
        let codes: Vec<u16> = [0.0, 5.0, -5.0].iter()
            .map(|&v| table.convert(0, OutputRange::Bipolar10V, v))
            .collect();
        assert_eq!(codes, [0x8000, 0xC000, 0x4000]);
    }

    #[test]
    fn test_ideal_unipolar() {
        let table = CalibrationTable::default();
        assert_eq!(table.convert(3, OutputRange::Unipolar10V, 0.0), 0x0000);
        assert_eq!(table.convert(3, OutputRange::Unipolar10V, 5.0), 0x8000);
        assert_eq!(table.convert(3, OutputRange::Minus2V5To7V5, 0.0), 0x4000);
        assert_eq!(table.convert(3, OutputRange::Minus2V5To7V5, -2.5), 0x0000);
    }

    #[test]
    fn test_clipping() {
        let table = CalibrationTable::default();
        for range in OutputRange::ALL {
            let profile = range.profile();
            for volts in [-1000.0, profile.low_volts - 0.5, profile.high_volts + 0.5, 1000.0, f64::NAN] {
                let code = table.convert_btc(0, range, volts) as i32;
                assert!(code >= profile.clip_low && code <= profile.clip_high);
            }
            assert_eq!(table.convert(0, range, profile.high_volts + 1.0), 0xFFFF);
            assert_eq!(table.convert(0, range, profile.low_volts - 1.0), 0x0000);
        }
    }

    #[test]
    fn test_monotonic() {
        let mut table = CalibrationTable::default();
        table.set_coefficients(1, OutputRange::Bipolar3V, Coefficients { offset: -200, gain: 3000 });
        for range in OutputRange::ALL {
            let profile = range.profile();
            let steps = 997;
            let mut last = i16::MIN;
            for step in 0..=steps {
                let volts = profile.low_volts - 1.0
                    + (profile.high_volts - profile.low_volts + 2.0) * step as f64 / steps as f64;
                let code = table.convert_btc(1, range, volts);
                assert!(code >= last, "{range} not monotonic at {volts} V");
                last = code;
            }
        }
    }

    #[test]
    fn test_offset_and_gain() {
        let mut table = CalibrationTable::default();
        table.set_coefficients(2, OutputRange::Bipolar10V, Coefficients { offset: 32, gain: 0 });
        assert_eq!(table.convert(2, OutputRange::Bipolar10V, 0.0), 0x8002);
        // other channels are unaffected
        assert_eq!(table.convert(1, OutputRange::Bipolar10V, 0.0), 0x8000);

        table.set_coefficients(2, OutputRange::Bipolar10V, Coefficients { offset: 0, gain: 16384 });
        // gain factor 1.015625
        assert_eq!(table.convert_btc(2, OutputRange::Bipolar10V, 5.0), 16640);
    }

    #[test]
    fn test_rounding_half_away_from_zero() {
        let mut table = CalibrationTable::default();
        table.set_coefficients(0, OutputRange::Bipolar10V, Coefficients { offset: 8, gain: 0 });
        assert_eq!(table.convert_btc(0, OutputRange::Bipolar10V, 0.0), 1);
        table.set_coefficients(0, OutputRange::Bipolar10V, Coefficients { offset: -8, gain: 0 });
        assert_eq!(table.convert_btc(0, OutputRange::Bipolar10V, 0.0), -1);
    }

    #[test]
    fn test_load_block() {
        let mut block = [0u8; CalibrationTable::BLOCK_LEN];
        block[0..4].copy_from_slice(&[0x10, 0x00, 0xff, 0xff]);
        block[28..32].copy_from_slice(&[0x00, 0x80, 0x34, 0x12]);
        let mut table = CalibrationTable::default();
        table.load_block(5, &block);
        assert_eq!(table.coefficients(5, OutputRange::Bipolar10V), Coefficients { offset: 16, gain: -1 });
        assert_eq!(table.coefficients(5, OutputRange::Unipolar20V), Coefficients { offset: -32768, gain: 0x1234 });
        assert_eq!(table.coefficients(5, OutputRange::Bipolar5V), Coefficients::default());
    }

    #[test]
    fn test_to_volts() {
        let mut table = CalibrationTable::default();
        table.set_coefficients(0, OutputRange::Unipolar16V, Coefficients { offset: 40, gain: -500 });
        for volts in [0.5, 3.0, 9.75, 15.5] {
            let code = table.convert(0, OutputRange::Unipolar16V, volts);
            let back = table.to_volts(0, OutputRange::Unipolar16V, code);
            assert!((back - volts).abs() < 1.0 / 4095.9, "{volts} V -> {code:#06x} -> {back} V");
        }
    }
}
