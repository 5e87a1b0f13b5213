use std::f64::consts::TAU;
use std::time::Duration;

use ap235::{OutputRange, TriggerSource, MAX_SAMPLES};

const SAMPLE_PERIOD_NS: u32 = 20_000;
const AMPLITUDE: f64 = 5.0;
const PLAY_TIME: Duration = Duration::from_secs(5);

fn main() -> ap235::Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let mut next_arg = |default: f64| args.next().and_then(|arg| arg.parse().ok()).unwrap_or(default);
    let index = next_arg(0.0) as usize;
    let channel = next_arg(0.0) as usize;
    let frequency = next_arg(100.0);

    let device = ap235::Device::open(index)?;
    device.set_range(channel, OutputRange::Bipolar10V)?;
    device.set_timer_period(SAMPLE_PERIOD_NS)?;
    match device.set_trigger_mode(channel, TriggerSource::Timer) {
        Err(error) if error.is_advisory() => (), // channel is still in single mode
        result => result?,
    }

    // one full period, as long as it fits in the waveform memory
    let sample_rate = 1e9 / SAMPLE_PERIOD_NS as f64;
    let samples = ((sample_rate / frequency).round() as usize).clamp(2, MAX_SAMPLES);
    let volts: Vec<f64> = (0..samples)
        .map(|index| AMPLITUDE * (TAU * index as f64 / samples as f64).sin())
        .collect();
    println!("playing {:.1} Hz on channel {} ({} samples)", sample_rate / samples as f64, channel, samples);
    device.populate_waveform(channel, &volts)?;

    device.start_waveform()?;
    std::thread::sleep(PLAY_TIME);
    device.stop_waveform()?;
    if let Some(fault) = device.take_fault() {
        return Err(fault)
    }
    device.reset(channel)?;
    Ok(())
}
