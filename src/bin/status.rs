use ap235::{OutputRange, NUM_CHANNELS};

fn main() -> ap235::Result<()> {
    env_logger::init();

    let index = std::env::args().nth(1).and_then(|arg| arg.parse().ok()).unwrap_or(0);
    let device = ap235::Device::open(index)?;
    let board = device.board_status()?;
    println!("board:");
    println!("  identification:    {}", device.identification());
    println!("  location:          {:#04x}", board.location);
    println!("  firmware revision: {:#010x}", board.firmware_revision);
    println!("  temperature:       {:.1} °C", board.temperature);

    println!("channels:");
    for channel in 0..NUM_CHANNELS {
        let config = device.channel_configuration(channel)?;
        println!("  {:2}: {:>8} V  {:8}  {:8}  {:?}",
            channel, config.range, config.operating_mode, config.trigger_source, device.status(channel)?);
    }

    println!("calibration (offset/gain):");
    print!("    ");
    for range in OutputRange::ALL {
        print!("  {:>13}", range);
    }
    println!();
    for channel in 0..NUM_CHANNELS {
        print!("  {:2}", channel);
        for range in OutputRange::ALL {
            let coefficients = device.calibration(channel, range)?;
            print!("  {:>6}/{:<6}", coefficients.offset, coefficients.gain);
        }
        println!();
    }
    Ok(())
}
