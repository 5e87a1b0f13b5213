//! Per-channel waveform memory and the chunking of it into FIFO transfers.

use crate::{Error, Result, CalibrationTable, OutputRange};

/// Capacity of the waveform memory of one channel, in samples.
pub const MAX_SAMPLES: usize = 4096;
/// Largest number of samples moved into a FIFO by one refill.
pub const MAX_TRANSFER: usize = 2048;

/// A contiguous run of samples `[offset, offset + length)` moved into the FIFO in one refill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferChunk {
    pub offset: usize,
    pub length: usize,
}

impl TransferChunk {
    /// Inclusive span of the chunk in the 16-bit sample memory, in bytes, as requested of
    /// the hardware. Never exceeds `2 * MAX_TRANSFER + 1`.
    pub fn byte_span(&self) -> usize {
        2 * (self.length - 1) + 1
    }
}

/// Calibrated samples of one channel, with a cursor marking the next sample to transfer.
#[derive(Debug, Clone)]
pub struct WaveformBuffer {
    codes: Vec<u16>,
    cursor: usize,
}

impl WaveformBuffer {
    pub fn new(codes: Vec<u16>) -> Result<WaveformBuffer> {
        check_length(codes.len())?;
        Ok(WaveformBuffer { codes, cursor: 0 })
    }

    pub fn calibrate(table: &CalibrationTable, channel: usize, range: OutputRange, volts: &[f64])
            -> Result<WaveformBuffer> {
        Self::new(volts.iter().map(|&v| table.convert(channel, range, v)).collect())
    }

    pub fn sample_count(&self) -> usize {
        self.codes.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[cfg(test)]
    pub fn codes(&self) -> &[u16] {
        &self.codes[..]
    }

    pub fn samples(&self, chunk: TransferChunk) -> &[u16] {
        &self.codes[chunk.offset..chunk.offset + chunk.length]
    }

    /// Takes the next chunk starting at the cursor and advances the cursor past it, wrapping
    /// to the start of the waveform once it is exhausted.
    pub fn next_chunk(&mut self) -> TransferChunk {
        let count = self.codes.len();
        let mut tail = (count - self.cursor).min(MAX_TRANSFER) - 1;
        // never reach past the last sample
        if self.cursor + tail == count {
            tail -= 1;
        }
        let chunk = TransferChunk { offset: self.cursor, length: tail + 1 };
        self.cursor = (self.cursor + tail + 1) % count;
        chunk
    }
}

pub(crate) fn check_length(length: usize) -> Result<()> {
    if length == 0 {
        Err(Error::EmptyWaveform)
    } else if length > MAX_SAMPLES {
        Err(Error::WaveformTooLong(length))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn buffer(length: usize) -> WaveformBuffer {
        WaveformBuffer::new((0..length as u16).collect()).unwrap()
    }

    #[test]
    fn test_length_limits() {
        assert!(matches!(WaveformBuffer::new(vec![]), Err(Error::EmptyWaveform)));
        assert!(matches!(WaveformBuffer::new(vec![0; 4097]), Err(Error::WaveformTooLong(4097))));
        assert_eq!(WaveformBuffer::new(vec![0; 4096]).unwrap().sample_count(), 4096);
    }

    #[test]
    fn test_short_waveform_wraps() {
        let mut buf = buffer(3);
        assert_eq!(buf.next_chunk(), TransferChunk { offset: 0, length: 3 });
        assert_eq!(buf.cursor(), 0);
        assert_eq!(buf.next_chunk(), TransferChunk { offset: 0, length: 3 });
    }

    #[test]
    fn test_single_sample() {
        let mut buf = buffer(1);
        let chunk = buf.next_chunk();
        assert_eq!(chunk, TransferChunk { offset: 0, length: 1 });
        assert_eq!(chunk.byte_span(), 1);
        assert_eq!(buf.samples(chunk), &[0]);
        assert_eq!(buf.cursor(), 0);
    }

    #[test]
    fn test_long_waveform_chunks() {
        let mut buf = buffer(3000);
        let first = buf.next_chunk();
        assert_eq!(first, TransferChunk { offset: 0, length: 2048 });
        assert_eq!(first.byte_span(), 4095);
        assert_eq!(buf.cursor(), 2048);
        let second = buf.next_chunk();
        assert_eq!(second, TransferChunk { offset: 2048, length: 952 });
        assert_eq!(buf.samples(second)[0], 2048);
        assert_eq!(*buf.samples(second).last().unwrap(), 2999);
        assert_eq!(buf.cursor(), 0);
    }

    #[test]
    fn test_chunks_cover_waveform() {
        for length in [1, 2, 2047, 2048, 2049, 4095, 4096] {
            let mut buf = buffer(length);
            let mut covered = 0;
            loop {
                let chunk = buf.next_chunk();
                assert_eq!(chunk.offset, covered);
                assert!(chunk.length >= 1 && chunk.length <= MAX_TRANSFER);
                assert!(chunk.byte_span() <= 2 * MAX_TRANSFER + 1);
                covered += chunk.length;
                if buf.cursor() == 0 { break }
            }
            assert_eq!(covered, length);
        }
    }

    #[test]
    fn test_calibrate() {
        let table = CalibrationTable::default();
        let buf = WaveformBuffer::calibrate(&table, 0, OutputRange::Bipolar10V, &[0.0, 5.0, -5.0]).unwrap();
        assert_eq!(buf.codes(), &[0x8000, 0xC000, 0x4000]);
        assert_eq!(buf.cursor(), 0);
    }
}
