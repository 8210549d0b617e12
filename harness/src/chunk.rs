// chunk.rs - Fixed-size audio chunks and the sources that produce them
//
// The encoder consumes 320 mono 16-bit samples per call. A short final chunk
// is zero padded, and one all-zero chunk always follows the real input to
// flush the encoder.

use crate::error::{HarnessError, Result};

/// Sample rate the encoder is driven at
pub const SAMPLE_RATE: u32 = 16_000;

/// Samples per encode call in the known revision
pub const CHUNK_SAMPLES: usize = 320;

/// One encode call's worth of samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    samples: Vec<i16>,
}

impl AudioChunk {
    /// Copy `samples`, zero padding up to `len`
    pub fn padded(samples: &[i16], len: usize) -> Self {
        let mut buf = vec![0i16; len];
        let n = samples.len().min(len);
        buf[..n].copy_from_slice(&samples[..n]);
        Self { samples: buf }
    }

    pub fn silence(len: usize) -> Self {
        Self {
            samples: vec![0; len],
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples packed little-endian, as the encoder reads them
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

/// Format of an audio source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

impl SourceFormat {
    pub const EXPECTED: SourceFormat = SourceFormat {
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        channels: 1,
    };

    /// Reject anything but 16 kHz, 16-bit mono
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate != Self::EXPECTED.sample_rate {
            return Err(HarnessError::SourceFormat(format!(
                "sample rate {} Hz, expected {} Hz",
                self.sample_rate,
                Self::EXPECTED.sample_rate
            )));
        }
        if self.bits_per_sample != Self::EXPECTED.bits_per_sample {
            return Err(HarnessError::SourceFormat(format!(
                "{}-bit samples, expected 16-bit",
                self.bits_per_sample
            )));
        }
        if self.channels != Self::EXPECTED.channels {
            return Err(HarnessError::SourceFormat(format!(
                "{} channels, expected mono",
                self.channels
            )));
        }
        Ok(())
    }
}

/// A finite, rewindable stream of samples
pub trait ChunkSource {
    fn format(&self) -> SourceFormat;

    /// Go back to the first sample
    fn rewind(&mut self) -> Result<()>;

    /// Fill `buf` from the current position; returns how many samples were
    /// written, 0 at end of input.
    fn read_samples(&mut self, buf: &mut [i16]) -> Result<usize>;
}

/// Samples already in memory
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    format: SourceFormat,
    samples: Vec<i16>,
    pos: usize,
}

impl SampleBuffer {
    pub fn new(format: SourceFormat, samples: Vec<i16>) -> Self {
        Self {
            format,
            samples,
            pos: 0,
        }
    }

    /// 16 kHz mono samples
    pub fn mono(samples: Vec<i16>) -> Self {
        Self::new(SourceFormat::EXPECTED, samples)
    }
}

impl ChunkSource for SampleBuffer {
    fn format(&self) -> SourceFormat {
        self.format
    }

    fn rewind(&mut self) -> Result<()> {
        self.pos = 0;
        Ok(())
    }

    fn read_samples(&mut self, buf: &mut [i16]) -> Result<usize> {
        let n = buf.len().min(self.samples.len() - self.pos);
        buf[..n].copy_from_slice(&self.samples[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Cuts a source into padded chunks followed by the flush chunk
pub struct Chunks<'a, C: ChunkSource + ?Sized> {
    source: &'a mut C,
    len: usize,
    flushed: bool,
}

impl<'a, C: ChunkSource + ?Sized> Chunks<'a, C> {
    /// Rewind `source` and start chunking from its first sample
    pub fn new(source: &'a mut C, len: usize) -> Result<Self> {
        source.rewind()?;
        Ok(Self {
            source,
            len,
            flushed: false,
        })
    }
}

impl<C: ChunkSource + ?Sized> Iterator for Chunks<'_, C> {
    type Item = Result<AudioChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.flushed {
            return None;
        }

        let mut buf = vec![0i16; self.len];
        let mut filled = 0;
        while filled < self.len {
            match self.source.read_samples(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => {
                    self.flushed = true;
                    return Some(Err(e));
                }
            }
        }

        if filled == 0 {
            // trailing silence after the real input
            self.flushed = true;
            return Some(Ok(AudioChunk::silence(self.len)));
        }
        Some(Ok(AudioChunk::padded(&buf[..filled], self.len)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_chunks(samples: usize) -> Vec<AudioChunk> {
        let mut source = SampleBuffer::mono((1..=samples as i16).collect());
        Chunks::new(&mut source, CHUNK_SAMPLES)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_exact_multiple_gets_one_flush() {
        let chunks = count_chunks(3 * CHUNK_SAMPLES);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[2].samples()[CHUNK_SAMPLES - 1], 960);
        assert_eq!(chunks[3], AudioChunk::silence(CHUNK_SAMPLES));
    }

    #[test]
    fn test_partial_chunk_is_padded() {
        let chunks = count_chunks(CHUNK_SAMPLES + 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].samples()[9], 330);
        assert!(chunks[1].samples()[10..].iter().all(|&s| s == 0));
        assert_eq!(chunks[2], AudioChunk::silence(CHUNK_SAMPLES));
    }

    #[test]
    fn test_empty_source_only_flushes() {
        assert_eq!(count_chunks(0), vec![AudioChunk::silence(CHUNK_SAMPLES)]);
    }

    #[test]
    fn test_rewind_restarts() {
        let mut source = SampleBuffer::mono(vec![5; 400]);
        let first: Vec<_> = Chunks::new(&mut source, CHUNK_SAMPLES).unwrap().collect();
        let second: Vec<_> = Chunks::new(&mut source, CHUNK_SAMPLES).unwrap().collect();
        assert_eq!(first.len(), 3);
        assert_eq!(first.len(), second.len());
    }

    #[test]
    fn test_le_packing() {
        let chunk = AudioChunk::padded(&[0x1234, -1], 3);
        assert_eq!(chunk.to_le_bytes(), vec![0x34, 0x12, 0xff, 0xff, 0, 0]);
    }

    #[test]
    fn test_format_validation() {
        assert!(SourceFormat::EXPECTED.validate().is_ok());
        for bad in [
            SourceFormat { sample_rate: 8000, ..SourceFormat::EXPECTED },
            SourceFormat { bits_per_sample: 8, ..SourceFormat::EXPECTED },
            SourceFormat { channels: 2, ..SourceFormat::EXPECTED },
        ] {
            assert!(matches!(bad.validate(), Err(HarnessError::SourceFormat(_))));
        }
    }
}
