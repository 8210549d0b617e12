// wav.rs - WAV input as a chunk source
//
// Uses hound for parsing; the format is checked by the pipeline before any
// call into the encoder.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use au32_harness::{ChunkSource, HarnessError, Result, SourceFormat};
use hound::{SampleFormat, WavReader};

pub struct WavSource {
    reader: WavReader<BufReader<File>>,
    format: SourceFormat,
}

fn source_err(e: hound::Error) -> HarnessError {
    HarnessError::Source(e.to_string())
}

impl WavSource {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = WavReader::open(path).map_err(source_err)?;
        let spec = reader.spec();
        if spec.sample_format != SampleFormat::Int {
            return Err(HarnessError::SourceFormat(
                "floating-point samples, expected 16-bit PCM".to_string(),
            ));
        }
        Ok(Self {
            format: SourceFormat {
                sample_rate: spec.sample_rate,
                bits_per_sample: spec.bits_per_sample,
                channels: spec.channels,
            },
            reader,
        })
    }

    /// Total samples per channel
    pub fn len(&self) -> u32 {
        self.reader.duration()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChunkSource for WavSource {
    fn format(&self) -> SourceFormat {
        self.format
    }

    fn rewind(&mut self) -> Result<()> {
        self.reader
            .seek(0)
            .map_err(|e| HarnessError::Source(e.to_string()))
    }

    fn read_samples(&mut self, buf: &mut [i16]) -> Result<usize> {
        let mut n = 0;
        for (slot, sample) in buf.iter_mut().zip(self.reader.samples::<i16>()) {
            *slot = sample.map_err(source_err)?;
            n += 1;
        }
        Ok(n)
    }
}
