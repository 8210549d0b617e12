// pipeline.rs - Driving audio_encode_init / audio_encode over a whole input
//
// Idle -> Initialized -> Encoding -> Finalized. The image keeps its own state
// between chunks (history, frame counter); the encoder only sequences calls
// and collects gl_out_words after each one.

use crate::chunk::{AudioChunk, ChunkSource, Chunks};
use crate::config::HarnessConfig;
use crate::container::{self, ContainerHeader};
use crate::error::{HarnessError, Result};
use crate::inspect::Inspector;
use crate::invoke::Invoker;
use crate::layout::Layout;
use crate::substrate::{Reg, Substrate};
use crate::trap::TrapRegion;
use tracing::{debug, info, trace};

/// Number of leading chunks whose state is hex-dumped at trace level
const DUMP_CHUNKS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Initialized,
    Encoding,
    Finalized,
}

/// Owns the execution context and sequences calls into the image
pub struct Encoder<S: Substrate> {
    substrate: S,
    layout: Layout,
    config: HarnessConfig,
    invoker: Invoker,
    stage: Stage,
    sample_rate: u32,
    words_per_frame: u16,
    chunks_encoded: usize,
    payload: Vec<u8>,
}

impl<S: Substrate> Encoder<S> {
    /// Map the trap, input buffer and stack into a substrate that already
    /// holds the loaded image.
    pub fn attach(mut substrate: S, layout: Layout, config: HarnessConfig) -> Result<Self> {
        if config.chunk_bytes() > config.input_size as usize {
            return Err(HarnessError::InputBuffer {
                chunk_bytes: config.chunk_bytes(),
                input_size: config.input_size,
            });
        }

        let trap = TrapRegion::install(&mut substrate, config.trap_addr, config.trap_size)?;
        substrate.map_region(config.input_addr, config.input_size)?;
        substrate.map_region(config.stack_base(), config.stack_size)?;
        substrate.set_reg(Reg::Sp, config.stack_top)?;

        let invoker = Invoker::new(trap, config.stack_top, config.max_instructions);
        Ok(Self {
            substrate,
            layout,
            config,
            invoker,
            stage: Stage::Idle,
            sample_rate: 0,
            words_per_frame: 0,
            chunks_encoded: 0,
            payload: Vec::new(),
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn chunks_encoded(&self) -> usize {
        self.chunks_encoded
    }

    pub fn words_per_frame(&self) -> u16 {
        self.words_per_frame
    }

    pub fn inspector(&self) -> Inspector<'_, S> {
        Inspector::new(&self.substrate, &self.layout)
    }

    #[cfg(test)]
    pub(crate) fn substrate(&self) -> &S {
        &self.substrate
    }

    /// `endianessT(value)`: needs no encoder state, so it works in any stage
    pub fn endianess_t(&mut self, value: u32) -> Result<u32> {
        let [out, _] = self
            .invoker
            .invoke(&mut self.substrate, self.layout.endianess_t, &[value])?;
        debug!("endianessT(0x{value:04x}) = 0x{out:04x}");
        Ok(out)
    }

    /// `audio_encode_init(sample_rate)`, then latch the words-per-frame global
    pub fn initialize(&mut self, sample_rate: u32) -> Result<()> {
        match self.stage {
            Stage::Idle => {}
            Stage::Finalized => return Err(HarnessError::AlreadyFinalized),
            _ => return Err(HarnessError::AlreadyInitialized),
        }

        info!(
            "audio_encode_init({sample_rate}), {} samples per frame",
            sample_rate / 50
        );
        self.invoker
            .invoke(&mut self.substrate, self.layout.audio_encode_init, &[sample_rate])?;

        self.words_per_frame = self.inspector().words_per_frame()?;
        debug!("gl_number_of_16bit_words_per_frame = {}", self.words_per_frame);
        self.sample_rate = sample_rate;
        self.stage = Stage::Initialized;
        Ok(())
    }

    /// Encode one chunk and append its output words
    pub fn encode_chunk(&mut self, chunk: &AudioChunk) -> Result<()> {
        match self.stage {
            Stage::Initialized | Stage::Encoding => {}
            Stage::Idle => return Err(HarnessError::NotInitialized),
            Stage::Finalized => return Err(HarnessError::AlreadyFinalized),
        }

        let input = chunk.to_le_bytes();
        if input.len() != self.config.chunk_bytes() {
            return Err(HarnessError::ChunkLength {
                actual: input.len(),
                expected: self.config.chunk_bytes(),
            });
        }
        self.substrate.write_memory(self.config.input_addr, &input)?;

        let n = self.chunks_encoded;
        if n == 0 {
            trace!("gl_history={}", hex::encode(self.inspector().history()?));
        }

        self.invoker.invoke(
            &mut self.substrate,
            self.layout.audio_encode,
            &[self.config.input_addr],
        )?;

        let inspector = self.inspector();
        let words = inspector.out_words(self.words_per_frame as usize)?;
        debug!("chunk {n}: gl_mag_shift={}", inspector.mag_shift()?);
        if n < DUMP_CHUNKS {
            trace!("gl_mlt_coefs={}", hex::encode(inspector.mlt_coefs()?));
            trace!("gl_history={}", hex::encode(inspector.history()?));
            trace!("in_data: len={} {}", input.len(), hex::encode(&input));
            trace!("out_data: len={} {}", words.len(), hex::encode(&words));
        }

        self.payload.extend_from_slice(&words);
        self.chunks_encoded += 1;
        self.stage = Stage::Encoding;
        Ok(())
    }

    /// Build the container from the frame counter and the collected words
    pub fn finalize(&mut self) -> Result<Vec<u8>> {
        match self.stage {
            Stage::Initialized | Stage::Encoding => {}
            Stage::Idle => return Err(HarnessError::NotInitialized),
            Stage::Finalized => return Err(HarnessError::AlreadyFinalized),
        }

        let inspector = self.inspector();
        let frames = inspector.frame_count()?;
        let words_per_frame = inspector.words_per_frame()?;
        info!(
            "{} chunks encoded, frames: {frames} words_per_frame: {words_per_frame}",
            self.chunks_encoded
        );

        let header = ContainerHeader::new(self.sample_rate, frames, words_per_frame)?;
        let out = container::assemble(&header, &self.payload)?;
        self.stage = Stage::Finalized;
        Ok(out)
    }

    /// Run the whole pipeline over `source`
    pub fn encode(&mut self, source: &mut (impl ChunkSource + ?Sized)) -> Result<Vec<u8>> {
        let format = source.format();
        format.validate()?;

        self.initialize(format.sample_rate)?;
        for chunk in Chunks::new(source, self.config.chunk_samples)? {
            self.encode_chunk(&chunk?)?;
        }
        self.finalize()
    }
}
