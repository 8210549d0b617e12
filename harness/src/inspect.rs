// inspect.rs - Reading the image's globals by address
//
// Values are only meaningful after audio_encode_init has run.

use crate::error::Result;
use crate::layout::Layout;
use crate::substrate::Cpu;

/// Read-only view of the execution context
pub struct Inspector<'a, C: Cpu + ?Sized> {
    cpu: &'a C,
    layout: &'a Layout,
}

impl<'a, C: Cpu + ?Sized> Inspector<'a, C> {
    pub fn new(cpu: &'a C, layout: &'a Layout) -> Self {
        Self { cpu, layout }
    }

    pub fn read(&self, addr: u32, len: usize) -> Result<Vec<u8>> {
        self.cpu.read_memory(addr, len)
    }

    pub fn read_u16(&self, addr: u32) -> Result<u16> {
        let b = self.read(addr, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&self, addr: u32) -> Result<u32> {
        let b = self.read(addr, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&self, addr: u32) -> Result<i32> {
        Ok(self.read_u32(addr)? as i32)
    }

    /// `gl_history`: the previous chunk as the encoder remembers it
    pub fn history(&self) -> Result<Vec<u8>> {
        self.read(self.layout.gl_history, self.layout.gl_history_len)
    }

    /// `gl_out_words`: encoded words of the last frame, raw little-endian
    pub fn out_words(&self, count: usize) -> Result<Vec<u8>> {
        self.read(self.layout.gl_out_words, count * 2)
    }

    /// `gl_frame_cnt`: frames encoded since init
    pub fn frame_count(&self) -> Result<u32> {
        self.read_u32(self.layout.gl_frame_cnt)
    }

    pub fn mag_shift(&self) -> Result<i32> {
        self.read_i32(self.layout.gl_mag_shift)
    }

    pub fn mlt_coefs(&self) -> Result<Vec<u8>> {
        self.read(self.layout.gl_mlt_coefs, self.layout.gl_mlt_coefs_len)
    }

    pub fn words_per_frame(&self) -> Result<u16> {
        self.read_u16(self.layout.gl_number_of_16bit_words_per_frame)
    }
}
