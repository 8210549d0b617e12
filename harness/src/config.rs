// config.rs - Fixed addresses and limits of the harness address space
//
// Everything the harness maps lives outside the image span (which starts at
// 0 and stays below 0x20000 for the known revision).

/// Host-side memory layout and execution limits
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Input sample buffer handed to audio_encode
    pub input_addr: u32,
    pub input_size: u32,
    /// Synthetic return address region (filled with `b .`)
    pub trap_addr: u32,
    pub trap_size: u32,
    /// One 4-byte thunk per imported function
    pub import_addr: u32,
    pub import_size: u32,
    /// Zeroed storage backing imported data objects
    pub data_import_addr: u32,
    pub data_import_size: u32,
    /// Stack grows down from `stack_top`
    pub stack_top: u32,
    pub stack_size: u32,
    /// Samples per encode call
    pub chunk_samples: usize,
    /// Instruction budget per call before it counts as a runaway
    pub max_instructions: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            input_addr: 0x1000_0000,
            input_size: 0x1000,
            trap_addr: 0xdead_0000,
            trap_size: 0x1000,
            import_addr: 0xdeae_0000,
            import_size: 0x1000,
            data_import_addr: 0xdeaf_0000,
            data_import_size: 0x1_0000,
            stack_top: 0x8000_0000,
            stack_size: 0x10_0000,
            chunk_samples: 320,
            max_instructions: 500_000_000,
        }
    }
}

impl HarnessConfig {
    /// Size in bytes of one packed input chunk
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_samples * 2
    }

    /// Lowest mapped stack address
    pub fn stack_base(&self) -> u32 {
        self.stack_top - self.stack_size
    }
}
