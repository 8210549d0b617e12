// substrate.rs - Narrow interface to the ARM/Thumb execution substrate
//
// The emulator itself lives outside this crate. The harness only needs to map
// memory, poke bytes and registers, run until an address, and get a callback
// when execution reaches a given address.

use crate::error::Result;

/// ARM core registers visible to the harness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    R8,
    R9,
    R10,
    R11,
    R12,
    Sp,
    Lr,
    Pc,
}

impl Reg {
    /// AAPCS argument and result registers, in order
    pub const ARGS: [Reg; 4] = [Reg::R0, Reg::R1, Reg::R2, Reg::R3];

    /// Register number as encoded in instructions (r13 = sp, r14 = lr, r15 = pc)
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Register and memory access, available both between runs and from inside
/// a call hook while the substrate is paused.
pub trait Cpu {
    fn reg(&self, reg: Reg) -> Result<u32>;
    fn set_reg(&mut self, reg: Reg, value: u32) -> Result<()>;
    fn read_memory(&self, addr: u32, len: usize) -> Result<Vec<u8>>;
    fn write_memory(&mut self, addr: u32, bytes: &[u8]) -> Result<()>;
}

/// Host code run when execution reaches a hooked address.
///
/// The hook sees the paused CPU; returning an error stops the current run and
/// the error comes back out of [`Substrate::run_until`].
pub type CallHook = Box<dyn FnMut(&mut dyn Cpu) -> Result<()>>;

/// A flat 32-bit address space plus register file with Thumb execution.
pub trait Substrate: Cpu {
    /// Map a zero-filled region. `addr` and `size` are page aligned.
    fn map_region(&mut self, addr: u32, size: u32) -> Result<()>;

    /// Execute Thumb code from `begin` until the program counter equals `end`,
    /// or `max_instructions` have run. Returns once execution stops; callers
    /// check `pc` to tell the two apart.
    fn run_until(&mut self, begin: u32, end: u32, max_instructions: u64) -> Result<()>;

    /// Run `hook` whenever execution reaches `addr`, before the instruction
    /// there executes.
    fn intercept_call(&mut self, addr: u32, hook: CallHook) -> Result<()>;
}

/// Read a little-endian u32 through any CPU view
pub fn read_u32(cpu: &(impl Cpu + ?Sized), addr: u32) -> Result<u32> {
    let bytes = cpu.read_memory(addr, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Write a little-endian u32 through any CPU view
pub fn write_u32(cpu: &mut (impl Cpu + ?Sized), addr: u32, value: u32) -> Result<()> {
    cpu.write_memory(addr, &value.to_le_bytes())
}
