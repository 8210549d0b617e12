// trap.rs - Synthetic return address
//
// The blob returns with `bx lr`. Pointing lr at a page of `b .` gives every
// call a well-defined stopping point: once pc lands in the trap it never
// leaves, so "run until pc == trap" always terminates for a call that returns.

use crate::error::Result;
use crate::substrate::Substrate;
use tracing::debug;

/// Thumb `b .` (branch to self), little-endian
pub const THUMB_BRANCH_SELF: [u8; 2] = [0xfe, 0xe7];

/// A mapped region whose every halfword is `b .`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapRegion {
    addr: u32,
    size: u32,
}

impl TrapRegion {
    /// Map the region and fill it with self-branches
    pub fn install(substrate: &mut (impl Substrate + ?Sized), addr: u32, size: u32) -> Result<Self> {
        substrate.map_region(addr, size)?;
        let code = THUMB_BRANCH_SELF.repeat(size as usize / THUMB_BRANCH_SELF.len());
        substrate.write_memory(addr, &code)?;
        debug!("trap region at 0x{addr:08x} ({size} bytes)");
        Ok(Self { addr, size })
    }

    /// Value to load into lr: the trap address with the Thumb bit set
    pub fn return_address(&self) -> u32 {
        self.addr | 1
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.addr && addr - self.addr < self.size
    }
}
