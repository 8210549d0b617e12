// testing.rs - Scripted substrate for unit tests
//
// Entry points are Rust closures instead of Thumb code. A run jumps to the
// closure registered at `begin` and then returns through lr the way `bx lr`
// would, so the trap contract is exercised exactly as on a real core.

use std::collections::HashMap;

use crate::error::{HarnessError, Result};
use crate::intercept::{f64_to_words, words_to_f64};
use crate::layout::AUDIO32_ENCODER;
use crate::substrate::{read_u32, write_u32, CallHook, Cpu, Reg, Substrate};

pub type Routine = Box<dyn FnMut(&mut Machine) -> Result<()>>;

/// Memory, registers and hooks of the fake core
#[derive(Default)]
pub struct Machine {
    regions: Vec<(u32, Vec<u8>)>,
    regs: [u32; 16],
    hooks: HashMap<u32, CallHook>,
    /// Set by a routine that never branches back through lr
    pub hang: bool,
}

impl Machine {
    fn locate(&self, addr: u32, len: usize) -> Result<(usize, usize)> {
        self.regions
            .iter()
            .position(|(base, mem)| {
                addr >= *base && (addr - base) as usize + len <= mem.len()
            })
            .map(|idx| (idx, (addr - self.regions[idx].0) as usize))
            .ok_or_else(|| {
                HarnessError::Substrate(format!("unmapped access 0x{addr:08x}+{len}"))
            })
    }

    /// Branch into `addr` the way `blx` into an import thunk would
    pub fn call_import(&mut self, addr: u32) -> Result<()> {
        let mut hook = self
            .hooks
            .remove(&addr)
            .ok_or_else(|| HarnessError::Substrate(format!("no code at 0x{addr:08x}")))?;
        let result = hook(self);
        self.hooks.insert(addr, hook);
        result
    }

    /// Call an intercepted double-precision binary function
    pub fn call_f64(&mut self, addr: u32, a: f64, b: f64) -> Result<f64> {
        let [a0, a1] = f64_to_words(a);
        let [b0, b1] = f64_to_words(b);
        for (reg, value) in Reg::ARGS.into_iter().zip([a0, a1, b0, b1]) {
            self.set_reg(reg, value)?;
        }
        self.call_import(addr)?;
        Ok(words_to_f64(self.reg(Reg::R0)?, self.reg(Reg::R1)?))
    }
}

impl Cpu for Machine {
    fn reg(&self, reg: Reg) -> Result<u32> {
        Ok(self.regs[reg.index()])
    }

    fn set_reg(&mut self, reg: Reg, value: u32) -> Result<()> {
        self.regs[reg.index()] = value;
        Ok(())
    }

    fn read_memory(&self, addr: u32, len: usize) -> Result<Vec<u8>> {
        let (idx, off) = self.locate(addr, len)?;
        Ok(self.regions[idx].1[off..off + len].to_vec())
    }

    fn write_memory(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        let (idx, off) = self.locate(addr, bytes.len())?;
        self.regions[idx].1[off..off + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSubstrate {
    pub machine: Machine,
    routines: HashMap<u32, Routine>,
    /// Entry addresses in the order they were run
    pub runs: Vec<u32>,
}

impl FakeSubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a routine at `entry`
    pub fn routine(&mut self, entry: u32, f: impl FnMut(&mut Machine) -> Result<()> + 'static) {
        self.routines.insert(entry, Box::new(f));
    }

    pub fn runs_of(&self, entry: u32) -> usize {
        self.runs.iter().filter(|&&e| e == entry).count()
    }
}

impl Cpu for FakeSubstrate {
    fn reg(&self, reg: Reg) -> Result<u32> {
        self.machine.reg(reg)
    }

    fn set_reg(&mut self, reg: Reg, value: u32) -> Result<()> {
        self.machine.set_reg(reg, value)
    }

    fn read_memory(&self, addr: u32, len: usize) -> Result<Vec<u8>> {
        self.machine.read_memory(addr, len)
    }

    fn write_memory(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        self.machine.write_memory(addr, bytes)
    }
}

impl Substrate for FakeSubstrate {
    fn map_region(&mut self, addr: u32, size: u32) -> Result<()> {
        let end = addr as u64 + size as u64;
        let overlaps = self.machine.regions.iter().any(|(base, mem)| {
            (addr as u64) < *base as u64 + mem.len() as u64 && (*base as u64) < end
        });
        if overlaps {
            return Err(HarnessError::Substrate(format!(
                "region 0x{addr:08x}+0x{size:x} overlaps an existing mapping"
            )));
        }
        self.machine.regions.push((addr, vec![0; size as usize]));
        Ok(())
    }

    fn run_until(&mut self, begin: u32, _end: u32, _max_instructions: u64) -> Result<()> {
        self.runs.push(begin);
        self.machine.set_reg(Reg::Pc, begin)?;
        self.machine.hang = false;

        let mut routine = self
            .routines
            .remove(&begin)
            .ok_or_else(|| HarnessError::Substrate(format!("no code at 0x{begin:08x}")))?;
        let result = routine(&mut self.machine);
        self.routines.insert(begin, routine);
        result?;

        if !self.machine.hang {
            // bx lr
            let lr = self.machine.reg(Reg::Lr)?;
            self.machine.set_reg(Reg::Pc, lr & !1)?;
        }
        Ok(())
    }

    fn intercept_call(&mut self, addr: u32, hook: CallHook) -> Result<()> {
        self.machine.hooks.insert(addr, hook);
        Ok(())
    }
}

/// Thunk addresses the fake encoder calls through
pub const POW_THUNK: u32 = 0xdeae_0000;
pub const SINF_THUNK: u32 = 0xdeae_0004;

/// A fake encoder image at the known layout.
///
/// `audio_encode` mixes each input segment with the previous chunk (kept in
/// `gl_history`), stamps the frame number into every output word, and sets
/// `gl_mag_shift` through the imported `pow`.
pub fn fake_audio32() -> FakeSubstrate {
    let l = AUDIO32_ENCODER;
    let mut sub = FakeSubstrate::new();
    sub.map_region(0, 0x2_0000).unwrap();

    sub.routine(l.endianess_t, |m| {
        let v = m.reg(Reg::R0)?;
        m.set_reg(Reg::R0, ((v & 0xff) << 8) | ((v >> 8) & 0xff))
    });

    sub.routine(l.audio_encode_init, move |m| {
        let rate = m.reg(Reg::R0)?;
        let words = (rate / 400) as u16;
        m.write_memory(l.gl_number_of_16bit_words_per_frame, &words.to_le_bytes())?;
        write_u32(m, l.gl_frame_cnt, 0)?;
        m.write_memory(l.gl_history, &vec![0; l.gl_history_len])?;
        m.set_reg(Reg::R0, 0)
    });

    sub.routine(l.audio_encode, move |m| {
        let input = m.reg(Reg::R0)?;
        let samples = m.read_memory(input, 640)?;
        let history = m.read_memory(l.gl_history, l.gl_history_len)?;
        let words_raw = m.read_memory(l.gl_number_of_16bit_words_per_frame, 2)?;
        let words = u16::from_le_bytes([words_raw[0], words_raw[1]]) as usize;
        let frame = read_u32(&*m, l.gl_frame_cnt)? + 1;

        let shift = m.call_f64(POW_THUNK, 2.0, (frame % 8) as f64)?;
        m.write_memory(l.gl_mag_shift, &(shift as i32).to_le_bytes())?;

        let seg = samples.len() / words;
        let mut out = Vec::with_capacity(words * 2);
        for i in 0..words {
            let range = i * seg..(i + 1) * seg;
            let sum: u32 = samples[range.clone()]
                .iter()
                .chain(&history[range])
                .map(|&b| b as u32)
                .sum();
            let word = ((frame as u16) << 12) | (sum as u16 & 0x0fff);
            out.extend_from_slice(&word.to_le_bytes());
        }
        m.write_memory(l.gl_out_words, &out)?;
        m.write_memory(l.gl_mlt_coefs, &samples)?;
        m.write_memory(l.gl_history, &samples)?;
        write_u32(m, l.gl_frame_cnt, frame)
    });

    sub
}
