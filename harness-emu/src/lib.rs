// au32-harness-emu: Unicorn execution substrate for the Audio32 harness
//
// Wraps a Unicorn ARM engine started in Thumb mode behind the harness's
// `Substrate` trait. Call hooks are Unicorn code hooks on a single address;
// an error from a hook stops emulation and is handed back from `run_until`.

use std::cell::RefCell;
use std::rc::Rc;

use au32_harness::{CallHook, Cpu, HarnessError, Reg, Result, Substrate};
use tracing::trace;
use unicorn_engine::unicorn_const::{uc_error, Arch, Mode, Prot};
use unicorn_engine::{RegisterARM, Unicorn};

pub mod wav;

pub use wav::WavSource;

/// CPACR full access for cp10/cp11
const CPACR_VFP: u64 = 0xf << 20;
/// FPEXC.EN
const FPEXC_EN: u64 = 0x4000_0000;

fn uc_err(what: &str, e: uc_error) -> HarnessError {
    HarnessError::Substrate(format!("{what}: {e:?}"))
}

fn arm_reg(reg: Reg) -> RegisterARM {
    match reg {
        Reg::R0 => RegisterARM::R0,
        Reg::R1 => RegisterARM::R1,
        Reg::R2 => RegisterARM::R2,
        Reg::R3 => RegisterARM::R3,
        Reg::R4 => RegisterARM::R4,
        Reg::R5 => RegisterARM::R5,
        Reg::R6 => RegisterARM::R6,
        Reg::R7 => RegisterARM::R7,
        Reg::R8 => RegisterARM::R8,
        Reg::R9 => RegisterARM::R9,
        Reg::R10 => RegisterARM::R10,
        Reg::R11 => RegisterARM::R11,
        Reg::R12 => RegisterARM::R12,
        Reg::Sp => RegisterARM::SP,
        Reg::Lr => RegisterARM::LR,
        Reg::Pc => RegisterARM::PC,
    }
}

fn reg_read(uc: &Unicorn<'_, ()>, reg: Reg) -> Result<u32> {
    uc.reg_read(arm_reg(reg))
        .map(|v| v as u32)
        .map_err(|e| uc_err("reg_read", e))
}

fn reg_write(uc: &mut Unicorn<'_, ()>, reg: Reg, value: u32) -> Result<()> {
    uc.reg_write(arm_reg(reg), value as u64)
        .map_err(|e| uc_err("reg_write", e))
}

fn mem_read(uc: &Unicorn<'_, ()>, addr: u32, len: usize) -> Result<Vec<u8>> {
    uc.mem_read_as_vec(addr as u64, len)
        .map_err(|e| uc_err(&format!("mem_read 0x{addr:08x}+{len}"), e))
}

fn mem_write(uc: &mut Unicorn<'_, ()>, addr: u32, bytes: &[u8]) -> Result<()> {
    uc.mem_write(addr as u64, bytes)
        .map_err(|e| uc_err(&format!("mem_write 0x{addr:08x}+{}", bytes.len()), e))
}

/// CPU view handed to hooks while the engine is paused
struct HookCpu<'u, 'a>(&'u mut Unicorn<'a, ()>);

impl Cpu for HookCpu<'_, '_> {
    fn reg(&self, reg: Reg) -> Result<u32> {
        reg_read(&*self.0, reg)
    }

    fn set_reg(&mut self, reg: Reg, value: u32) -> Result<()> {
        reg_write(&mut *self.0, reg, value)
    }

    fn read_memory(&self, addr: u32, len: usize) -> Result<Vec<u8>> {
        mem_read(&*self.0, addr, len)
    }

    fn write_memory(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        mem_write(&mut *self.0, addr, bytes)
    }
}

/// One ARM address space and register file
pub struct UnicornSubstrate {
    emu: Unicorn<'static, ()>,
    /// Error raised by a hook during the current run
    pending: Rc<RefCell<Option<HarnessError>>>,
}

impl UnicornSubstrate {
    /// A Thumb-mode engine with VFP enabled
    pub fn new() -> Result<Self> {
        let mut emu = Unicorn::new(Arch::ARM, Mode::THUMB).map_err(|e| uc_err("open", e))?;
        emu.reg_write(RegisterARM::C1_C0_2, CPACR_VFP)
            .map_err(|e| uc_err("enable cp10/cp11", e))?;
        emu.reg_write(RegisterARM::FPEXC, FPEXC_EN)
            .map_err(|e| uc_err("enable vfp", e))?;
        Ok(Self {
            emu,
            pending: Rc::new(RefCell::new(None)),
        })
    }
}

impl Cpu for UnicornSubstrate {
    fn reg(&self, reg: Reg) -> Result<u32> {
        reg_read(&self.emu, reg)
    }

    fn set_reg(&mut self, reg: Reg, value: u32) -> Result<()> {
        reg_write(&mut self.emu, reg, value)
    }

    fn read_memory(&self, addr: u32, len: usize) -> Result<Vec<u8>> {
        mem_read(&self.emu, addr, len)
    }

    fn write_memory(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        mem_write(&mut self.emu, addr, bytes)
    }
}

impl Substrate for UnicornSubstrate {
    fn map_region(&mut self, addr: u32, size: u32) -> Result<()> {
        self.emu
            .mem_map(addr as u64, size as u64, Prot::ALL)
            .map_err(|e| uc_err(&format!("mem_map 0x{addr:08x}+0x{size:x}"), e))
    }

    fn run_until(&mut self, begin: u32, end: u32, max_instructions: u64) -> Result<()> {
        self.pending.borrow_mut().take();
        let count = usize::try_from(max_instructions).unwrap_or(usize::MAX);

        trace!("emu_start 0x{begin:08x} -> 0x{end:08x}");
        let started = self
            .emu
            .emu_start((begin | 1) as u64, end as u64, 0, count);

        if let Some(err) = self.pending.borrow_mut().take() {
            return Err(err);
        }
        started.map_err(|e| {
            let pc = reg_read(&self.emu, Reg::Pc).unwrap_or(0);
            uc_err(&format!("run from 0x{begin:08x} faulted at pc=0x{pc:08x}"), e)
        })
    }

    fn intercept_call(&mut self, addr: u32, mut hook: CallHook) -> Result<()> {
        let pending = Rc::clone(&self.pending);
        self.emu
            .add_code_hook(addr as u64, addr as u64, move |uc, _address, _size| {
                let mut cpu = HookCpu(uc);
                if let Err(err) = hook(&mut cpu) {
                    *pending.borrow_mut() = Some(err);
                    let _ = cpu.0.emu_stop();
                }
            })
            .map_err(|e| uc_err(&format!("hook 0x{addr:08x}"), e))?;
        Ok(())
    }
}
