// intercept.rs - Host implementations of symbols the image imports
//
// Every import gets a thunk (see image.rs). A registered routine runs when
// its thunk is reached: it reads raw argument words from r0-r3, computes on
// the host, and writes raw result words back from r0. The thunk's own
// `bx lr` then resumes the caller. Reaching the thunk of an unregistered
// import stops the run with an unresolved-symbol error.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::{HarnessError, Result};
use crate::image::ImportTable;
use crate::substrate::{Cpu, Reg, Substrate};
use tracing::{debug, trace};

/// A host routine with a raw-word calling contract
pub trait HostRoutine {
    /// Number of argument words taken from r0 upwards
    fn arg_words(&self) -> usize;

    /// Compute result words; they are written to r0 upwards
    fn call(&self, args: &[u32]) -> Vec<u32>;
}

/// Reassemble a double from its (low, high) register pair
pub fn words_to_f64(lo: u32, hi: u32) -> f64 {
    f64::from_bits(((hi as u64) << 32) | lo as u64)
}

/// Split a double into its (low, high) register pair
pub fn f64_to_words(value: f64) -> [u32; 2] {
    let bits = value.to_bits();
    [bits as u32, (bits >> 32) as u32]
}

/// `double pow(double, double)` under the soft-float AAPCS:
/// `a` in r0:r1, `b` in r2:r3, result in r0:r1.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pow;

impl HostRoutine for Pow {
    fn arg_words(&self) -> usize {
        4
    }

    fn call(&self, args: &[u32]) -> Vec<u32> {
        let a = words_to_f64(args[0], args[1]);
        let b = words_to_f64(args[2], args[3]);
        let result = a.powf(b);
        trace!("pow({a}, {b}) = {result}");
        f64_to_words(result).to_vec()
    }
}

/// Symbol name -> host routine
#[derive(Default, Clone)]
pub struct Interceptors {
    routines: BTreeMap<String, Rc<dyn HostRoutine>>,
}

impl Interceptors {
    pub fn new() -> Self {
        Self::default()
    }

    /// The routines the known revision needs
    pub fn libm() -> Self {
        let mut interceptors = Self::new();
        interceptors.register("pow", Pow);
        interceptors
    }

    pub fn register(&mut self, symbol: &str, routine: impl HostRoutine + 'static) {
        self.routines.insert(symbol.to_string(), Rc::new(routine));
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.routines.contains_key(symbol)
    }

    /// Hook every import thunk: registered symbols call their routine, the
    /// rest fail as unresolved.
    pub fn install(
        &self,
        substrate: &mut (impl Substrate + ?Sized),
        imports: &ImportTable,
    ) -> Result<()> {
        for (name, thunk) in imports.iter() {
            let symbol = name.to_string();
            match self.routines.get(name) {
                Some(routine) => {
                    let routine = Rc::clone(routine);
                    substrate.intercept_call(
                        thunk,
                        Box::new(move |cpu: &mut dyn Cpu| dispatch(cpu, &symbol, routine.as_ref())),
                    )?;
                    debug!("import {name} at 0x{thunk:08x} -> host routine");
                }
                None => {
                    substrate.intercept_call(
                        thunk,
                        Box::new(move |_: &mut dyn Cpu| {
                            Err(HarnessError::UnresolvedSymbol(symbol.clone()))
                        }),
                    )?;
                    debug!("import {name} at 0x{thunk:08x} left unresolved");
                }
            }
        }
        Ok(())
    }
}

fn dispatch(cpu: &mut dyn Cpu, symbol: &str, routine: &dyn HostRoutine) -> Result<()> {
    let count = routine.arg_words();
    if count > Reg::ARGS.len() {
        return Err(HarnessError::RoutineArity {
            symbol: symbol.to_string(),
            count,
        });
    }
    let args = Reg::ARGS[..count]
        .iter()
        .map(|&reg| cpu.reg(reg))
        .collect::<Result<Vec<_>>>()?;

    let results = routine.call(&args);
    if results.len() > Reg::ARGS.len() {
        return Err(HarnessError::RoutineArity {
            symbol: symbol.to_string(),
            count: results.len(),
        });
    }
    for (&reg, &value) in Reg::ARGS.iter().zip(&results) {
        cpu.set_reg(reg, value)?;
    }
    Ok(())
}
