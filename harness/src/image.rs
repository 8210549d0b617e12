// image.rs - Loading the encoder shared object
//
// Uses goblin for parsing. The image is placed at base 0 so that every
// recovered offset is also an absolute address. Dynamic relocations are
// applied by hand; imported functions are bound to 4-byte Thumb thunks that
// the interceptor hooks, imported data to zeroed slots in a region of its own.

use std::collections::BTreeMap;

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::layout::Layout;
use crate::substrate::{read_u32, write_u32, Substrate};
use goblin::elf::{program_header, sym, Elf};
use md5::{Digest, Md5};
use tracing::{debug, info};

/// Load address of the image
pub const BASE: u32 = 0;

const PAGE: u32 = 0x1000;

// ARM dynamic relocation types
const R_ARM_ABS32: u32 = 2;
const R_ARM_GLOB_DAT: u32 = 21;
const R_ARM_JUMP_SLOT: u32 = 22;
const R_ARM_RELATIVE: u32 = 23;

/// Thunk body: `bx lr; nop`
const THUNK: [u8; 4] = [0x70, 0x47, 0x00, 0xbf];

/// A loadable segment
#[derive(Debug, Clone)]
pub struct Segment {
    pub vaddr: u32,
    pub memsz: u32,
    pub filesz: u32,
    pub offset: u32,
    pub flags: u32,
}

impl Segment {
    /// Whether `[addr, addr + len)` lies wholly inside the segment
    pub fn covers(&self, addr: u32, len: u32) -> bool {
        addr >= self.vaddr && addr as u64 + len as u64 <= self.vaddr as u64 + self.memsz as u64
    }
}

/// A dynamic relocation, already resolved to its symbol
#[derive(Debug, Clone)]
pub struct Relocation {
    pub offset: u32,
    pub kind: u32,
    pub target: Target,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// No symbol (R_ARM_RELATIVE)
    None,
    /// Symbol defined inside the image
    Local(u32),
    /// Symbol the image expects someone else to provide
    Import {
        name: String,
        is_func: bool,
        size: u32,
    },
}

/// One imported symbol, merged over every relocation that names it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSymbol<'a> {
    pub name: &'a str,
    pub is_func: bool,
    /// Object size from the symbol table; 0 for functions
    pub size: u32,
}

/// Storage for one data import: at least a word, 8-byte aligned
fn data_slot_len(size: u32) -> u32 {
    (size.max(4) + 7) & !7
}

/// Parsed image, ready to be mapped
#[derive(Debug, Clone)]
pub struct BinaryImage {
    pub md5: String,
    pub segments: Vec<Segment>,
    pub relocations: Vec<Relocation>,
    data: Vec<u8>,
}

/// Import name -> thunk address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportTable {
    thunks: BTreeMap<String, u32>,
}

impl ImportTable {
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.thunks.iter().map(|(name, &addr)| (name.as_str(), addr))
    }

    pub fn len(&self) -> usize {
        self.thunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thunks.is_empty()
    }

    pub fn insert(&mut self, name: &str, addr: u32) {
        self.thunks.insert(name.to_string(), addr);
    }
}

impl BinaryImage {
    /// Parse an ARM ELF32 shared object
    pub fn parse(data: &[u8]) -> Result<Self> {
        let md5 = hex::encode(Md5::digest(data));
        let elf = Elf::parse(data).map_err(|e| HarnessError::Image(e.to_string()))?;

        if elf.header.e_machine != goblin::elf::header::EM_ARM {
            return Err(HarnessError::Image(format!(
                "not an ARM binary (e_machine=0x{:x})",
                elf.header.e_machine
            )));
        }
        if elf.is_64 {
            return Err(HarnessError::Image("expected a 32-bit ELF".to_string()));
        }

        let segments: Vec<Segment> = elf
            .program_headers
            .iter()
            .filter(|ph| ph.p_type == program_header::PT_LOAD)
            .map(|ph| Segment {
                vaddr: ph.p_vaddr as u32,
                memsz: ph.p_memsz as u32,
                filesz: ph.p_filesz as u32,
                offset: ph.p_offset as u32,
                flags: ph.p_flags,
            })
            .collect();
        if segments.is_empty() {
            return Err(HarnessError::Image("no PT_LOAD segments".to_string()));
        }
        for seg in &segments {
            if seg.offset as usize + seg.filesz as usize > data.len() {
                return Err(HarnessError::Image(format!(
                    "segment at 0x{:x} extends past end of file",
                    seg.vaddr
                )));
            }
        }

        let relocations = elf
            .dynrels
            .iter()
            .chain(elf.dynrelas.iter())
            .chain(elf.pltrelocs.iter())
            .map(|rel| {
                let target = if rel.r_sym == 0 {
                    Target::None
                } else {
                    match elf.dynsyms.get(rel.r_sym) {
                        Some(s) if s.st_shndx != 0 => Target::Local(s.st_value as u32),
                        Some(s) => Target::Import {
                            name: elf
                                .dynstrtab
                                .get_at(s.st_name)
                                .unwrap_or_default()
                                .to_string(),
                            is_func: s.st_type() == sym::STT_FUNC,
                            size: s.st_size as u32,
                        },
                        None => Target::None,
                    }
                };
                Relocation {
                    offset: rel.r_offset as u32,
                    kind: rel.r_type,
                    target,
                }
            })
            .collect();

        Ok(Self {
            md5,
            segments,
            relocations,
            data: data.to_vec(),
        })
    }

    /// Refuse any build other than the one `layout` was recovered from
    pub fn verify_revision(&self, layout: &Layout) -> Result<()> {
        if self.md5 != layout.md5 {
            return Err(HarnessError::UnknownRevision {
                found: self.md5.clone(),
                expected: layout.md5.to_string(),
            });
        }
        Ok(())
    }

    /// Every entry point and global of `layout` must lie wholly inside a
    /// segment
    pub fn check_layout(&self, layout: &Layout) -> Result<()> {
        for (name, addr, len) in layout.regions() {
            if !self.segments.iter().any(|seg| seg.covers(addr, len)) {
                debug!("{name} at 0x{addr:08x}+{len} is outside the image");
                return Err(HarnessError::UnknownAddress { addr });
            }
        }
        Ok(())
    }

    /// Imported symbols, deduplicated and sorted by name
    pub fn imports(&self) -> Vec<ImportSymbol<'_>> {
        let mut seen: BTreeMap<&str, ImportSymbol<'_>> = BTreeMap::new();
        for rel in &self.relocations {
            if let Target::Import {
                name,
                is_func,
                size,
            } = &rel.target
            {
                if name.is_empty() {
                    continue;
                }
                let entry = seen.entry(name.as_str()).or_insert(ImportSymbol {
                    name: name.as_str(),
                    is_func: false,
                    size: 0,
                });
                entry.is_func |= *is_func || rel.kind == R_ARM_JUMP_SLOT;
                entry.size = entry.size.max(*size);
            }
        }
        seen.into_values().collect()
    }

    /// Page-aligned span covering every segment
    pub fn span(&self) -> (u32, u32) {
        let lo = self.segments.iter().map(|s| s.vaddr).min().unwrap_or(0);
        let hi = self
            .segments
            .iter()
            .map(|s| s.vaddr + s.memsz)
            .max()
            .unwrap_or(0);
        (BASE + (lo & !(PAGE - 1)), BASE + ((hi + PAGE - 1) & !(PAGE - 1)))
    }

    /// Map segments, bind imports to thunks, apply relocations
    pub fn load(
        &self,
        substrate: &mut (impl Substrate + ?Sized),
        config: &HarnessConfig,
    ) -> Result<ImportTable> {
        let (lo, hi) = self.span();
        substrate.map_region(lo, hi - lo)?;
        for seg in &self.segments {
            let start = seg.offset as usize;
            let end = start + seg.filesz as usize;
            substrate.write_memory(BASE + seg.vaddr, &self.data[start..end])?;
        }
        debug!("image mapped at 0x{lo:08x}..0x{hi:08x}");

        let imports = self.imports();
        let (funcs, data): (Vec<&ImportSymbol>, Vec<&ImportSymbol>) = imports.iter().partition(|import| import.is_func);
        if funcs.len() * THUNK.len() > config.import_size as usize {
            return Err(HarnessError::Image(format!(
                "{} imported functions do not fit in the thunk region",
                funcs.len()
            )));
        }
        let data_len: u64 = data
            .iter()
            .map(|import| data_slot_len(import.size) as u64)
            .sum();
        if data_len > config.data_import_size as u64 {
            return Err(HarnessError::Image(format!(
                "{} imported objects ({data_len} bytes) do not fit in the data region",
                data.len()
            )));
        }
        substrate.map_region(config.import_addr, config.import_size)?;
        substrate.map_region(config.data_import_addr, config.data_import_size)?;

        let mut table = ImportTable::default();
        let mut bindings = BTreeMap::new();
        for (idx, import) in funcs.iter().enumerate() {
            let thunk = config.import_addr + (idx * THUNK.len()) as u32;
            substrate.write_memory(thunk, &THUNK)?;
            table.insert(import.name, thunk);
            bindings.insert(import.name, thunk | 1);
        }
        let mut cursor = config.data_import_addr;
        for import in &data {
            bindings.insert(import.name, cursor);
            cursor += data_slot_len(import.size);
        }

        let mut skipped = 0usize;
        for rel in &self.relocations {
            let at = BASE + rel.offset;
            let value = match (rel.kind, &rel.target) {
                (R_ARM_RELATIVE, _) => read_u32(&*substrate, at)?.wrapping_add(BASE),
                (R_ARM_GLOB_DAT | R_ARM_JUMP_SLOT, Target::Local(value)) => BASE + value,
                (R_ARM_ABS32, Target::Local(value)) => {
                    read_u32(&*substrate, at)?.wrapping_add(BASE + value)
                }
                (R_ARM_GLOB_DAT | R_ARM_JUMP_SLOT | R_ARM_ABS32, Target::Import { name, .. }) => {
                    match bindings.get(name.as_str()) {
                        Some(&bound) if rel.kind == R_ARM_ABS32 => {
                            read_u32(&*substrate, at)?.wrapping_add(bound)
                        }
                        Some(&bound) => bound,
                        None => {
                            skipped += 1;
                            continue;
                        }
                    }
                }
                _ => {
                    skipped += 1;
                    continue;
                }
            };
            write_u32(substrate, at, value)?;
        }

        info!(
            "loaded image md5={} ({} segments, {} relocations, {} functions and {} objects imported)",
            self.md5,
            self.segments.len(),
            self.relocations.len() - skipped,
            funcs.len(),
            data.len()
        );
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::AUDIO32_ENCODER;
    use crate::substrate::Cpu;

    #[test]
    fn test_elf_magic() {
        // Invalid ELF
        let bad = vec![0x00; 64];
        assert!(matches!(BinaryImage::parse(&bad), Err(HarnessError::Image(_))));
    }

    fn image(md5: &str) -> BinaryImage {
        BinaryImage {
            md5: md5.to_string(),
            segments: vec![
                Segment {
                    vaddr: 0,
                    memsz: 0xe000,
                    filesz: 0xe000,
                    offset: 0,
                    flags: 5,
                },
                Segment {
                    vaddr: 0xe000,
                    memsz: 0xe000,
                    filesz: 0x8,
                    offset: 0,
                    flags: 6,
                },
            ],
            relocations: vec![
                Relocation {
                    offset: 0x10,
                    kind: R_ARM_JUMP_SLOT,
                    target: Target::Import {
                        name: "pow".to_string(),
                        is_func: false,
                        size: 0,
                    },
                },
                Relocation {
                    offset: 0x14,
                    kind: R_ARM_GLOB_DAT,
                    target: Target::Import {
                        name: "__sF".to_string(),
                        is_func: false,
                        size: 0xfc,
                    },
                },
                Relocation {
                    offset: 0x20,
                    kind: R_ARM_GLOB_DAT,
                    target: Target::Import {
                        name: "__stack_chk_guard".to_string(),
                        is_func: false,
                        size: 4,
                    },
                },
                Relocation {
                    offset: 0x18,
                    kind: R_ARM_RELATIVE,
                    target: Target::None,
                },
                Relocation {
                    offset: 0x1c,
                    kind: R_ARM_ABS32,
                    target: Target::Local(0x3109),
                },
            ],
            data: {
                let mut data = vec![0u8; 0xe000];
                data[0x18..0x1c].copy_from_slice(&0x4000u32.to_le_bytes());
                data[0x1c..0x20].copy_from_slice(&4u32.to_le_bytes());
                data
            },
        }
    }

    #[test]
    fn test_revision_check() {
        assert!(image(AUDIO32_ENCODER.md5)
            .verify_revision(&AUDIO32_ENCODER)
            .is_ok());
        let err = image("00").verify_revision(&AUDIO32_ENCODER).unwrap_err();
        assert!(matches!(err, HarnessError::UnknownRevision { .. }));
    }

    #[test]
    fn test_layout_inside_segments() {
        assert!(image(AUDIO32_ENCODER.md5).check_layout(&AUDIO32_ENCODER).is_ok());

        let mut small = image(AUDIO32_ENCODER.md5);
        small.segments.truncate(1);
        let err = small.check_layout(&AUDIO32_ENCODER).unwrap_err();
        assert!(matches!(err, HarnessError::UnknownAddress { .. }));
    }

    #[test]
    fn test_layout_global_must_fit_whole() {
        // gl_history starts 4 bytes before the end of the data segment
        let mut short = image(AUDIO32_ENCODER.md5);
        short.segments[1].memsz = AUDIO32_ENCODER.gl_history + 4 - 0xe000;
        let err = short.check_layout(&AUDIO32_ENCODER).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::UnknownAddress { addr } if addr == AUDIO32_ENCODER.gl_history
        ));
    }

    #[test]
    fn test_load_binds_imports_and_relocates() {
        use crate::testing::FakeSubstrate;

        let config = HarnessConfig::default();
        let img = image(AUDIO32_ENCODER.md5);
        assert_eq!(img.span(), (0, 0x1c000));
        let names: Vec<_> = img
            .imports()
            .iter()
            .map(|import| (import.name, import.is_func, import.size))
            .collect();
        assert_eq!(
            names,
            vec![("__sF", false, 0xfc), ("__stack_chk_guard", false, 4), ("pow", true, 0)]
        );

        let mut sub = FakeSubstrate::new();
        let table = img.load(&mut sub, &config).unwrap();

        // functions get a thunk, data does not
        assert_eq!(table.iter().collect::<Vec<_>>(), vec![("pow", config.import_addr)]);
        let pow = config.import_addr;
        assert_eq!(sub.read_memory(pow, 4).unwrap(), THUNK.to_vec());

        assert_eq!(read_u32(&sub, 0x10).unwrap(), pow | 1);
        assert_eq!(read_u32(&sub, 0x14).unwrap(), config.data_import_addr);
        assert_eq!(read_u32(&sub, 0x20).unwrap(), config.data_import_addr + 0x100);
        assert_eq!(read_u32(&sub, 0x18).unwrap(), 0x4000);
        assert_eq!(read_u32(&sub, 0x1c).unwrap(), 0x310d);

        // filling a data object leaves the thunks intact
        sub.write_memory(config.data_import_addr, &[0xaa; 0xfc]).unwrap();
        assert_eq!(sub.read_memory(pow, 4).unwrap(), THUNK.to_vec());
        assert_eq!(read_u32(&sub, config.data_import_addr + 0x100).unwrap(), 0);
    }

    #[test]
    fn test_data_slot_sizes() {
        assert_eq!(data_slot_len(0), 8);
        assert_eq!(data_slot_len(4), 8);
        assert_eq!(data_slot_len(0xfc), 0x100);
    }
}
