// au32-harness - Calling into libAudio32Encoder.so as a library
//
// This crate runs single functions of a position-dependent ARM/Thumb shared
// object on an emulator and drives its audio encoder over a whole input,
// producing the proprietary "AU" container.
//
// # Architecture
//
// 1. **Image** (`image.rs`): Parse the ELF, check the revision, map it at 0,
//    bind imports to thunks
// 2. **Trap** (`trap.rs`): Page of `b .` used as the synthetic return address
// 3. **Invoke** (`invoke.rs`): Registers in, run to the trap, registers out
// 4. **Intercept** (`intercept.rs`): Host routines behind import thunks (`pow`)
// 5. **Inspect** (`inspect.rs`): Raw reads of the encoder's globals
// 6. **Pipeline** (`pipeline.rs`): init, one encode per chunk, container
//
// # Execution substrate
//
// The emulator is reached only through the `Substrate` trait
// (`substrate.rs`); the `au32-harness-emu` crate provides one on top of
// Unicorn. A substrate instance is one address space: the encoder's globals
// live there and carry over from call to call.

pub mod chunk;
pub mod config;
pub mod container;
pub mod error;
pub mod image;
pub mod inspect;
pub mod intercept;
pub mod invoke;
pub mod layout;
pub mod pipeline;
pub mod substrate;
pub mod trap;

#[cfg(test)]
mod testing;

pub use chunk::{AudioChunk, ChunkSource, SampleBuffer, SourceFormat};
pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use image::{BinaryImage, ImportTable};
pub use intercept::{HostRoutine, Interceptors};
pub use layout::{Layout, AUDIO32_ENCODER};
pub use pipeline::{Encoder, Stage};
pub use substrate::{CallHook, Cpu, Reg, Substrate};

use tracing::debug;

/// Load the encoder image into `substrate` and get an encoder ready for
/// `audio_encode_init`.
pub fn boot<S: Substrate>(
    mut substrate: S,
    image_data: &[u8],
    config: HarnessConfig,
) -> Result<Encoder<S>> {
    let layout = AUDIO32_ENCODER;

    // Parse and check the image
    let image = BinaryImage::parse(image_data)?;
    image.verify_revision(&layout)?;
    image.check_layout(&layout)?;

    // Map it and route imports
    let imports = image.load(&mut substrate, &config)?;
    let interceptors = Interceptors::libm();
    interceptors.install(&mut substrate, &imports)?;
    let hosted = imports
        .iter()
        .filter(|(name, _)| interceptors.contains(name))
        .count();
    debug!(
        "{} imported functions, {hosted} run on the host",
        imports.len()
    );

    Encoder::attach(substrate, layout, config)
}
