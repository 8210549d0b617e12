// au32enc - Encode a WAV file with the CloudPets Audio32 encoder
//
// Runs libAudio32Encoder.so under emulation and writes its output as an
// "AU" container.
//
// Usage:
//   au32enc input.wav output.au
//
// The encoder library is read from $AU32ENC_LIBRARY, or from
// apk2/lib/armeabi-v7a/libAudio32Encoder.so when unset. Set RUST_LOG=debug
// (or trace, for hex dumps of encoder state) for more output.

use anyhow::{Context, Result};
use au32_harness::container::ContainerHeader;
use au32_harness::{ChunkSource, HarnessConfig};
use au32_harness_emu::{UnicornSubstrate, WavSource};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LIBRARY: &str = "apk2/lib/armeabi-v7a/libAudio32Encoder.so";

#[derive(Parser, Debug)]
#[command(name = "au32enc")]
#[command(about = "Encode 16 kHz mono WAV with the Audio32 encoder")]
#[command(version)]
struct Args {
    /// Input WAV (16 kHz, 16-bit, mono)
    input: PathBuf,

    /// Output container
    output: PathBuf,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    // Check the input before touching the encoder
    let mut source = WavSource::open(&args.input)
        .with_context(|| format!("Failed to open {}", args.input.display()))?;
    source
        .format()
        .validate()
        .with_context(|| format!("Unsupported input {}", args.input.display()))?;
    info!("input: {} samples", source.len());

    // Load the encoder
    let library = std::env::var_os("AU32ENC_LIBRARY")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LIBRARY));
    let image = std::fs::read(&library)
        .with_context(|| format!("Failed to read encoder library {}", library.display()))?;

    let substrate = UnicornSubstrate::new().context("Failed to start emulator")?;
    let mut encoder = au32_harness::boot(substrate, &image, HarnessConfig::default())
        .context("Failed to load encoder library")?;

    // Wiring smoke test
    encoder.endianess_t(0x1).context("endianessT smoke test failed")?;

    let data = encoder.encode(&mut source).context("Encoding failed")?;
    let header = ContainerHeader::parse(&data).context("Encoder produced a bad container")?;
    std::fs::write(&args.output, &data).context("Failed to write output")?;

    info!(
        "wrote {} ({} frames, {} bytes)",
        args.output.display(),
        header.frame_count,
        data.len()
    );
    Ok(())
}
