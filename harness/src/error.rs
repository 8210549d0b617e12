// error.rs - Error taxonomy for the harness
//
// Every error aborts the whole conversion. Nothing is retried: a call mutates
// blob globals, so replaying it would encode from corrupted state.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    // Configuration errors, raised before any call executes
    #[error("unsupported audio format: {0}")]
    SourceFormat(String),

    #[error("audio source: {0}")]
    Source(String),

    #[error("{field} = {value} does not fit in a 16-bit container field")]
    FieldOverflow { field: &'static str, value: u64 },

    #[error("{chunk_bytes} byte chunks do not fit the {input_size} byte input buffer")]
    InputBuffer { chunk_bytes: usize, input_size: u32 },

    #[error("chunk of {actual} bytes, encoder expects {expected}")]
    ChunkLength { actual: usize, expected: usize },

    // Binding errors
    #[error("invalid image: {0}")]
    Image(String),

    #[error("unknown image revision (md5 {found}, expected {expected})")]
    UnknownRevision { found: String, expected: String },

    #[error("address 0x{addr:08x} is not mapped by the loaded image")]
    UnknownAddress { addr: u32 },

    #[error("unresolved external symbol '{0}'")]
    UnresolvedSymbol(String),

    #[error("call to 0x{entry:08x} passes {count} arguments, at most 4 fit in registers")]
    TooManyArgs { entry: u32, count: usize },

    #[error("host routine for '{symbol}' moves {count} words through r0-r3")]
    RoutineArity { symbol: String, count: usize },

    #[error("encoder used before audio_encode_init")]
    NotInitialized,

    #[error("audio_encode_init called twice")]
    AlreadyInitialized,

    #[error("encoder already finalized")]
    AlreadyFinalized,

    // Execution anomalies
    #[error("call to 0x{entry:08x} stopped at pc=0x{pc:08x} before reaching the trap")]
    TrapNotReached { entry: u32, pc: u32 },

    #[error("encoded {actual} words but header declares {expected}")]
    PayloadMismatch { expected: usize, actual: usize },

    #[error("invalid container: {0}")]
    Container(String),

    #[error("substrate failure: {0}")]
    Substrate(String),
}

