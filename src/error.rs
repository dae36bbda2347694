use thiserror::Error;

use crate::trap::TrapCode;

/// Convenience result alias used across the bridge.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced to the embedder.
///
/// Every failure is either a load-time refusal to produce a usable
/// `Code`/`ExecutionContext`, or a trap recovered from artifact code.
/// There is no retry path anywhere in this crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to load artifact `{path}`: {reason}")]
    Load { path: String, reason: String },

    #[error("artifact is missing required entry point `{symbol}`")]
    MissingEntryPoint { symbol: &'static str },

    #[error("artifact ABI version mismatch: expected {expected}, found {found}")]
    AbiMismatch { expected: u32, found: u32 },

    #[error("code is already initialized")]
    AlreadyInitialized,

    #[error("code must be initialized before creating execution contexts")]
    Uninitialized,

    #[error("export `{0}` not found in artifact")]
    ExportNotFound(String),

    #[error("trap: {0}")]
    Trap(TrapCode),
}
