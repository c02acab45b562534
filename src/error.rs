//! Error types for the bincfg flow-reconstruction library.
//!
//! This module provides structured error handling using thiserror. The
//! reconstruction pipeline prefers returning partial graphs over failing
//! hard; only invariant violations and strict-mode classification failures
//! surface as errors.

use thiserror::Error;

/// Main error type for bincfg operations.
#[derive(Debug, Error)]
pub enum BincfgError {
    /// Input does not match any known disassembly shape
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Architecture not supported by the factory
    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    /// The instruction classifier rejected a mnemonic
    #[error("Unknown mnemonic {mnemonic:?} in: {text}")]
    UnknownMnemonic { mnemonic: String, text: String },

    /// Operand or line text could not be decomposed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A lookup that must succeed by construction failed
    #[error("Invariant violation at {addr:#x}: {message}")]
    Invariant { addr: u64, message: String },

    /// DWARF data could not be located or decoded
    #[error("Debug info error: {0}")]
    DebugInfo(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors from the JSON exporter
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BincfgError {
    pub fn invariant(addr: u64, message: impl Into<String>) -> Self {
        BincfgError::Invariant {
            addr,
            message: message.into(),
        }
    }
}

/// Result type alias for bincfg operations
pub type Result<T> = std::result::Result<T, BincfgError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BincfgError::UnsupportedArchitecture("m68k".to_string());
        assert_eq!(err.to_string(), "Unsupported architecture: m68k");

        let err = BincfgError::invariant(0x1234, "missing instruction");
        assert_eq!(
            err.to_string(),
            "Invariant violation at 0x1234: missing instruction"
        );
    }

    #[test]
    fn test_unknown_mnemonic_display() {
        let err = BincfgError::UnknownMnemonic {
            mnemonic: "FROB".to_string(),
            text: "frob r1, r2".to_string(),
        };
        assert!(err.to_string().contains("FROB"));
        assert!(err.to_string().contains("frob r1, r2"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: BincfgError = io.into();
        assert!(matches!(err, BincfgError::Io(_)));
    }
}
