//! Execution error types

use thiserror::Error;

/// Reasons a call, a creation or a single frame of bytecode can fail.
///
/// Every variant is recoverable by the frame that issued the call: the
/// dispatcher turns it into a failure value instead of unwinding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvmError {
    /// Call nesting reached the maximum depth
    #[error("max call depth exceeded")]
    CallDepthExceeded,

    /// Sender cannot cover the transferred value
    #[error("insufficient balance for transfer")]
    InsufficientBalance,

    /// Creation target already holds code or a non-zero nonce
    #[error("contract address collision")]
    CreateCollision,

    /// Creator nonce would overflow
    #[error("nonce overflow")]
    NonceOverflow,

    /// Execution reverted; remaining gas is handed back to the caller
    #[error("execution reverted")]
    Reverted,

    /// Gas exhausted
    #[error("out of gas")]
    OutOfGas,

    /// Stack underflow
    #[error("stack underflow")]
    StackUnderflow,

    /// Stack overflow
    #[error("stack overflow")]
    StackOverflow,

    /// Jump to a position that is not a JUMPDEST
    #[error("invalid jump destination: {0}")]
    InvalidJump(usize),

    /// Undefined opcode, or one not active under the current rules
    #[error("invalid opcode: 0x{0:02x}")]
    InvalidOpcode(u8),

    /// State mutation attempted inside a static call
    #[error("write protection")]
    StaticCallViolation,

    /// RETURNDATACOPY read past the end of the return data buffer
    #[error("return data out of bounds")]
    ReturnDataOutOfBounds,

    /// Deployed code is larger than the allowed maximum
    #[error("max code size exceeded")]
    MaxCodeSizeExceeded,
}

impl EvmError {
    /// Whether the failing frame keeps its unused gas
    pub fn is_revert(&self) -> bool {
        matches!(self, EvmError::Reverted)
    }
}

/// Result type for execution operations
pub type EvmResult<T> = Result<T, EvmError>;

/// Chain configuration loading error
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Could not read the configuration file
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration document
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// No preset with the given name
    #[error("unknown chain: {0}")]
    UnknownChain(String),
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_revert_keeps_gas() {
        assert!(EvmError::Reverted.is_revert());
        assert!(!EvmError::OutOfGas.is_revert());
        assert!(!EvmError::StaticCallViolation.is_revert());
        assert!(!EvmError::CallDepthExceeded.is_revert());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(EvmError::InvalidOpcode(0xfe).to_string(), "invalid opcode: 0xfe");
        assert_eq!(EvmError::InvalidJump(7).to_string(), "invalid jump destination: 7");
        assert_eq!(
            ConfigError::UnknownChain("ropsten".into()).to_string(),
            "unknown chain: ropsten"
        );
    }
}
