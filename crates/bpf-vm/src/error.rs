// bpf-vm/src/error.rs

use std::fmt;

/// Errors raised while running contract bytecode
///
/// Exactly six kinds exist. Every one of them aborts the current call,
/// discards its pending storage writes and keeps the gas consumed so far.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BpfError {
    #[error("BPFExecutionError: {0}")]
    Execution(ExecutionFault),

    #[error("BPFSecurityError: {0}")]
    Security(SecurityViolation),

    #[error("BPFResourceError: instruction limit reached ({executed} of {limit})")]
    Resource { executed: u64, limit: u64 },

    #[error("BPFGasError: out of gas (required {required}, limit {limit})")]
    Gas { required: u64, limit: u64 },

    #[error("BPFTimeoutError: execution took {elapsed_ms}ms, limit {limit_ms}ms")]
    Timeout { elapsed_ms: u64, limit_ms: u64 },

    #[error("BPFMemoryError: {0}")]
    Memory(MemoryFault),
}

impl BpfError {
    /// Stable name of the error kind, as reported to API clients
    pub fn kind(&self) -> &'static str {
        match self {
            BpfError::Execution(_) => "BPFExecutionError",
            BpfError::Security(_) => "BPFSecurityError",
            BpfError::Resource { .. } => "BPFResourceError",
            BpfError::Gas { .. } => "BPFGasError",
            BpfError::Timeout { .. } => "BPFTimeoutError",
            BpfError::Memory(_) => "BPFMemoryError",
        }
    }

    /// Revert payload, if the contract reverted explicitly
    pub fn revert_data(&self) -> Option<&[u8]> {
        match self {
            BpfError::Execution(ExecutionFault::Reverted(data)) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn out_of_bounds(address: u64, len: u64, limit: u64) -> Self {
        BpfError::Memory(MemoryFault::OutOfBounds { address, len, limit })
    }
}

impl From<ExecutionFault> for BpfError {
    fn from(fault: ExecutionFault) -> Self {
        BpfError::Execution(fault)
    }
}

impl From<SecurityViolation> for BpfError {
    fn from(violation: SecurityViolation) -> Self {
        BpfError::Security(violation)
    }
}

impl From<MemoryFault> for BpfError {
    fn from(fault: MemoryFault) -> Self {
        BpfError::Memory(fault)
    }
}

/// Semantic faults in otherwise in-budget execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionFault {
    InvalidOpcode { opcode: u8, pc: usize },
    InvalidRegister { register: u8, pc: usize },
    /// r10 is the frame pointer and cannot be written
    ReadOnlyRegister { pc: usize },
    DivisionByZero { pc: usize },
    InvalidJump { target: i64, pc: usize },
    /// EXIT or an EVM pop with nothing to return to
    StackUnderflow { pc: usize },
    UnsupportedOpcode { opcode: u8, name: &'static str, pc: usize },
    InvalidReturnRange { offset: u64, len: u64 },
    /// EVM init code returned no runtime code
    EmptyDeployedCode,
    Reverted(Vec<u8>),
}

impl fmt::Display for ExecutionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionFault::InvalidOpcode { opcode, pc } => {
                write!(f, "invalid opcode 0x{:02x} at pc {}", opcode, pc)
            }
            ExecutionFault::InvalidRegister { register, pc } => {
                write!(f, "invalid register r{} at pc {}", register, pc)
            }
            ExecutionFault::ReadOnlyRegister { pc } => {
                write!(f, "write to read-only frame pointer r10 at pc {}", pc)
            }
            ExecutionFault::DivisionByZero { pc } => write!(f, "division by zero at pc {}", pc),
            ExecutionFault::InvalidJump { target, pc } => {
                write!(f, "jump to {} out of program at pc {}", target, pc)
            }
            ExecutionFault::StackUnderflow { pc } => write!(f, "stack underflow at pc {}", pc),
            ExecutionFault::UnsupportedOpcode { opcode, name, pc } => {
                write!(f, "unsupported opcode {} (0x{:02x}) at pc {}", name, opcode, pc)
            }
            ExecutionFault::InvalidReturnRange { offset, len } => {
                write!(f, "invalid return range offset {} len {}", offset, len)
            }
            ExecutionFault::EmptyDeployedCode => write!(f, "constructor returned empty runtime code"),
            ExecutionFault::Reverted(data) => {
                if data.is_empty() {
                    write!(f, "execution reverted")
                } else {
                    write!(f, "execution reverted: 0x{}", hex::encode(data))
                }
            }
        }
    }
}

/// Attempts to leave the sandbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityViolation {
    /// Host call id outside the allow-list
    DisallowedHelper { id: i64 },
    /// Helper that would make execution differ between nodes
    NonDeterministic { helper: &'static str },
    /// Calls into other contracts and child deployments
    ExternalCall { operation: &'static str },
}

impl fmt::Display for SecurityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityViolation::DisallowedHelper { id } => write!(f, "host call {} is not allowed", id),
            SecurityViolation::NonDeterministic { helper } => {
                write!(f, "non-deterministic helper {} is not allowed", helper)
            }
            SecurityViolation::ExternalCall { operation } => {
                write!(f, "{} is not supported inside a contract", operation)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryFault {
    OutOfBounds { address: u64, len: u64, limit: u64 },
    CallDepthExceeded { depth: usize, limit: usize },
    StackOverflow { limit: usize },
}

impl fmt::Display for MemoryFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryFault::OutOfBounds { address, len, limit } => write!(
                f,
                "access of {} bytes at {} exceeds memory limit {}",
                len, address, limit
            ),
            MemoryFault::CallDepthExceeded { depth, limit } => {
                write!(f, "call depth {} exceeds limit {}", depth, limit)
            }
            MemoryFault::StackOverflow { limit } => write!(f, "stack exceeds {} items", limit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(BpfError::Gas { required: 11, limit: 10 }.kind(), "BPFGasError");
        assert_eq!(BpfError::Resource { executed: 1, limit: 1 }.kind(), "BPFResourceError");
        assert_eq!(
            BpfError::from(SecurityViolation::DisallowedHelper { id: 99 }).kind(),
            "BPFSecurityError"
        );
        assert_eq!(BpfError::out_of_bounds(1, 2, 3).kind(), "BPFMemoryError");
    }

    #[test]
    fn test_display_carries_kind() {
        let err = BpfError::from(ExecutionFault::DivisionByZero { pc: 3 });
        assert_eq!(err.to_string(), "BPFExecutionError: division by zero at pc 3");
    }

    #[test]
    fn test_revert_data() {
        let err = BpfError::from(ExecutionFault::Reverted(vec![1, 2]));
        assert_eq!(err.revert_data(), Some(&[1u8, 2][..]));
        assert!(BpfError::Timeout { elapsed_ms: 1, limit_ms: 1 }.revert_data().is_none());
    }
}
