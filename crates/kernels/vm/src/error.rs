//! VM errors.
//!
//! Everything here is a bytecode-integrity or setup failure detected before
//! (or instead of) running a chunk. Numeric edge cases during execution are
//! never errors; the safe kernels resolve them to zero.
//!
//! # Error Categories
//!
//! - **Integrity errors**: [`Error::UnknownOpcode`], [`Error::Truncated`], [`Error::MissingDone`]
//! - **Binding errors**: [`Error::RegisterOutOfRange`], [`Error::ConstantOutOfRange`],
//!   [`Error::DataSetOutOfRange`], [`Error::DataSetRegisterOutOfRange`],
//!   [`Error::ExternalFunctionOutOfRange`], [`Error::ExternalOperandCount`],
//!   [`Error::OptimizedProgramMismatch`]
//! - **Setup errors**: [`Error::InvalidConfig`], [`Error::Assembly`]
//!
//! Integrity errors stand in for a fatal abort: they mean the compiler that
//! produced the stream is broken. An invocation that hits one stops and is
//! never resumed.

use thiserror::Error;

/// VM result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while validating, optimizing or executing bytecode.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// An opcode byte does not name any known instruction.
    #[error("unknown opcode 0x{opcode:02x} at byte offset {offset}")]
    UnknownOpcode {
        /// The offending byte.
        opcode: u8,
        /// Offset of the opcode within the stream.
        offset: usize,
    },

    /// The stream ends in the middle of an instruction's operands.
    #[error("byte code truncated at byte offset {offset}")]
    Truncated {
        /// Offset at which more bytes were expected.
        offset: usize,
    },

    /// The stream ends without a `done` instruction.
    #[error("byte code ends without a done instruction")]
    MissingDone,

    /// A register operand names a register past the invocation's register count.
    #[error("register r{register} out of range ({available} temporary registers)")]
    RegisterOutOfRange {
        /// Register index from the stream.
        register: u16,
        /// Registers bound for the invocation.
        available: usize,
    },

    /// A constant operand reads past the end of the constant table.
    #[error("constant offset {offset} out of range ({len} byte constant table)")]
    ConstantOutOfRange {
        /// Byte offset from the stream.
        offset: u16,
        /// Length of the constant table in bytes.
        len: usize,
    },

    /// A dataset operand names a dataset that was not bound.
    #[error("data set {data_set} out of range ({available} data sets)")]
    DataSetOutOfRange {
        /// Dataset index from the stream.
        data_set: u16,
        /// Datasets bound for the invocation.
        available: usize,
    },

    /// An input or output column index is past the dataset's columns.
    #[error("{kind} register {register} out of range for data set {data_set} ({available} columns)")]
    DataSetRegisterOutOfRange {
        /// Dataset the column belongs to.
        data_set: u16,
        /// Column index from the stream.
        register: u16,
        /// `"input"` or `"output"`.
        kind: &'static str,
        /// Columns the dataset has.
        available: usize,
    },

    /// An external call names a function that was not bound.
    #[error("external function {index} out of range ({available} functions)")]
    ExternalFunctionOutOfRange {
        /// Function index from the stream.
        index: u8,
        /// Functions bound for the invocation.
        available: usize,
    },

    /// An external operand count table disagrees with the bound functions.
    #[error("external function {index} declares {expected} operands but the table says {found}")]
    ExternalOperandCount {
        /// Function index.
        index: u8,
        /// Count declared by the bound function.
        expected: usize,
        /// Count the optimized program was built with.
        found: usize,
    },

    /// An optimized program was lowered from different byte code than the
    /// invocation runs.
    #[error("optimized program was lowered from different byte code ({found} bytes, invocation has {expected})")]
    OptimizedProgramMismatch {
        /// Length of the invocation's raw stream.
        expected: usize,
        /// Length of the stream the program was lowered from.
        found: usize,
    },

    /// A configuration value is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Assembly text could not be parsed.
    #[error("assembly error on line {line}: {message}")]
    Assembly {
        /// One-based source line.
        line: usize,
        /// What went wrong.
        message: String,
    },
}

impl Error {
    /// Whether this error means the bytecode itself is malformed.
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownOpcode { .. } | Error::Truncated { .. } | Error::MissingDone
        )
    }
}
