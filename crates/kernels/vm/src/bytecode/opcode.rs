//! Opcode definitions and metadata for the VectorVM instruction stream.
//!
//! Opcodes are data: each one carries a static [`OpcodeInfo`] describing its
//! mnemonic, category and operand layout. The validator, optimizer, assembler
//! and disassembler all walk operands through this table instead of keeping
//! their own per-opcode knowledge.
//!
//! # Operand Layout
//!
//! An instruction is one opcode byte followed by the fields listed in
//! [`OpcodeInfo::fields`]. When the layout contains at least one
//! [`OperandField::Source`], a one-byte *source mask* precedes the fields:
//! bit *i* set means the *i*-th source is a constant byte offset, clear means
//! it is a register.
//!
//! ```text
//! mul (binary kernel):   [op] [mask] [src0:u16] [src1:u16] [dst:u16]
//! inputdata_32bit:       [op] [data_set:u16] [input:u16] [dst:u16]
//! external_func_call:    [op] [index:u8] [operand:u16] * register_count
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Source-mask bit marking source 0 as a constant.
pub const OP0_CONST: u8 = 1 << 0;
/// Source-mask bit marking source 1 as a constant.
pub const OP1_CONST: u8 = 1 << 1;
/// Source-mask bit marking source 2 as a constant.
pub const OP2_CONST: u8 = 1 << 2;

/// Kind of a single encoded operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandField {
    /// u16 register index or constant byte offset, chosen by the source mask.
    Source,
    /// u16 temporary register, read or written.
    Register,
    /// u16 index into the dataset metadata table.
    DataSet,
    /// u16 input column of the preceding dataset.
    InputRegister,
    /// u16 output column of the preceding dataset.
    OutputRegister,
    /// u16 plain integer.
    Literal,
    /// u8 index into the external function table.
    ExternalIndex,
    /// u16 words consumed by the external function named by the preceding index.
    ExternalOperands,
}

impl OperandField {
    /// Encoded width in bytes (per word for [`OperandField::ExternalOperands`]).
    pub const fn width(self) -> usize {
        match self {
            OperandField::ExternalIndex => 1,
            _ => 2,
        }
    }
}

/// Broad grouping used for logging and disassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpcodeCategory {
    /// Float arithmetic, transcendental and comparison kernels.
    Float,
    /// Integer arithmetic and comparison kernels.
    Integer,
    /// Bitwise and boolean-mask kernels.
    Logic,
    /// Conversions between float, int and mask lanes.
    Conversion,
    /// Dataset reads, writes and index acquisition.
    DataSet,
    /// Persistent ID acquisition and release.
    Identity,
    /// Everything else: external calls, stats, termination.
    Control,
}

/// Static metadata for one opcode.
#[derive(Debug)]
pub struct OpcodeInfo {
    /// The opcode described.
    pub opcode: Opcode,
    /// Assembly mnemonic.
    pub name: &'static str,
    /// Grouping.
    pub category: OpcodeCategory,
    /// Operand layout following the opcode (and source mask, if any).
    pub fields: &'static [OperandField],
}

impl OpcodeInfo {
    /// Whether a source mask byte follows the opcode.
    pub fn has_source_mask(&self) -> bool {
        self.source_count() > 0
    }

    /// Number of [`OperandField::Source`] operands.
    pub fn source_count(&self) -> usize {
        self.fields
            .iter()
            .filter(|field| **field == OperandField::Source)
            .count()
    }
}

use OperandField::*;

const UNARY: &[OperandField] = &[Source, Register];
const BINARY: &[OperandField] = &[Source, Source, Register];
const TRINARY: &[OperandField] = &[Source, Source, Source, Register];
const INPUT: &[OperandField] = &[DataSet, InputRegister, Register];
const OUTPUT: &[OperandField] = &[DataSet, Register, Source, OutputRegister];
const ACQUIRE_INDEX: &[OperandField] = &[DataSet, Source, Register];
const EXTERNAL: &[OperandField] = &[ExternalIndex, ExternalOperands];
const SINGLE_REGISTER: &[OperandField] = &[Register];
const LITERAL: &[OperandField] = &[Literal];
const IDENTITY: &[OperandField] = &[DataSet, Register, Register];
const NONE: &[OperandField] = &[];

macro_rules! opcodes {
    ($($variant:ident = $value:literal, $name:literal, $category:ident, $fields:ident;)*) => {
        /// VectorVM instruction.
        ///
        /// Discriminants are the encoded opcode bytes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum Opcode {
            $(
                #[doc = concat!("`", $name, "`")]
                $variant = $value,
            )*
        }

        /// Number of opcodes in the instruction set.
        pub const OPCODE_COUNT: usize = [$($name),*].len();

        static OPCODE_TABLE: [OpcodeInfo; OPCODE_COUNT] = [
            $(
                OpcodeInfo {
                    opcode: Opcode::$variant,
                    name: $name,
                    category: OpcodeCategory::$category,
                    fields: $fields,
                },
            )*
        ];
    };
}

opcodes! {
    Add = 0, "add", Float, BINARY;
    Sub = 1, "sub", Float, BINARY;
    Mul = 2, "mul", Float, BINARY;
    Div = 3, "div", Float, BINARY;
    Mad = 4, "mad", Float, TRINARY;
    Lerp = 5, "lerp", Float, TRINARY;
    Rcp = 6, "rcp", Float, UNARY;
    Rsq = 7, "rsq", Float, UNARY;
    Sqrt = 8, "sqrt", Float, UNARY;
    Neg = 9, "neg", Float, UNARY;
    Abs = 10, "abs", Float, UNARY;
    Exp = 11, "exp", Float, UNARY;
    Exp2 = 12, "exp2", Float, UNARY;
    Log = 13, "log", Float, UNARY;
    Log2 = 14, "log2", Float, UNARY;
    Sin = 15, "sin", Float, UNARY;
    Cos = 16, "cos", Float, UNARY;
    Tan = 17, "tan", Float, UNARY;
    Asin = 18, "asin", Float, UNARY;
    Acos = 19, "acos", Float, UNARY;
    Atan = 20, "atan", Float, UNARY;
    Atan2 = 21, "atan2", Float, BINARY;
    Ceil = 22, "ceil", Float, UNARY;
    Floor = 23, "floor", Float, UNARY;
    Round = 24, "round", Float, UNARY;
    Fmod = 25, "fmod", Float, BINARY;
    Frac = 26, "frac", Float, UNARY;
    Trunc = 27, "trunc", Float, UNARY;
    Clamp = 28, "clamp", Float, TRINARY;
    Min = 29, "min", Float, BINARY;
    Max = 30, "max", Float, BINARY;
    Pow = 31, "pow", Float, BINARY;
    Sign = 32, "sign", Float, UNARY;
    Step = 33, "step", Float, UNARY;
    Random = 34, "random", Float, UNARY;
    Noise = 35, "noise", Float, UNARY;
    Noise2D = 36, "noise2D", Float, BINARY;
    Noise3D = 37, "noise3D", Float, TRINARY;
    CmpLt = 38, "cmplt", Float, BINARY;
    CmpLe = 39, "cmple", Float, BINARY;
    CmpGt = 40, "cmpgt", Float, BINARY;
    CmpGe = 41, "cmpge", Float, BINARY;
    CmpEq = 42, "cmpeq", Float, BINARY;
    CmpNeq = 43, "cmpneq", Float, BINARY;
    Select = 44, "select", Logic, TRINARY;
    AddI = 45, "addi", Integer, BINARY;
    SubI = 46, "subi", Integer, BINARY;
    MulI = 47, "muli", Integer, BINARY;
    DivI = 48, "divi", Integer, BINARY;
    ClampI = 49, "clampi", Integer, TRINARY;
    MinI = 50, "mini", Integer, BINARY;
    MaxI = 51, "maxi", Integer, BINARY;
    AbsI = 52, "absi", Integer, UNARY;
    NegI = 53, "negi", Integer, UNARY;
    SignI = 54, "signi", Integer, UNARY;
    RandomI = 55, "randomi", Integer, UNARY;
    CmpLtI = 56, "cmplti", Integer, BINARY;
    CmpLeI = 57, "cmplei", Integer, BINARY;
    CmpGtI = 58, "cmpgti", Integer, BINARY;
    CmpGeI = 59, "cmpgei", Integer, BINARY;
    CmpEqI = 60, "cmpeqi", Integer, BINARY;
    CmpNeqI = 61, "cmpneqi", Integer, BINARY;
    BitAnd = 62, "bit_and", Logic, BINARY;
    BitOr = 63, "bit_or", Logic, BINARY;
    BitXor = 64, "bit_xor", Logic, BINARY;
    BitNot = 65, "bit_not", Logic, UNARY;
    BitLShift = 66, "bit_lshift", Logic, BINARY;
    BitRShift = 67, "bit_rshift", Logic, BINARY;
    LogicAnd = 68, "logic_and", Logic, BINARY;
    LogicOr = 69, "logic_or", Logic, BINARY;
    LogicXor = 70, "logic_xor", Logic, BINARY;
    LogicNot = 71, "logic_not", Logic, UNARY;
    F2I = 72, "f2i", Conversion, UNARY;
    I2F = 73, "i2f", Conversion, UNARY;
    F2B = 74, "f2b", Conversion, UNARY;
    B2F = 75, "b2f", Conversion, UNARY;
    I2B = 76, "i2b", Conversion, UNARY;
    B2I = 77, "b2i", Conversion, UNARY;
    OutputData32 = 78, "outputdata_32bit", DataSet, OUTPUT;
    InputData32 = 79, "inputdata_32bit", DataSet, INPUT;
    InputDataNoAdvance32 = 80, "inputdata_noadvance_32bit", DataSet, INPUT;
    AcquireIndex = 81, "acquireindex", DataSet, ACQUIRE_INDEX;
    ExternalFuncCall = 82, "external_func_call", Control, EXTERNAL;
    ExecIndex = 83, "exec_index", DataSet, SINGLE_REGISTER;
    EnterStatScope = 84, "enter_stat_scope", Control, LITERAL;
    ExitStatScope = 85, "exit_stat_scope", Control, NONE;
    UpdateId = 86, "update_id", Identity, IDENTITY;
    AcquireId = 87, "acquire_id", Identity, IDENTITY;
    Done = 88, "done", Control, NONE;
}

impl Opcode {
    /// Decode an opcode byte.
    pub fn from_u8(value: u8) -> Option<Opcode> {
        OPCODE_TABLE.get(value as usize).map(|info| info.opcode)
    }

    /// Look up an opcode by its assembly mnemonic.
    pub fn from_name(name: &str) -> Option<Opcode> {
        static BY_NAME: OnceLock<HashMap<&'static str, Opcode>> = OnceLock::new();
        BY_NAME
            .get_or_init(|| {
                OPCODE_TABLE
                    .iter()
                    .map(|info| (info.name, info.opcode))
                    .collect()
            })
            .get(name)
            .copied()
    }

    /// Static metadata for this opcode.
    #[inline]
    pub fn info(self) -> &'static OpcodeInfo {
        &OPCODE_TABLE[self as usize]
    }

    /// Assembly mnemonic.
    #[inline]
    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// All opcodes in encoding order.
    pub fn all() -> impl Iterator<Item = Opcode> {
        OPCODE_TABLE.iter().map(|info| info.opcode)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
