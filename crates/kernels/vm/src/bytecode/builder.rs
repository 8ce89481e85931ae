//! Programmatic bytecode construction.
//!
//! [`ProgramBuilder`] appends instructions and constants and computes every
//! source mask itself. The assembler is a thin text front end over it.

use crate::bytecode::opcode::{Opcode, OperandField};
use crate::bytecode::{EXTERNAL_REGISTER_BIT, EXTERNAL_UNUSED_OPERAND};

/// One operand handed to [`ProgramBuilder::emit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Temporary register index.
    Register(u16),
    /// Byte offset into the constant table.
    Constant(u16),
    /// Plain integer: dataset, column, scope or function index.
    Literal(u16),
    /// Unused external-function output slot.
    Unused,
}

/// Bytecode plus the constant table it reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    /// Raw instruction stream.
    pub byte_code: Vec<u8>,
    /// Little-endian 32-bit constants.
    pub constants: Vec<u8>,
}

/// Appends instructions and constants.
#[derive(Debug, Clone, Default)]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw constant bits and return an operand naming them.
    pub fn constant_bits(&mut self, bits: u32) -> Operand {
        let offset = self.program.constants.len() as u16;
        self.program.constants.extend_from_slice(&bits.to_le_bytes());
        Operand::Constant(offset)
    }

    /// Append a float constant.
    pub fn constant_f32(&mut self, value: f32) -> Operand {
        self.constant_bits(value.to_bits())
    }

    /// Append an integer constant.
    pub fn constant_i32(&mut self, value: i32) -> Operand {
        self.constant_bits(value as u32)
    }

    /// Current length of the instruction stream.
    pub fn len(&self) -> usize {
        self.program.byte_code.len()
    }

    /// Whether no instruction has been emitted.
    pub fn is_empty(&self) -> bool {
        self.program.byte_code.is_empty()
    }

    /// Append one instruction.
    ///
    /// Operands are given in layout order. For `external_func_call`, the
    /// function index is a [`Operand::Literal`] and every remaining operand
    /// becomes one operand word.
    ///
    /// # Panics
    ///
    /// If the operands do not fit the opcode's layout.
    pub fn emit(&mut self, opcode: Opcode, operands: &[Operand]) -> &mut Self {
        let info = opcode.info();
        let mut mask = 0u8;
        let mut encoded = Vec::with_capacity(operands.len() * 2);
        let mut remaining = operands.iter();
        let mut source_index = 0;

        for field in info.fields {
            if *field == OperandField::ExternalOperands {
                for operand in remaining.by_ref() {
                    let word = match *operand {
                        Operand::Register(register) => register | EXTERNAL_REGISTER_BIT,
                        Operand::Constant(offset) => offset,
                        Operand::Unused => EXTERNAL_UNUSED_OPERAND,
                        Operand::Literal(_) => {
                            panic!("{opcode} operands must be registers, constants or unused")
                        }
                    };
                    encoded.extend_from_slice(&word.to_le_bytes());
                }
                continue;
            }

            let operand = *remaining
                .next()
                .unwrap_or_else(|| panic!("{opcode} expects {} operands", info.fields.len()));
            match (field, operand) {
                (OperandField::Source, Operand::Register(value)) => {
                    encoded.extend_from_slice(&value.to_le_bytes());
                    source_index += 1;
                }
                (OperandField::Source, Operand::Constant(value)) => {
                    mask |= 1 << source_index;
                    encoded.extend_from_slice(&value.to_le_bytes());
                    source_index += 1;
                }
                (OperandField::ExternalIndex, Operand::Literal(value)) => {
                    let index = u8::try_from(value)
                        .unwrap_or_else(|_| panic!("external function index {value} exceeds u8"));
                    encoded.push(index);
                }
                (
                    OperandField::Register
                    | OperandField::DataSet
                    | OperandField::InputRegister
                    | OperandField::OutputRegister
                    | OperandField::Literal,
                    Operand::Register(value) | Operand::Literal(value),
                ) => encoded.extend_from_slice(&value.to_le_bytes()),
                (field, operand) => panic!("{opcode}: {operand:?} does not fit a {field:?} field"),
            }
        }
        assert!(
            remaining.next().is_none(),
            "{opcode} given too many operands"
        );

        self.program.byte_code.push(opcode as u8);
        if info.has_source_mask() {
            self.program.byte_code.push(mask);
        }
        self.program.byte_code.extend_from_slice(&encoded);
        self
    }

    /// `dst = op(a)` for any unary kernel.
    pub fn unary(&mut self, opcode: Opcode, a: Operand, dst: u16) -> &mut Self {
        self.emit(opcode, &[a, Operand::Register(dst)])
    }

    /// `dst = op(a, b)` for any binary kernel.
    pub fn binary(&mut self, opcode: Opcode, a: Operand, b: Operand, dst: u16) -> &mut Self {
        self.emit(opcode, &[a, b, Operand::Register(dst)])
    }

    /// `dst = op(a, b, c)` for any trinary kernel.
    pub fn trinary(
        &mut self,
        opcode: Opcode,
        a: Operand,
        b: Operand,
        c: Operand,
        dst: u16,
    ) -> &mut Self {
        self.emit(opcode, &[a, b, c, Operand::Register(dst)])
    }

    /// `dst = a + b`.
    pub fn add(&mut self, a: Operand, b: Operand, dst: u16) -> &mut Self {
        self.binary(Opcode::Add, a, b, dst)
    }

    /// `dst = a * b`.
    pub fn mul(&mut self, a: Operand, b: Operand, dst: u16) -> &mut Self {
        self.binary(Opcode::Mul, a, b, dst)
    }

    /// `dst = a / b`.
    pub fn div(&mut self, a: Operand, b: Operand, dst: u16) -> &mut Self {
        self.binary(Opcode::Div, a, b, dst)
    }

    /// `dst = |a|`.
    pub fn abs(&mut self, a: Operand, dst: u16) -> &mut Self {
        self.unary(Opcode::Abs, a, dst)
    }

    /// Read input column `input` of `data_set` at each instance.
    pub fn input(&mut self, data_set: u16, input: u16, dst: u16) -> &mut Self {
        self.emit(
            Opcode::InputData32,
            &[
                Operand::Literal(data_set),
                Operand::Literal(input),
                Operand::Register(dst),
            ],
        )
    }

    /// Broadcast element 0 of input column `input`.
    pub fn input_no_advance(&mut self, data_set: u16, input: u16, dst: u16) -> &mut Self {
        self.emit(
            Opcode::InputDataNoAdvance32,
            &[
                Operand::Literal(data_set),
                Operand::Literal(input),
                Operand::Register(dst),
            ],
        )
    }

    /// Write `value` to output column `output` at the indices in `index`.
    pub fn output(&mut self, data_set: u16, index: u16, value: Operand, output: u16) -> &mut Self {
        self.emit(
            Opcode::OutputData32,
            &[
                Operand::Literal(data_set),
                Operand::Register(index),
                value,
                Operand::Literal(output),
            ],
        )
    }

    /// Allocate one output index per instance whose `valid` lane is set.
    pub fn acquire_index(&mut self, data_set: u16, valid: Operand, dst: u16) -> &mut Self {
        self.emit(
            Opcode::AcquireIndex,
            &[Operand::Literal(data_set), valid, Operand::Register(dst)],
        )
    }

    /// Write each lane's instance index.
    pub fn exec_index(&mut self, dst: u16) -> &mut Self {
        self.emit(Opcode::ExecIndex, &[Operand::Register(dst)])
    }

    /// Call external function `index` with the given operand words.
    pub fn external_call(&mut self, index: u8, operands: &[Operand]) -> &mut Self {
        let mut all = Vec::with_capacity(operands.len() + 1);
        all.push(Operand::Literal(u16::from(index)));
        all.extend_from_slice(operands);
        self.emit(Opcode::ExternalFuncCall, &all)
    }

    /// Open a timed scope.
    pub fn enter_stat_scope(&mut self, scope: u16) -> &mut Self {
        self.emit(Opcode::EnterStatScope, &[Operand::Literal(scope)])
    }

    /// Close the innermost timed scope.
    pub fn exit_stat_scope(&mut self) -> &mut Self {
        self.emit(Opcode::ExitStatScope, &[])
    }

    /// Pop one persistent ID per instance.
    pub fn acquire_id(&mut self, data_set: u16, id: u16, tag: u16) -> &mut Self {
        self.emit(
            Opcode::AcquireId,
            &[
                Operand::Literal(data_set),
                Operand::Register(id),
                Operand::Register(tag),
            ],
        )
    }

    /// Commit or release each instance's ID.
    pub fn update_id(&mut self, data_set: u16, id: u16, index: u16) -> &mut Self {
        self.emit(
            Opcode::UpdateId,
            &[
                Operand::Literal(data_set),
                Operand::Register(id),
                Operand::Register(index),
            ],
        )
    }

    /// Terminate the program.
    pub fn done(&mut self) -> &mut Self {
        self.emit(Opcode::Done, &[])
    }

    /// Take the finished program.
    pub fn finish(self) -> Program {
        self.program
    }
}
