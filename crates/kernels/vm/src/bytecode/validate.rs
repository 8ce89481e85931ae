//! Up-front bytecode validation.
//!
//! The scheduler walks the raw stream once per invocation before any chunk
//! runs. After that, kernels can index registers, constants and dataset
//! columns without re-checking, and an integrity failure never leaves half
//! the chunks executed.

use tracing::error;

use crate::bytecode::decoder::ByteCursor;
use crate::bytecode::opcode::{Opcode, OperandField};
use crate::bytecode::{EXTERNAL_REGISTER_BIT, EXTERNAL_UNUSED_OPERAND};
use crate::error::{Error, Result};

/// Column counts of one bound dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataSetShape {
    /// Input columns.
    pub inputs: usize,
    /// Output columns.
    pub outputs: usize,
}

/// What an invocation binds, for range checks.
#[derive(Debug, Clone, Copy)]
pub struct ValidationLimits<'a> {
    /// Temporary registers in the register file.
    pub num_registers: usize,
    /// Constant table length in bytes.
    pub constant_len: usize,
    /// Shapes of the bound datasets.
    pub data_sets: &'a [DataSetShape],
    /// Operand word count of each bound external function.
    pub external_register_counts: &'a [usize],
}

/// Facts gathered while validating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    /// Instructions up to and including `done`.
    pub instructions: usize,
    /// Byte length up to and including `done`.
    pub len: usize,
}

/// Validate a raw instruction stream against what an invocation binds.
///
/// # Errors
///
/// The first integrity or binding problem found, in stream order.
pub fn validate(byte_code: &[u8], limits: &ValidationLimits<'_>) -> Result<StreamSummary> {
    let result = walk(byte_code, limits);
    if let Err(err) = &result {
        error!(%err, "rejected vector vm byte code");
    }
    result
}

fn walk(byte_code: &[u8], limits: &ValidationLimits<'_>) -> Result<StreamSummary> {
    let mut cursor = ByteCursor::new(byte_code);
    let mut instructions = 0;

    loop {
        let opcode = match cursor.read_opcode() {
            Err(Error::Truncated { .. }) => return Err(Error::MissingDone),
            other => other?,
        };
        instructions += 1;
        if opcode == Opcode::Done {
            return Ok(StreamSummary {
                instructions,
                len: cursor.position(),
            });
        }

        let info = opcode.info();
        let mask = if info.has_source_mask() {
            cursor.try_read_u8()?
        } else {
            0
        };

        let mut source_index = 0;
        let mut data_set: Option<u16> = None;
        let mut external: Option<u8> = None;

        for field in info.fields {
            match field {
                OperandField::Source => {
                    let value = cursor.try_read_u16()?;
                    if mask & (1 << source_index) != 0 {
                        check_constant(value, limits)?;
                    } else {
                        check_register(value, limits)?;
                    }
                    source_index += 1;
                }
                OperandField::Register => {
                    check_register(cursor.try_read_u16()?, limits)?;
                }
                OperandField::DataSet => {
                    let index = cursor.try_read_u16()?;
                    if index as usize >= limits.data_sets.len() {
                        return Err(Error::DataSetOutOfRange {
                            data_set: index,
                            available: limits.data_sets.len(),
                        });
                    }
                    data_set = Some(index);
                }
                OperandField::InputRegister | OperandField::OutputRegister => {
                    let register = cursor.try_read_u16()?;
                    let index = data_set.unwrap_or_default();
                    let shape = limits
                        .data_sets
                        .get(index as usize)
                        .copied()
                        .unwrap_or_default();
                    let (kind, available) = if *field == OperandField::InputRegister {
                        ("input", shape.inputs)
                    } else {
                        ("output", shape.outputs)
                    };
                    if register as usize >= available {
                        return Err(Error::DataSetRegisterOutOfRange {
                            data_set: index,
                            register,
                            kind,
                            available,
                        });
                    }
                }
                OperandField::Literal => {
                    cursor.try_read_u16()?;
                }
                OperandField::ExternalIndex => {
                    let index = cursor.try_read_u8()?;
                    if index as usize >= limits.external_register_counts.len() {
                        return Err(Error::ExternalFunctionOutOfRange {
                            index,
                            available: limits.external_register_counts.len(),
                        });
                    }
                    external = Some(index);
                }
                OperandField::ExternalOperands => {
                    let count = external
                        .and_then(|index| limits.external_register_counts.get(index as usize))
                        .copied()
                        .unwrap_or_default();
                    for _ in 0..count {
                        let word = cursor.try_read_u16()?;
                        if word == EXTERNAL_UNUSED_OPERAND {
                            continue;
                        }
                        if word & EXTERNAL_REGISTER_BIT != 0 {
                            check_register(word & !EXTERNAL_REGISTER_BIT, limits)?;
                        } else {
                            check_constant(word, limits)?;
                        }
                    }
                }
            }
        }
    }
}

fn check_register(register: u16, limits: &ValidationLimits<'_>) -> Result<()> {
    if (register as usize) < limits.num_registers {
        Ok(())
    } else {
        Err(Error::RegisterOutOfRange {
            register,
            available: limits.num_registers,
        })
    }
}

fn check_constant(offset: u16, limits: &ValidationLimits<'_>) -> Result<()> {
    if offset as usize + 4 <= limits.constant_len {
        Ok(())
    } else {
        Err(Error::ConstantOutOfRange {
            offset,
            len: limits.constant_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::builder::{Operand, ProgramBuilder};

    const SHAPES: &[DataSetShape] = &[DataSetShape {
        inputs: 1,
        outputs: 1,
    }];

    fn limits(num_registers: usize, constant_len: usize) -> ValidationLimits<'static> {
        ValidationLimits {
            num_registers,
            constant_len,
            data_sets: SHAPES,
            external_register_counts: &[2],
        }
    }

    #[test]
    fn accepts_a_well_formed_stream() {
        let mut builder = ProgramBuilder::new();
        let two = builder.constant_f32(2.0);
        builder.input(0, 0, 0);
        builder.mul(Operand::Register(0), two, 1);
        builder.done();
        let program = builder.finish();

        let summary = validate(&program.byte_code, &limits(2, program.constants.len()))
            .expect("valid stream");
        assert_eq!(summary.instructions, 3);
        assert_eq!(summary.len, program.byte_code.len());
    }

    #[test]
    fn missing_done_is_an_integrity_error() {
        let mut builder = ProgramBuilder::new();
        builder.exec_index(0);
        let program = builder.finish();
        let err = validate(&program.byte_code, &limits(1, 0)).unwrap_err();
        assert_eq!(err, Error::MissingDone);
        assert!(err.is_integrity_error());
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let err = validate(&[0xf0], &limits(1, 0)).unwrap_err();
        assert_eq!(
            err,
            Error::UnknownOpcode {
                opcode: 0xf0,
                offset: 0
            }
        );
    }

    #[test]
    fn truncated_operands_are_rejected() {
        let err = validate(&[Opcode::ExecIndex as u8, 0x00], &limits(1, 0)).unwrap_err();
        assert_eq!(err, Error::Truncated { offset: 1 });
    }

    #[test]
    fn out_of_range_bindings_are_rejected() {
        let mut builder = ProgramBuilder::new();
        builder.exec_index(4);
        builder.done();
        assert!(matches!(
            validate(&builder.finish().byte_code, &limits(2, 0)),
            Err(Error::RegisterOutOfRange { register: 4, .. })
        ));

        let mut builder = ProgramBuilder::new();
        builder.abs(Operand::Constant(8), 0);
        builder.done();
        assert!(matches!(
            validate(&builder.finish().byte_code, &limits(1, 8)),
            Err(Error::ConstantOutOfRange { offset: 8, len: 8 })
        ));

        let mut builder = ProgramBuilder::new();
        builder.input(0, 3, 0);
        builder.done();
        assert!(matches!(
            validate(&builder.finish().byte_code, &limits(1, 0)),
            Err(Error::DataSetRegisterOutOfRange { kind: "input", register: 3, .. })
        ));

        let mut builder = ProgramBuilder::new();
        builder.input(2, 0, 0);
        builder.done();
        assert!(matches!(
            validate(&builder.finish().byte_code, &limits(1, 0)),
            Err(Error::DataSetOutOfRange { data_set: 2, .. })
        ));

        let mut builder = ProgramBuilder::new();
        builder.external_call(1, &[]);
        builder.done();
        assert!(matches!(
            validate(&builder.finish().byte_code, &limits(1, 0)),
            Err(Error::ExternalFunctionOutOfRange { index: 1, .. })
        ));
    }

    #[test]
    fn external_operands_use_the_declared_count() {
        let mut builder = ProgramBuilder::new();
        builder.external_call(0, &[Operand::Register(1), Operand::Unused]);
        builder.done();
        let program = builder.finish();
        assert!(validate(&program.byte_code, &limits(2, 0)).is_ok());
        assert!(matches!(
            validate(&program.byte_code, &limits(1, 0)),
            Err(Error::RegisterOutOfRange { register: 1, .. })
        ));
    }
}
