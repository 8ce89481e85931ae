//! Text form of the instruction stream.
//!
//! One instruction per line, operands in encoding order:
//!
//! ```text
//! # comment
//! inputdata_32bit 0, 0, r0
//! mul r0, c0, r1
//! acquireindex 0, c1, r2
//! outputdata_32bit 0, r2, r1, 0
//! external_func_call 0, r1, c2, _
//! done
//! ```
//!
//! | Token | Operand |
//! |---|---|
//! | `rN` | register N |
//! | `cN` | constant slot N (byte offset `4 * N`) |
//! | `@N` | constant at byte offset N |
//! | `N` | plain integer (dataset, column, scope, function index) |
//! | `_` | unused external output |
//!
//! Source masks are derived from the operands and never written out.

use std::fmt::Write as _;

use tracing::instrument;

use crate::bytecode::builder::{Operand, ProgramBuilder};
use crate::bytecode::decoder::ByteCursor;
use crate::bytecode::opcode::{Opcode, OperandField};
use crate::bytecode::{EXTERNAL_REGISTER_BIT, EXTERNAL_UNUSED_OPERAND};
use crate::error::{Error, Result};

/// Assemble text into raw bytecode.
///
/// # Errors
///
/// [`Error::Assembly`] naming the first bad line.
#[instrument(skip_all, fields(lines = source.lines().count()))]
pub fn assemble(source: &str) -> Result<Vec<u8>> {
    let mut builder = ProgramBuilder::new();
    for (number, raw) in source.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let fail = |message: String| Error::Assembly {
            line: number + 1,
            message,
        };

        let (mnemonic, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let opcode =
            Opcode::from_name(mnemonic).ok_or_else(|| fail(format!("unknown mnemonic `{mnemonic}`")))?;
        let operands = rest
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| parse_operand(token).ok_or_else(|| fail(format!("bad operand `{token}`"))))
            .collect::<Result<Vec<_>>>()?;

        check_layout(opcode, &operands).map_err(fail)?;
        builder.emit(opcode, &operands);
    }
    Ok(builder.finish().byte_code)
}

fn parse_operand(token: &str) -> Option<Operand> {
    if token == "_" {
        return Some(Operand::Unused);
    }
    if let Some(register) = token.strip_prefix('r') {
        return register.parse().ok().map(Operand::Register);
    }
    if let Some(slot) = token.strip_prefix('c') {
        let slot: u16 = slot.parse().ok()?;
        return slot.checked_mul(4).map(Operand::Constant);
    }
    if let Some(offset) = token.strip_prefix('@') {
        return offset.parse().ok().map(Operand::Constant);
    }
    token.parse().ok().map(Operand::Literal)
}

fn check_layout(opcode: Opcode, operands: &[Operand]) -> std::result::Result<(), String> {
    let fields = opcode.info().fields;
    let external = fields.contains(&OperandField::ExternalOperands);
    let fixed = fields.len() - usize::from(external);
    if operands.len() < fixed || (!external && operands.len() > fixed) {
        return Err(format!(
            "{opcode} takes {}{fixed} operands, got {}",
            if external { "at least " } else { "" },
            operands.len()
        ));
    }

    for (position, (field, operand)) in fields.iter().zip(operands).enumerate() {
        let fits = match field {
            OperandField::Source => matches!(operand, Operand::Register(_) | Operand::Constant(_)),
            OperandField::Register => matches!(operand, Operand::Register(_)),
            OperandField::ExternalIndex => {
                matches!(operand, Operand::Literal(value) if *value <= u16::from(u8::MAX))
            }
            OperandField::ExternalOperands => true,
            _ => matches!(operand, Operand::Literal(_)),
        };
        if !fits {
            return Err(format!("operand {} does not fit a {field:?} field", position + 1));
        }
    }

    if external {
        for operand in &operands[fixed..] {
            match operand {
                Operand::Literal(_) => {
                    return Err("external operands must be registers, constants or `_`".to_string());
                }
                Operand::Register(value) | Operand::Constant(value)
                    if *value >= EXTERNAL_REGISTER_BIT =>
                {
                    return Err(format!("external operand {value} does not fit 15 bits"));
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Print raw bytecode in the text form [`assemble`] reads.
///
/// Stops after the first `done`.
///
/// # Errors
///
/// Integrity errors from decoding, or [`Error::ExternalFunctionOutOfRange`]
/// when a call names a function missing from `external_register_counts`.
pub fn disassemble(byte_code: &[u8], external_register_counts: &[usize]) -> Result<String> {
    let mut cursor = ByteCursor::new(byte_code);
    let mut text = String::new();

    loop {
        let opcode = match cursor.read_opcode() {
            Err(Error::Truncated { .. }) => return Err(Error::MissingDone),
            other => other?,
        };
        let info = opcode.info();
        let mask = if info.has_source_mask() {
            cursor.try_read_u8()?
        } else {
            0
        };

        let mut tokens = Vec::with_capacity(info.fields.len());
        let mut source_index = 0;
        let mut external = None;
        for field in info.fields {
            match field {
                OperandField::Source => {
                    let value = cursor.try_read_u16()?;
                    tokens.push(if mask & (1 << source_index) != 0 {
                        constant_token(value)
                    } else {
                        format!("r{value}")
                    });
                    source_index += 1;
                }
                OperandField::Register => tokens.push(format!("r{}", cursor.try_read_u16()?)),
                OperandField::ExternalIndex => {
                    let index = cursor.try_read_u8()?;
                    external = Some(index);
                    tokens.push(index.to_string());
                }
                OperandField::ExternalOperands => {
                    let index = external.unwrap_or_default();
                    let count = *external_register_counts.get(index as usize).ok_or(
                        Error::ExternalFunctionOutOfRange {
                            index,
                            available: external_register_counts.len(),
                        },
                    )?;
                    for _ in 0..count {
                        let word = cursor.try_read_u16()?;
                        tokens.push(if word == EXTERNAL_UNUSED_OPERAND {
                            "_".to_string()
                        } else if word & EXTERNAL_REGISTER_BIT != 0 {
                            format!("r{}", word & !EXTERNAL_REGISTER_BIT)
                        } else {
                            constant_token(word)
                        });
                    }
                }
                _ => tokens.push(cursor.try_read_u16()?.to_string()),
            }
        }

        text.push_str(opcode.name());
        if !tokens.is_empty() {
            let _ = write!(text, " {}", tokens.join(", "));
        }
        text.push('\n');

        if opcode == Opcode::Done {
            return Ok(text);
        }
    }
}

fn constant_token(offset: u16) -> String {
    if offset % 4 == 0 {
        format!("c{}", offset / 4)
    } else {
        format!("@{offset}")
    }
}
