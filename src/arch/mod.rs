//! Per-architecture instruction classifiers and their registry.
//!
//! All architecture-specific knowledge lives here. The rest of the
//! pipeline sees a [`Instruction`] with five predicates, a byte size and
//! statically resolvable target addresses, and obtains one through an
//! [`InstructionDecoder`] selected by architecture name.

pub mod armv5;
pub mod avr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::disasm::DisasmInstruction;
use crate::error::Result;

pub use armv5::ArmV5Instruction;
pub use avr::AvrInstruction;

/// One classified instruction. A variant per supported architecture;
/// shared behavior dispatches by match instead of virtual calls.
#[derive(Debug, Clone)]
pub enum Instruction {
    Avr(AvrInstruction),
    ArmV5(ArmV5Instruction),
}

macro_rules! delegate {
    ($self:ident, $insn:ident => $body:expr) => {
        match $self {
            Instruction::Avr($insn) => $body,
            Instruction::ArmV5($insn) => $body,
        }
    };
}

impl Instruction {
    /// Conditional one-instruction skip of the following instruction.
    pub fn is_skip(&self) -> bool {
        delegate!(self, i => i.is_skip())
    }

    /// Unconditional transfer with no return address saved.
    pub fn is_jump(&self) -> bool {
        delegate!(self, i => i.is_jump())
    }

    /// Conditional transfer.
    pub fn is_branch(&self) -> bool {
        delegate!(self, i => i.is_branch())
    }

    /// Transfer that saves a return address.
    pub fn is_call(&self) -> bool {
        delegate!(self, i => i.is_call())
    }

    /// Transfer to a saved or implicit return address.
    pub fn is_return(&self) -> bool {
        delegate!(self, i => i.is_return())
    }

    /// Statically resolvable target addresses, given the instruction's own
    /// address. Empty for indirect control flow.
    pub fn targets(&self, current_addr: u64) -> Vec<u64> {
        delegate!(self, i => i.targets(current_addr))
    }

    /// Instruction size in bytes, derived from the opcode family.
    pub fn size(&self) -> u64 {
        delegate!(self, i => i.size())
    }

    /// The unit by which the program counter advances per instruction.
    pub fn word_size(&self) -> u64 {
        delegate!(self, i => i.word_size())
    }

    /// Normalized (uppercase) mnemonic.
    pub fn mnemonic(&self) -> &str {
        delegate!(self, i => i.mnemonic())
    }

    pub fn operands(&self) -> &[String] {
        delegate!(self, i => i.operands())
    }
}

/// Architecture selector produced by the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionDecoder {
    Avr,
    ArmV5,
}

impl InstructionDecoder {
    /// Classify one disassembled instruction.
    ///
    /// In ignore-errors mode unknown mnemonics and unparsable text
    /// degrade to a NOP classification with a warning instead of failing.
    pub fn parse(&self, disasm: &DisasmInstruction, ignore_errors: bool) -> Result<Instruction> {
        match self {
            InstructionDecoder::Avr => {
                AvrInstruction::parse(disasm, ignore_errors).map(Instruction::Avr)
            }
            InstructionDecoder::ArmV5 => {
                ArmV5Instruction::parse(disasm, ignore_errors).map(Instruction::ArmV5)
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InstructionDecoder::Avr => "avr",
            InstructionDecoder::ArmV5 => "armv5",
        }
    }
}

/// Select a classifier for the given architecture name.
pub fn for_arch(name: &str) -> Option<InstructionDecoder> {
    match name.to_ascii_lowercase().as_str() {
        "avr" => Some(InstructionDecoder::Avr),
        "armv5" => Some(InstructionDecoder::ArmV5),
        _ => None,
    }
}

/// Enumerate supported architecture names. AVR is the well-supported
/// target; ARMv5 is experimental.
pub fn list() -> &'static [&'static str] {
    &["avr", "armv5"]
}

static TEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\.?([a-zA-Z]+)(?:\s+([\d\w\.\+\-]+)(?:,\s+([\d\w\.\+\-]+))?)?").unwrap()
});

static RELATIVE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.([\+\-][0-9]+)").unwrap());

/// Shared parsing preamble: split the mnemonic (uppercased, leading dot of
/// pseudo mnemonics dropped) and up to two comma-separated operands out of
/// a disassembly text field.
pub(crate) fn parse_text(text: &str) -> Option<(String, Vec<String>)> {
    let caps = TEXT_RE.captures(text)?;
    let mnemonic = caps.get(1)?.as_str().to_uppercase();
    let mut operands = Vec::new();
    if let Some(op) = caps.get(2) {
        operands.push(op.as_str().to_string());
        if let Some(op) = caps.get(3) {
            operands.push(op.as_str().to_string());
        }
    }
    Some((mnemonic, operands))
}

/// Parse an absolute hex target operand (`0x96` or bare `96`).
pub(crate) fn absolute_target(operand: &str) -> Option<u64> {
    let hex = operand
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    u64::from_str_radix(hex, 16).ok()
}

/// Parse a PC-relative operand of the shape `.+N` / `.-N`, returning the
/// signed offset.
pub(crate) fn relative_offset(operand: &str) -> Option<i64> {
    let caps = RELATIVE_RE.captures(operand)?;
    caps.get(1)?.as_str().parse::<i64>().ok()
}
