//! ARMv5TE instruction classifier (32-bit ARM + 16-bit Thumb-1).
//!
//! Experimental. On ARM there is conceptually no difference between
//! calls, jumps, branches and returns; the classification below follows
//! the usage conventions instead: BL/BLX are calls, `b lr`/`bx lr` and
//! `pop {..,pc}` are returns, any other PC-writing instruction is a jump
//! when unconditional and a branch when a condition suffix is present.
//!
//! Condition-suffix stripping precedes the mnemonic-table lookup and is
//! known to be ambiguous (`movs` parses as MO + VS); callers must not
//! assume completeness.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::arch::absolute_target;
use crate::core::disasm::DisasmInstruction;
use crate::error::{BincfgError, Result};

/// ARMv5 mnemonic base forms (condition suffix stripped). `Data` marks
/// inline data in the instruction stream, e.g. literal-pool words
/// rendered as `<UNDEFINED>` by the disassembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[rustfmt::skip]
pub enum ArmV5Mnemonic {
    // branching
    B, Bl, Blx, Bx,
    // data processing
    Adc, Add, Sbc, Sub, And, Eor, Mov, Mvn, Orr, Rsb, Rsc,
    Bic, Cmn, Cmp, Teq, Tst,
    // multiply
    Mla, Mul, Smull, Umlal, Umull,
    // status register
    Mrs, Msr, Cps,
    // load/store
    Ldr, Ldrb, Ldrbt, Ldrh, Ldrsb, Ldrsh, Ldrt,
    Str, Strb, Strbt, Strh, Strt,
    Ldm, Ldmda, Ldmdb, Ldmia, Ldmib, Stm, Swp, Swpb,
    // co-processor
    Cdp, Cdp2, Ldc, Ldc2, Mcr, Mcr2, Mrc, Mrc2, Stc, Stc2,
    // exception-generating
    Bkpt, Swi,
    // other
    Clz, Nop,
    // Thumb-only base forms
    Asr, Lsl, Lsr, Neg, Ror, Pop, Push, Stmia,
    // inline data / padding
    Data,
}

fn lookup(base: &str) -> Option<ArmV5Mnemonic> {
    use ArmV5Mnemonic::*;
    Some(match base {
        "B" => B, "BL" => Bl, "BLX" => Blx, "BX" => Bx,
        "ADC" => Adc, "ADD" => Add, "SBC" => Sbc, "SUB" => Sub,
        "AND" => And, "EOR" => Eor, "MOV" => Mov, "MVN" => Mvn,
        "ORR" => Orr, "RSB" => Rsb, "RSC" => Rsc, "BIC" => Bic,
        "CMN" => Cmn, "CMP" => Cmp, "TEQ" => Teq, "TST" => Tst,
        "MLA" => Mla, "MUL" => Mul, "SMULL" => Smull, "UMLAL" => Umlal,
        "UMULL" => Umull, "MRS" => Mrs, "MSR" => Msr, "CPS" => Cps,
        "LDR" => Ldr, "LDRB" => Ldrb, "LDRBT" => Ldrbt, "LDRH" => Ldrh,
        "LDRSB" => Ldrsb, "LDRSH" => Ldrsh, "LDRT" => Ldrt,
        "STR" => Str, "STRB" => Strb, "STRBT" => Strbt, "STRH" => Strh,
        "STRT" => Strt, "LDM" => Ldm, "LDMDA" => Ldmda, "LDMDB" => Ldmdb,
        "LDMIA" => Ldmia, "LDMIB" => Ldmib, "STM" => Stm,
        "SWP" => Swp, "SWPB" => Swpb,
        "CDP" => Cdp, "CDP2" => Cdp2, "LDC" => Ldc, "LDC2" => Ldc2,
        "MCR" => Mcr, "MCR2" => Mcr2, "MRC" => Mrc, "MRC2" => Mrc2,
        "STC" => Stc, "STC2" => Stc2, "BKPT" => Bkpt, "SWI" => Swi,
        "CLZ" => Clz, "NOP" => Nop,
        "ASR" => Asr, "LSL" => Lsl, "LSR" => Lsr, "NEG" => Neg,
        "ROR" => Ror, "POP" => Pop, "PUSH" => Push, "STMIA" => Stmia,
        _ => return None,
    })
}

// Longest-prefix matching is not always correct ("blt.n" is B, not BL),
// so conditions are chomped off before the table lookup. Still ambiguous
// for mnemonics whose tail looks like a condition ("movs" -> MO + VS).
static MNEMO_PARTS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\w+?)(EQ|NE|CS|HS|CC|LO|MI|PL|VS|VC|HI|LS|GE|LT|GT|LE)?(\.\w)?$").unwrap()
});

static HEX_LITERAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[0-9a-fA-F]+\s*$").unwrap());

/// Split an ARM operand field at top-level commas, keeping `[...]` and
/// `{...}` groups (with their `!`/`^` suffixes) intact.
fn split_operands(text: &str) -> Vec<String> {
    let mut operands = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                let op = current.trim();
                if !op.is_empty() {
                    operands.push(op.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    let op = current.trim();
    if !op.is_empty() {
        operands.push(op.to_string());
    }
    operands
}

/// One classified ARMv5 instruction.
#[derive(Debug, Clone)]
pub struct ArmV5Instruction {
    mnemonic: ArmV5Mnemonic,
    text_mnemonic: String,
    condition: Option<String>,
    operands: Vec<String>,
    raw: u64,
}

impl ArmV5Instruction {
    pub fn parse(disasm: &DisasmInstruction, ignore_errors: bool) -> Result<Self> {
        if disasm.comment.trim_start().starts_with("<UNDEFINED>") {
            // Inline data, not a real instruction.
            return Ok(Self {
                mnemonic: ArmV5Mnemonic::Data,
                text_mnemonic: "NOP".to_string(),
                condition: None,
                operands: Vec::new(),
                raw: disasm.raw,
            });
        }

        let text = disasm.text.trim();
        let (token, rest) = match text.split_once(char::is_whitespace) {
            Some((token, rest)) => (token, rest),
            None => (text, ""),
        };
        let text_mnemonic = token.to_uppercase();

        let nop = |text_mnemonic: String| Self {
            mnemonic: ArmV5Mnemonic::Nop,
            text_mnemonic,
            condition: None,
            operands: Vec::new(),
            raw: disasm.raw,
        };

        let Some(caps) = MNEMO_PARTS_RE.captures(&text_mnemonic) else {
            if ignore_errors {
                warn!(text = %disasm.text, "unparsable ARMv5 mnemonic treated as NOP");
                return Ok(nop(text_mnemonic));
            }
            return Err(BincfgError::ParseError(format!(
                "cannot decompose ARMv5 mnemonic in: {}",
                disasm.text
            )));
        };

        let base = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let condition = caps.get(2).map(|m| m.as_str().to_string());

        let Some(mnemonic) = lookup(base) else {
            if ignore_errors {
                warn!(mnemonic = %base, text = %disasm.text,
                      "unknown ARMv5 mnemonic treated as NOP");
                return Ok(nop(text_mnemonic));
            }
            return Err(BincfgError::UnknownMnemonic {
                mnemonic: base.to_string(),
                text: disasm.text.clone(),
            });
        };

        Ok(Self {
            mnemonic,
            text_mnemonic,
            condition,
            operands: split_operands(rest),
            raw: disasm.raw,
        })
    }

    pub fn arm_mnemonic(&self) -> ArmV5Mnemonic {
        self.mnemonic
    }

    pub fn mnemonic(&self) -> &str {
        &self.text_mnemonic
    }

    pub fn operands(&self) -> &[String] {
        &self.operands
    }

    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref()
    }

    fn may_write_register(&self) -> bool {
        use ArmV5Mnemonic::*;
        matches!(
            self.mnemonic,
            Ldr | Ldrb | Ldrbt | Ldrh | Ldrsb | Ldrsh | Ldrt | Str | Strb | Strbt | Strh
                | Strt | Ldm | Ldmda | Ldmdb | Ldmia | Ldmib | Stm | Swp | Swpb
                | Adc | Add | Sbc | Sub | And | Eor | Mov | Mvn | Orr | Rsb | Rsc
                | Asr | Lsl | Lsr | Neg | Ror | Pop | Push | Stmia
        )
    }

    /// Whether the instruction could alter the PC directly, besides
    /// B/BL/BLX/BX. Overapproximates by scanning the first operand.
    fn may_write_pc(&self) -> bool {
        if !self.may_write_register() {
            return false;
        }
        self.operands
            .first()
            .is_some_and(|op| op.contains("pc") || op.contains("r15"))
    }

    /// Skips do not exist on ARM.
    pub fn is_skip(&self) -> bool {
        false
    }

    /// Unconditional transfer without a saved return address. Returns
    /// take precedence: `pop {..,pc}` writes the PC but is not a jump.
    pub fn is_jump(&self) -> bool {
        use ArmV5Mnemonic::*;
        if self.condition.is_some() || self.is_return() {
            return false;
        }
        match self.mnemonic {
            B | Bx => true,
            _ => self.may_write_pc(),
        }
    }

    /// Conditional transfer.
    pub fn is_branch(&self) -> bool {
        use ArmV5Mnemonic::*;
        if self.condition.is_none() || self.is_return() {
            return false;
        }
        match self.mnemonic {
            B | Bx => true,
            _ => self.may_write_pc(),
        }
    }

    /// BL and BLX save the return address in the link register. Assembly
    /// could also set lr manually and branch; that counts as a branch.
    pub fn is_call(&self) -> bool {
        use ArmV5Mnemonic::*;
        matches!(self.mnemonic, Bl | Blx)
    }

    /// `b lr` / `bx lr`, or the common `pop {.., pc}` idiom. Any other
    /// register could technically hold the return address; such transfers
    /// count as jumps.
    pub fn is_return(&self) -> bool {
        use ArmV5Mnemonic::*;
        match self.mnemonic {
            B | Bx => self
                .operands
                .first()
                .is_some_and(|op| op.eq_ignore_ascii_case("lr")),
            Pop => self.may_write_pc(),
            _ => false,
        }
    }

    /// The disassembler already resolves relative B/BL displacements to
    /// absolute addresses; anything else (register targets, literal-pool
    /// loads into PC) needs surrounding-code analysis and yields no
    /// target.
    pub fn targets(&self, current_addr: u64) -> Vec<u64> {
        if !(self.is_branch() || self.is_call() || self.is_jump()) {
            return Vec::new();
        }
        match self.operands.first() {
            Some(op) if HEX_LITERAL_RE.is_match(op) => match absolute_target(op) {
                Some(addr) => vec![addr],
                None => Vec::new(),
            },
            Some(_) => {
                warn!(
                    addr = format_args!("{current_addr:#x}"),
                    "cannot determine destination of instruction"
                );
                Vec::new()
            }
            None => {
                warn!(
                    addr = format_args!("{current_addr:#x}"),
                    "cannot determine destination of instruction (no operands)"
                );
                Vec::new()
            }
        }
    }

    /// Thumb encodings fit in 16 bits, ARM encodings in 32. The mnemonic
    /// alone cannot tell them apart, the raw opcode width can.
    pub fn size(&self) -> u64 {
        if self.raw <= 0xFFFF {
            2
        } else {
            4
        }
    }

    pub fn word_size(&self) -> u64 {
        4
    }
}
