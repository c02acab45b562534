//! AVR instruction classifier.
//!
//! The stable, authoritative architecture. Classification is by mnemonic:
//! skips (CPSE, SBRC/SBRS, SBIC/SBIS) conditionally bypass exactly the
//! following instruction; RJMP/JMP/IJMP are jumps; the BR* family are
//! conditional branches; CALL/RCALL/ICALL save a return address; RET/RETI
//! return. CALL, JMP, LDS and STS encode in four bytes, `.byte` data in
//! one, everything else in two; the program counter advances by two
//! before a relative offset is applied.

use tracing::warn;

use crate::arch::{absolute_target, parse_text, relative_offset};
use crate::core::disasm::DisasmInstruction;
use crate::error::{BincfgError, Result};

/// The AVR instruction set, one variant per mnemonic. `.byte` and `.word`
/// appear in disassembled data regions and are not real instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[rustfmt::skip]
pub enum AvrMnemonic {
    Add, Adc, Adiw, Sub, Subi, Sbc, Sbci, Sbiw, And, Andi,
    Or, Ori, Eor, Com, Neg, Sbr, Cbr, Inc, Dec, Tst,
    Clr, Ser, Mul, Muls, Mulsu, Fmul, Fmuls, Fmulsu,
    Rjmp, Ijmp, Jmp, Rcall, Icall, Call, Ret, Reti,
    Cpse, Cp, Cpc, Cpi, Sbrc, Sbrs, Sbic, Sbis,
    Brbs, Brbc, Breq, Brne, Brcs, Brcc, Brsh, Brlo, Brmi, Brpl,
    Brge, Brlt, Brhs, Brhc, Brts, Brtc, Brvs, Brvc, Brie, Brid,
    Mov, Movw, Ldi, Ld, Ldd, Lds, St, Std, Sts,
    Lpm, Elpm, Spm, In, Out, Push, Pop, Sbi, Cbi,
    Lsl, Lsr, Rol, Ror, Asr, Swap, Bset, Bclr, Bst, Bld,
    Sec, Clc, Sen, Cln, Sez, Clz, Sei, Cli,
    Ses, Cls, Sev, Clv, Set, Clt, Seh, Clh,
    Nop, Sleep, Wdr, Break, Byte, Word,
}

fn lookup(mnemonic: &str) -> Option<AvrMnemonic> {
    use AvrMnemonic::*;
    Some(match mnemonic {
        "ADD" => Add, "ADC" => Adc, "ADIW" => Adiw, "SUB" => Sub,
        "SUBI" => Subi, "SBC" => Sbc, "SBCI" => Sbci, "SBIW" => Sbiw,
        "AND" => And, "ANDI" => Andi, "OR" => Or, "ORI" => Ori,
        "EOR" => Eor, "COM" => Com, "NEG" => Neg, "SBR" => Sbr,
        "CBR" => Cbr, "INC" => Inc, "DEC" => Dec, "TST" => Tst,
        "CLR" => Clr, "SER" => Ser, "MUL" => Mul, "MULS" => Muls,
        "MULSU" => Mulsu, "FMUL" => Fmul, "FMULS" => Fmuls, "FMULSU" => Fmulsu,
        "RJMP" => Rjmp, "IJMP" => Ijmp, "JMP" => Jmp, "RCALL" => Rcall,
        "ICALL" => Icall, "CALL" => Call, "RET" => Ret, "RETI" => Reti,
        "CPSE" => Cpse, "CP" => Cp, "CPC" => Cpc, "CPI" => Cpi,
        "SBRC" => Sbrc, "SBRS" => Sbrs, "SBIC" => Sbic, "SBIS" => Sbis,
        "BRBS" => Brbs, "BRBC" => Brbc, "BREQ" => Breq, "BRNE" => Brne,
        "BRCS" => Brcs, "BRCC" => Brcc, "BRSH" => Brsh, "BRLO" => Brlo,
        "BRMI" => Brmi, "BRPL" => Brpl, "BRGE" => Brge, "BRLT" => Brlt,
        "BRHS" => Brhs, "BRHC" => Brhc, "BRTS" => Brts, "BRTC" => Brtc,
        "BRVS" => Brvs, "BRVC" => Brvc, "BRIE" => Brie, "BRID" => Brid,
        "MOV" => Mov, "MOVW" => Movw, "LDI" => Ldi, "LD" => Ld,
        "LDD" => Ldd, "LDS" => Lds, "ST" => St, "STD" => Std,
        "STS" => Sts, "LPM" => Lpm, "ELPM" => Elpm, "SPM" => Spm,
        "IN" => In, "OUT" => Out, "PUSH" => Push, "POP" => Pop,
        "SBI" => Sbi, "CBI" => Cbi, "LSL" => Lsl, "LSR" => Lsr,
        "ROL" => Rol, "ROR" => Ror, "ASR" => Asr, "SWAP" => Swap,
        "BSET" => Bset, "BCLR" => Bclr, "BST" => Bst, "BLD" => Bld,
        "SEC" => Sec, "CLC" => Clc, "SEN" => Sen, "CLN" => Cln,
        "SEZ" => Sez, "CLZ" => Clz, "SEI" => Sei, "CLI" => Cli,
        "SES" => Ses, "CLS" => Cls, "SEV" => Sev, "CLV" => Clv,
        "SET" => Set, "CLT" => Clt, "SEH" => Seh, "CLH" => Clh,
        "NOP" => Nop, "SLEEP" => Sleep, "WDR" => Wdr, "BREAK" => Break,
        "BYTE" => Byte, "WORD" => Word,
        _ => return None,
    })
}

const WORD_SIZE: u64 = 2;

/// One classified AVR instruction.
#[derive(Debug, Clone)]
pub struct AvrInstruction {
    mnemonic: AvrMnemonic,
    text_mnemonic: String,
    operands: Vec<String>,
}

impl AvrInstruction {
    pub fn parse(disasm: &DisasmInstruction, ignore_errors: bool) -> Result<Self> {
        let Some((text_mnemonic, operands)) = parse_text(&disasm.text) else {
            if ignore_errors {
                warn!(text = %disasm.text, "unparsable AVR instruction treated as NOP");
                return Ok(Self {
                    mnemonic: AvrMnemonic::Nop,
                    text_mnemonic: String::new(),
                    operands: Vec::new(),
                });
            }
            return Err(BincfgError::ParseError(format!(
                "cannot split mnemonic and operands in: {}",
                disasm.text
            )));
        };

        let Some(mnemonic) = lookup(&text_mnemonic) else {
            if ignore_errors {
                warn!(mnemonic = %text_mnemonic, text = %disasm.text,
                      "unknown AVR mnemonic treated as NOP");
                return Ok(Self {
                    mnemonic: AvrMnemonic::Nop,
                    text_mnemonic,
                    operands,
                });
            }
            return Err(BincfgError::UnknownMnemonic {
                mnemonic: text_mnemonic,
                text: disasm.text.clone(),
            });
        };

        Ok(Self {
            mnemonic,
            text_mnemonic,
            operands,
        })
    }

    pub fn avr_mnemonic(&self) -> AvrMnemonic {
        self.mnemonic
    }

    pub fn mnemonic(&self) -> &str {
        &self.text_mnemonic
    }

    pub fn operands(&self) -> &[String] {
        &self.operands
    }

    pub fn is_skip(&self) -> bool {
        use AvrMnemonic::*;
        matches!(self.mnemonic, Cpse | Sbrc | Sbrs | Sbic | Sbis)
    }

    pub fn is_jump(&self) -> bool {
        use AvrMnemonic::*;
        matches!(self.mnemonic, Jmp | Ijmp | Rjmp)
    }

    pub fn is_branch(&self) -> bool {
        use AvrMnemonic::*;
        matches!(
            self.mnemonic,
            Brbs | Brbc | Breq | Brne | Brcs | Brcc | Brsh | Brlo | Brmi | Brpl | Brge | Brlt
                | Brhs | Brhc | Brts | Brtc | Brvs | Brvc | Brie | Brid
        )
    }

    pub fn is_call(&self) -> bool {
        use AvrMnemonic::*;
        matches!(self.mnemonic, Call | Rcall | Icall)
    }

    pub fn is_return(&self) -> bool {
        use AvrMnemonic::*;
        matches!(self.mnemonic, Ret | Reti)
    }

    /// Resolve target addresses. CALL/JMP carry an absolute operand;
    /// RCALL/RJMP and all branches carry `.±N`, applied after the program
    /// counter has already advanced by one word. Indirect transfers
    /// (ICALL, IJMP) yield no target.
    pub fn targets(&self, current_addr: u64) -> Vec<u64> {
        use AvrMnemonic::*;
        match self.mnemonic {
            Call | Jmp => match self.operands.first().and_then(|op| absolute_target(op)) {
                Some(addr) => vec![addr],
                None => {
                    warn!(
                        addr = format_args!("{current_addr:#x}"),
                        "cannot parse absolute target"
                    );
                    Vec::new()
                }
            },
            Rcall | Rjmp => self.relative_target(current_addr, 0),
            Icall | Ijmp => {
                warn!(
                    addr = format_args!("{current_addr:#x}"),
                    "indirect call/jump not supported"
                );
                Vec::new()
            }
            // The offset is the last operand (BRBS/BRBC carry the status
            // bit first).
            _ if self.is_branch() => {
                self.relative_target(current_addr, self.operands.len().saturating_sub(1))
            }
            _ => Vec::new(),
        }
    }

    fn relative_target(&self, current_addr: u64, operand_index: usize) -> Vec<u64> {
        match self
            .operands
            .get(operand_index)
            .and_then(|op| relative_offset(op))
        {
            Some(diff) => vec![current_addr.wrapping_add_signed(diff + WORD_SIZE as i64)],
            None => {
                warn!(
                    addr = format_args!("{current_addr:#x}"),
                    "cannot parse relative target"
                );
                Vec::new()
            }
        }
    }

    pub fn size(&self) -> u64 {
        use AvrMnemonic::*;
        match self.mnemonic {
            Call | Jmp | Lds | Sts => 4,
            Byte => 1,
            _ => 2,
        }
    }

    pub fn word_size(&self) -> u64 {
        WORD_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> AvrInstruction {
        let disasm = DisasmInstruction::new(0, text, "");
        AvrInstruction::parse(&disasm, false).unwrap()
    }

    #[test]
    fn test_skip_predicates() {
        for text in ["cpse r0, r1", "sbrc r4, 7", "sbrs r4, 0", "sbic 0x1f, 2", "sbis 0x1f, 2"] {
            let insn = parse(text);
            assert!(insn.is_skip(), "{text} should be a skip");
            assert!(!insn.is_jump() && !insn.is_branch() && !insn.is_call());
        }
    }

    #[test]
    fn test_jump_call_return_predicates() {
        assert!(parse("rjmp .-4").is_jump());
        assert!(parse("jmp 0x96").is_jump());
        assert!(parse("ijmp").is_jump());
        assert!(parse("call 0x134").is_call());
        assert!(parse("rcall .+0").is_call());
        assert!(parse("icall").is_call());
        assert!(parse("ret").is_return());
        assert!(parse("reti").is_return());
        assert!(!parse("ldi r24, 0x01").is_branch());
    }

    #[test]
    fn test_branch_family() {
        for text in ["breq .+2", "brne .-4", "brge .+8", "brid .+2"] {
            assert!(parse(text).is_branch(), "{text} should be a branch");
        }
    }

    #[test]
    fn test_absolute_targets() {
        assert_eq!(parse("call 0x134").targets(0x100), vec![0x134]);
        assert_eq!(parse("jmp 0x96").targets(0), vec![0x96]);
    }

    #[test]
    fn test_relative_targets_apply_word_size() {
        // PC has advanced by one word before the offset applies.
        assert_eq!(parse("rjmp .-4").targets(0x10), vec![0xe]);
        assert_eq!(parse("rcall .+4").targets(0x0), vec![0x6]);
        assert_eq!(parse("brne .-4").targets(4), vec![2]);
        // Status-bit branches carry the offset as the second operand.
        assert_eq!(parse("brbs 0, .+8").targets(0x10), vec![0x1a]);
    }

    #[test]
    fn test_indirect_targets_empty() {
        assert!(parse("icall").targets(0).is_empty());
        assert!(parse("ijmp").targets(0).is_empty());
    }

    #[test]
    fn test_sizes() {
        assert_eq!(parse("call 0x134").size(), 4);
        assert_eq!(parse("jmp 0x96").size(), 4);
        assert_eq!(parse("lds r24, 0x0060").size(), 4);
        assert_eq!(parse("sts 0x0060, r24").size(), 4);
        assert_eq!(parse("ret").size(), 2);
        assert_eq!(parse(".byte 0xff").size(), 1);
        assert_eq!(parse(".word 0x1234").size(), 2);
    }

    #[test]
    fn test_data_mnemonics_have_no_predicates() {
        let insn = parse(".word 0xc00e");
        assert!(!insn.is_skip() && !insn.is_jump() && !insn.is_branch());
        assert!(!insn.is_call() && !insn.is_return());
    }

    #[test]
    fn test_unknown_mnemonic_strict_vs_ignore() {
        let disasm = DisasmInstruction::new(0, "frob r1, r2", "");
        let err = AvrInstruction::parse(&disasm, false);
        assert!(matches!(err, Err(BincfgError::UnknownMnemonic { .. })));

        let insn = AvrInstruction::parse(&disasm, true).unwrap();
        assert_eq!(insn.avr_mnemonic(), AvrMnemonic::Nop);
        assert!(!insn.is_call());
    }
}
