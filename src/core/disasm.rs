//! Immutable input records produced by the disassembly reader.
//!
//! A disassembled section is an address-ordered instruction stream plus a
//! symbol table. Both maps are read-only once the reader has produced
//! them; the generator and the exporters only borrow them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One line of textual disassembly, before any architecture-specific
/// interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisasmInstruction {
    /// Raw opcode bytes encoded as a single integer. ARMv5 derives the
    /// instruction width from this; AVR ignores it.
    pub raw: u64,
    /// Mnemonic and operand text exactly as printed by the disassembler.
    pub text: String,
    /// Trailing comment, possibly empty. May contain `<UNDEFINED>` for
    /// inline data on ARM.
    pub comment: String,
}

impl DisasmInstruction {
    pub fn new(raw: u64, text: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            raw,
            text: text.into(),
            comment: comment.into(),
        }
    }
}

/// Instructions keyed by address. Dense: for any key, the next-higher key
/// is the address of the following instruction in the section.
pub type InsnMap = BTreeMap<u64, DisasmInstruction>;

/// Symbol names keyed by address. Symbols partition the section into
/// named regions.
pub type SymbMap = BTreeMap<u64, String>;

/// A disassembled section: named instruction stream plus symbol table.
#[derive(Debug, Clone, Default)]
pub struct DisasmSection {
    name: String,
    insns: InsnMap,
    symbols: SymbMap,
}

impl DisasmSection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            insns: InsnMap::new(),
            symbols: SymbMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn insert_instruction(&mut self, addr: u64, insn: DisasmInstruction) {
        self.insns.insert(addr, insn);
    }

    pub fn insert_symbol(&mut self, addr: u64, name: impl Into<String>) {
        self.symbols.insert(addr, name.into());
    }

    pub fn instructions(&self) -> &InsnMap {
        &self.insns
    }

    pub fn symbols(&self) -> &SymbMap {
        &self.symbols
    }

    pub fn instruction_count(&self) -> usize {
        self.insns.len()
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// The enclosing symbol for `addr`: the greatest symbol address less
    /// than or equal to `addr`, if any.
    pub fn symbol_context(&self, addr: u64) -> Option<(u64, &str)> {
        self.symbols
            .range(..=addr)
            .next_back()
            .map(|(&a, name)| (a, name.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section() -> DisasmSection {
        let mut sect = DisasmSection::new(".text");
        sect.insert_symbol(0x0, "reset");
        sect.insert_symbol(0x40, "main");
        sect.insert_instruction(0x0, DisasmInstruction::new(0xc00e, "rjmp .+28", ""));
        sect
    }

    #[test]
    fn test_symbol_context_exact_and_between() {
        let sect = section();
        assert_eq!(sect.symbol_context(0x0), Some((0x0, "reset")));
        assert_eq!(sect.symbol_context(0x3e), Some((0x0, "reset")));
        assert_eq!(sect.symbol_context(0x40), Some((0x40, "main")));
        assert_eq!(sect.symbol_context(0x100), Some((0x40, "main")));
    }

    #[test]
    fn test_symbol_context_below_first() {
        let mut sect = DisasmSection::new(".text");
        sect.insert_symbol(0x10, "f");
        assert_eq!(sect.symbol_context(0x8), None);
    }

    #[test]
    fn test_counts() {
        let sect = section();
        assert_eq!(sect.instruction_count(), 1);
        assert_eq!(sect.symbol_count(), 2);
        assert_eq!(sect.name(), ".text");
    }
}
