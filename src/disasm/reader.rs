//! Line-matching reader for disassembled ELF objects.
//!
//! Three line shapes are recognized inside the requested section:
//!
//! ```text
//! Disassembly of section .text:
//! 00000068 <main>:
//!   68:\t0e 94 40 00 \tcall\t0x80\t; 0x80 <foo>
//! ```
//!
//! Lines matching none of the shapes are reported and skipped; reading
//! stops at the next section header.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::core::disasm::{DisasmInstruction, DisasmSection};
use crate::error::{BincfgError, Result};

static SECTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Disassembly of section (.*):").unwrap());

static SYMBOL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([0-9a-fA-F]+) <([^>]+)>:").unwrap());

static INSN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([0-9a-fA-F]+):\t([0-9a-fA-F ]+)\t([^;<]+)(?:$|(?:\t;| )(.*))").unwrap()
});

/// Reads one section of a disassembled ELF object from a text file.
pub struct DisassemblyReader {
    path: PathBuf,
}

impl DisassemblyReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the named section. Fails when the file cannot be opened or
    /// the section yields no instructions or no symbols.
    pub fn read_section(&self, name: &str) -> Result<DisasmSection> {
        let file = File::open(&self.path)?;
        let mut section = DisasmSection::new(name);
        self.process_lines(BufReader::new(file), &mut section)?;

        if section.instruction_count() == 0 || section.symbol_count() == 0 {
            return Err(BincfgError::MalformedInput(format!(
                "could not read section {name} from {}",
                self.path.display()
            )));
        }
        Ok(section)
    }

    fn process_lines<R: BufRead>(&self, reader: R, section: &mut DisasmSection) -> Result<()> {
        let mut in_section = false;

        for line in reader.lines() {
            let line = line?;

            if !in_section {
                if let Some(caps) = SECTION_RE.captures(&line) {
                    if caps.get(1).is_some_and(|m| m.as_str() == section.name()) {
                        in_section = true;
                    }
                }
                continue;
            }

            if let Some(caps) = INSN_RE.captures(&line) {
                match parse_instruction_line(&caps) {
                    Some((addr, insn)) => section.insert_instruction(addr, insn),
                    None => warn!(line = %line, "malformed instruction line skipped"),
                }
            } else if let Some(caps) = SYMBOL_RE.captures(&line) {
                match parse_symbol_line(&caps) {
                    Some((addr, symbol)) => section.insert_symbol(addr, symbol),
                    None => warn!(line = %line, "malformed symbol line skipped"),
                }
            } else if SECTION_RE.is_match(&line) {
                // End of the requested section.
                break;
            } else if !line.trim().is_empty() {
                warn!(line = %line, "unrecognized line skipped");
            }
        }

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_instruction_line(caps: &regex::Captures<'_>) -> Option<(u64, DisasmInstruction)> {
    let addr = u64::from_str_radix(caps.get(1)?.as_str(), 16).ok()?;
    // The byte column may hold several space-separated groups; the raw
    // opcode is the leading one (ARMv5 widths come from it).
    let bytes = caps.get(2)?.as_str().trim();
    let raw_text = bytes.split_whitespace().next()?;
    let raw = u64::from_str_radix(raw_text, 16).ok()?;
    let text = caps.get(3)?.as_str().trim_end().to_string();
    let comment = caps.get(4).map(|m| m.as_str()).unwrap_or_default();
    Some((addr, DisasmInstruction::new(raw, text, comment)))
}

fn parse_symbol_line(caps: &regex::Captures<'_>) -> Option<(u64, String)> {
    let addr = u64::from_str_radix(caps.get(1)?.as_str(), 16).ok()?;
    Some((addr, caps.get(2)?.as_str().to_string()))
}
