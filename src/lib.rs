//! bincfg reconstructs per-function control-flow graphs from the textual
//! disassembly of an ELF object, augments them with DWARF debug-line
//! information and exports the results as CSV, Graphviz DOT or JSON.
//!
//! # Basic usage
//!
//! ```rust,no_run
//! use bincfg::analysis::cfg::FlowGenerator;
//! use bincfg::disasm::DisassemblyReader;
//!
//! # fn main() -> bincfg::error::Result<()> {
//! let section = DisassemblyReader::new("firmware.lst").read_section(".text")?;
//! let generator = FlowGenerator::for_arch("avr", false)?;
//! let flows = generator.generate_flows(&section)?;
//!
//! for (entry, flow) in &flows {
//!     println!("{:#x}: {} ({} blocks)", entry, flow.name(), flow.blocks().len());
//! }
//! # Ok(())
//! # }
//! ```

/// Flow reconstruction algorithms
pub mod analysis;

/// Per-architecture instruction classifiers and the factory
pub mod arch;

/// CLI argument types for the elf2flow binary
pub mod cli;

/// Core data types: disassembly records, basic blocks, flows
pub mod core;

/// Textual-disassembly reading
pub mod disasm;

/// DWARF debug-line reading
pub mod dwarf;

/// Error types and error handling
pub mod error;

/// Flow exporters (CSV, DOT, JSON)
pub mod export;

/// Logging and tracing infrastructure
pub mod logging;
