//! Flow exporters: CSV, Graphviz DOT and JSON.
//!
//! All exporters append to the target file so that one run can write
//! several flows into a single document; the CLI truncates the file once
//! before the first write.

pub mod csv;
pub mod dot;
pub mod json;

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use crate::core::disasm::InsnMap;
use crate::core::flow::Flow;
use crate::error::Result;

pub use csv::{CsvColumn, CsvFlowExporter};
pub use dot::DotFlowExporter;
pub use json::JsonFlowExporter;

/// Serialization of one flow to an output file.
pub trait FlowExporter {
    fn export_flow(&self, flow: &Flow, insns: &InsnMap, path: &Path) -> Result<()>;
}

pub(crate) fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}
