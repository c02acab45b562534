//! CSV export: one row per step (instruction address to next address).
//!
//! The last row of each block carries the block's outgoing targets.
//! Columns are selectable; when debug data is attached the File, Line
//! number and Column number columns are filled from the DWARF line
//! lookup.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

use tracing::{error, info};

use crate::core::disasm::InsnMap;
use crate::core::flow::Flow;
use crate::dwarf::DebugData;
use crate::error::Result;
use crate::export::{open_append, FlowExporter};

/// Output column selector, in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CsvColumn {
    File,
    BlockNumber,
    StepAddress,
    TargetAddress,
    LineNumber,
    ColumnNumber,
}

impl CsvColumn {
    fn label(&self) -> &'static str {
        match self {
            CsvColumn::File => "File",
            CsvColumn::BlockNumber => "Block number",
            CsvColumn::StepAddress => "Step address",
            CsvColumn::TargetAddress => "Target address",
            CsvColumn::LineNumber => "Line number",
            CsvColumn::ColumnNumber => "Column number",
        }
    }
}

/// CSV flow exporter with configurable separators and columns.
pub struct CsvFlowExporter<'a> {
    separator: char,
    header_start: char,
    header_separator: char,
    add_func_blocks: bool,
    columns: BTreeSet<CsvColumn>,
    debug_data: Option<&'a DebugData>,
}

impl Default for CsvFlowExporter<'_> {
    fn default() -> Self {
        Self {
            separator: ';',
            header_start: '#',
            header_separator: ',',
            add_func_blocks: false,
            columns: BTreeSet::from([
                CsvColumn::BlockNumber,
                CsvColumn::StepAddress,
                CsvColumn::TargetAddress,
            ]),
            debug_data: None,
        }
    }
}

impl<'a> CsvFlowExporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_separator(&mut self, separator: char) {
        self.separator = separator;
    }

    pub fn set_header_start(&mut self, start: char) {
        self.header_start = start;
    }

    pub fn set_header_separator(&mut self, separator: char) {
        self.header_separator = separator;
    }

    /// Emit a dummy row pair for blocks ending in a call, mirroring the
    /// pseudo-blocks of the JSON exporter.
    pub fn set_add_func_blocks(&mut self, state: bool) {
        self.add_func_blocks = state;
    }

    pub fn set_column(&mut self, column: CsvColumn, include: bool) {
        if include {
            self.columns.insert(column);
        } else {
            self.columns.remove(&column);
        }
    }

    /// Attach DWARF line info; enables the File/Line/Column columns.
    pub fn set_debug_data(&mut self, debug: &'a DebugData) {
        self.debug_data = Some(debug);
        self.columns.insert(CsvColumn::File);
        self.columns.insert(CsvColumn::LineNumber);
        self.columns.insert(CsvColumn::ColumnNumber);
    }

    fn header(&self) -> String {
        let labels: Vec<&str> = self.columns.iter().map(|c| c.label()).collect();
        format!(
            "{} {}",
            self.header_start,
            labels.join(&format!("{} ", self.header_separator))
        )
    }

    fn step_line(&self, block: u64, step_addr: u64, targets: &[u64]) -> String {
        let target_list = targets
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ");

        let line_info = self.debug_data.and_then(|d| d.line_info(step_addr));
        let values: Vec<String> = self
            .columns
            .iter()
            .map(|column| match column {
                CsvColumn::File => line_info.map(|e| e.file.clone()).unwrap_or_default(),
                CsvColumn::BlockNumber => block.to_string(),
                CsvColumn::StepAddress => step_addr.to_string(),
                CsvColumn::TargetAddress => target_list.clone(),
                CsvColumn::LineNumber => line_info.map(|e| e.line.to_string()).unwrap_or_default(),
                CsvColumn::ColumnNumber => {
                    line_info.map(|e| e.column.to_string()).unwrap_or_default()
                }
            })
            .collect();
        values.join(&format!("{} ", self.separator))
    }
}

impl FlowExporter for CsvFlowExporter<'_> {
    fn export_flow(&self, flow: &Flow, insns: &InsnMap, path: &Path) -> Result<()> {
        info!(flow = %flow.name(), path = %path.display(), "exporting flow to csv");

        let mut stream = open_append(path).inspect_err(|_| {
            error!(path = %path.display(), "could not open output file");
        })?;
        writeln!(stream, "{}", self.header())?;

        let mut call_sites = flow.call_sites().clone();

        for (&entry, block) in flow.blocks() {
            let ranges = block.addr_ranges();
            for (index, range) in ranges.iter().enumerate() {
                let mut steps = insns.range(range.low..=range.high).peekable();
                while let Some((&addr, _)) = steps.next() {
                    if let Some(&(&next_addr, _)) = steps.peek() {
                        // Step to the following instruction in the range.
                        writeln!(stream, "{}", self.step_line(entry, addr, &[next_addr]))?;
                        continue;
                    }

                    // Last instruction of the range: step into the next
                    // range, or out of the block.
                    if let Some(next_range) = ranges.get(index + 1) {
                        writeln!(stream, "{}", self.step_line(entry, addr, &[next_range.low]))?;
                    } else {
                        let targets: Vec<u64> = flow.out_edges(entry).to_vec();
                        if self.add_func_blocks && call_sites.remove(&addr) {
                            // End the block at the call, then emit the
                            // dummy call row carrying the real targets.
                            writeln!(stream, "{}", self.step_line(entry, addr, &[addr]))?;
                            writeln!(stream, "{}", self.step_line(entry, addr, &targets))?;
                        } else {
                            writeln!(stream, "{}", self.step_line(entry, addr, &targets))?;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::basic_block::BlockKind;
    use crate::core::disasm::DisasmInstruction;

    fn sample() -> (Flow, InsnMap) {
        let mut flow = Flow::new("f");
        flow.add_contiguous_block(0, 4, BlockKind::Normal);
        flow.add_contiguous_block(6, 6, BlockKind::Normal);
        flow.mark_post_entry(0);
        flow.mark_pre_exit(6);
        flow.add_edge(0, 6);

        let mut insns = InsnMap::new();
        for addr in [0u64, 2, 4, 6] {
            insns.insert(addr, DisasmInstruction::new(0, "nop", ""));
        }
        (flow, insns)
    }

    #[test]
    fn test_header_format() {
        let exporter = CsvFlowExporter::new();
        assert_eq!(
            exporter.header(),
            "# Block number, Step address, Target address"
        );
    }

    #[test]
    fn test_step_rows() {
        let (flow, insns) = sample();
        let file = tempfile::NamedTempFile::new().unwrap();
        CsvFlowExporter::new()
            .export_flow(&flow, &insns, file.path())
            .unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                "# Block number, Step address, Target address",
                "0; 0; 2",
                "0; 2; 4",
                "0; 4; 6",
                "6; 6; ",
            ]
        );
    }

    #[test]
    fn test_multi_range_block_steps_across_ranges() {
        let mut flow = Flow::new("f");
        flow.add_contiguous_block(0, 0, BlockKind::Normal);
        flow.block_mut(0).unwrap().push_range(0x10, 0x10);
        flow.mark_post_entry(0);
        flow.mark_pre_exit(0);

        let mut insns = InsnMap::new();
        insns.insert(0, DisasmInstruction::new(0, "jmp 0x10", ""));
        insns.insert(0x10, DisasmInstruction::new(0, "ret", ""));

        let file = tempfile::NamedTempFile::new().unwrap();
        CsvFlowExporter::new()
            .export_flow(&flow, &insns, file.path())
            .unwrap();
        let content = std::fs::read_to_string(file.path()).unwrap();
        assert!(content.contains("0; 0; 16"));
    }

    #[test]
    fn test_func_block_rows() {
        let mut flow = Flow::new("f");
        flow.add_contiguous_block(0, 0, BlockKind::Call);
        flow.add_contiguous_block(2, 2, BlockKind::Normal);
        flow.mark_post_entry(0);
        flow.mark_pre_exit(2);
        flow.mark_call_site(0, vec![0x20]);
        flow.add_edge(0, 2);

        let mut insns = InsnMap::new();
        insns.insert(0, DisasmInstruction::new(0, "rcall .+30", ""));
        insns.insert(2, DisasmInstruction::new(0, "ret", ""));

        let mut exporter = CsvFlowExporter::new();
        exporter.set_add_func_blocks(true);
        let file = tempfile::NamedTempFile::new().unwrap();
        exporter.export_flow(&flow, &insns, file.path()).unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        // The call block ends on itself, then the dummy row carries the
        // real successors.
        assert_eq!(lines[1], "0; 0; 0");
        assert_eq!(lines[2], "0; 0; 2");
    }
}
