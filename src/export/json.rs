//! JSON export of flows, instruction maps, symbol maps and debug data.
//!
//! A flow document carries the block set and edge list together with one
//! synthetic Entry and one synthetic Exit node (negative IDs); each call
//! site additionally materializes a `FunctionCall` pseudo-block carrying
//! the symbolized callees.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::analysis::cfg::FlowGenerator;
use crate::core::disasm::{InsnMap, SymbMap};
use crate::core::flow::Flow;
use crate::dwarf::DebugData;
use crate::error::Result;
use crate::export::{open_append, FlowExporter};

/// Entry/Exit pseudo-node IDs; call pseudo-blocks count down from there.
const ENTRY_ID: i64 = -1;
const EXIT_ID: i64 = -2;

/// The serialized shape of one flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDocument {
    #[serde(rename = "Type")]
    pub doc_type: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "BasicBlocks")]
    pub basic_blocks: Vec<BlockRecord>,
    #[serde(rename = "Edges")]
    pub edges: Vec<(i64, i64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "AddrRanges", skip_serializing_if = "Option::is_none")]
    pub addr_ranges: Option<Vec<(u64, u64)>>,
    #[serde(rename = "BlockType")]
    pub block_type: String,
    #[serde(rename = "calls", skip_serializing_if = "Option::is_none")]
    pub calls: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct JsonFlowExporter;

impl JsonFlowExporter {
    pub fn new() -> Self {
        Self
    }

    /// Build the serializable view of a flow.
    pub fn flow_document(flow: &Flow) -> FlowDocument {
        let mut blocks = Vec::new();
        let mut edges: Vec<(i64, i64)> = Vec::new();

        blocks.push(BlockRecord {
            id: ENTRY_ID,
            addr_ranges: None,
            block_type: "Entry".to_string(),
            calls: None,
        });
        edges.push((ENTRY_ID, flow.post_entry() as i64));

        blocks.push(BlockRecord {
            id: EXIT_ID,
            addr_ranges: None,
            block_type: "Exit".to_string(),
            calls: None,
        });
        for &pre_exit in flow.pre_exits() {
            edges.push((pre_exit as i64, EXIT_ID));
        }

        let mut call_sites = flow.call_sites().clone();
        let mut dummy = EXIT_ID;

        for (&entry, block) in flow.blocks() {
            let ranges: Vec<(u64, u64)> = block
                .addr_ranges()
                .iter()
                .map(|r| (r.low, r.high))
                .collect();
            debug_assert!(!ranges.is_empty(), "block with no address range");

            blocks.push(BlockRecord {
                id: entry as i64,
                addr_ranges: Some(ranges),
                block_type: "Normal".to_string(),
                calls: None,
            });

            let outs = flow.out_edges(entry);
            let last = block.last_addr();

            // A block ending in a call site routes its successors through
            // an interposed FunctionCall pseudo-block.
            if call_sites.remove(&last) {
                dummy -= 1;
                edges.push((entry as i64, dummy));
                for &dst in outs {
                    edges.push((dummy, dst as i64));
                }
                blocks.push(BlockRecord {
                    id: dummy,
                    addr_ranges: Some(vec![(last, last)]),
                    block_type: "FunctionCall".to_string(),
                    calls: Some(block.callees().to_vec()),
                });
            } else {
                for &dst in outs {
                    edges.push((entry as i64, dst as i64));
                }
            }
        }

        debug_assert!(call_sites.is_empty(), "call sites outside any block");

        FlowDocument {
            doc_type: "Flow".to_string(),
            name: flow.name().to_string(),
            basic_blocks: blocks,
            edges,
        }
    }

    /// Export the instruction map of a section, with classification and
    /// resolved targets per instruction.
    pub fn export_insn_map(
        &self,
        insns: &InsnMap,
        generator: &FlowGenerator,
        section: &str,
        path: &Path,
    ) -> Result<()> {
        let mut records = Vec::new();
        for (&addr, disasm) in insns {
            let insn = generator.instruction(disasm)?;
            records.push(json!({
                "Addr": addr,
                "Mnem": insn.mnemonic(),
                "Op": insn.operands(),
                "Target": insn.targets(addr),
            }));
        }
        let doc = json!({
            "Type": "InsnMap",
            "Section": section,
            "Instructions": records,
        });
        self.write_document(&doc, path)
    }

    /// Export the symbol map of a section.
    pub fn export_symb_map(&self, symbols: &SymbMap, section: &str, path: &Path) -> Result<()> {
        let records: Vec<_> = symbols
            .iter()
            .map(|(&addr, name)| json!({ "Addr": addr, "Symbol": name }))
            .collect();
        let doc = json!({
            "Type": "SymbolMap",
            "Section": section,
            "Symbols": records,
        });
        self.write_document(&doc, path)
    }

    /// Export debug data: the line-info tables, the per-instruction
    /// lookup map and the filtered DIE dump.
    pub fn export_debug_data(
        &self,
        debug: &DebugData,
        insns: &InsnMap,
        path: &Path,
    ) -> Result<()> {
        let mut line_entries = serde_json::Map::new();
        for (&low_pc, entry) in debug.line_entries() {
            line_entries.insert(low_pc.to_string(), serde_json::to_value(entry)?);
        }

        // Instructions with valid line info, mapped to their entry key.
        let mut line_map = serde_json::Map::new();
        for &addr in insns.keys() {
            if let Some(entry) = debug.line_info(addr) {
                line_map.insert(addr.to_string(), json!(entry.low_pc.to_string()));
            }
        }

        let doc = json!({
            "Type": "DebugInfo",
            "Description": "LineInfoMap maps instructions with valid debug line info \
                            to a line info entry in LineInfoEntries.",
            "Data": {
                "LineInfoEntries": line_entries,
                "LineInfoMap": line_map,
                "CompilationUnits": debug.compilation_units(),
                "DIEs": debug.dies(),
            },
        });
        self.write_document(&doc, path)
    }

    fn write_document(&self, doc: &serde_json::Value, path: &Path) -> Result<()> {
        let mut stream = open_append(path).inspect_err(|_| {
            error!(path = %path.display(), "could not open output file");
        })?;
        serde_json::to_writer(&mut stream, doc)?;
        writeln!(stream, "\n")?;
        Ok(())
    }
}

impl FlowExporter for JsonFlowExporter {
    fn export_flow(&self, flow: &Flow, _insns: &InsnMap, path: &Path) -> Result<()> {
        let doc = Self::flow_document(flow);
        let mut stream = open_append(path).inspect_err(|_| {
            error!(path = %path.display(), "could not open output file");
        })?;
        serde_json::to_writer(&mut stream, &doc)?;
        writeln!(stream, "\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::basic_block::BlockKind;

    fn call_flow() -> Flow {
        let mut flow = Flow::new("f");
        flow.add_contiguous_block(0x10, 0x10, BlockKind::Call);
        flow.add_contiguous_block(0x14, 0x16, BlockKind::Normal);
        flow.mark_post_entry(0x10);
        flow.mark_pre_exit(0x14);
        flow.mark_call_site(0x10, vec![0x18]);
        flow.add_edge(0x10, 0x14);
        flow.block_mut(0x10).unwrap().add_callee("g");
        flow
    }

    #[test]
    fn test_flow_document_structure() {
        let doc = JsonFlowExporter::flow_document(&call_flow());

        assert_eq!(doc.doc_type, "Flow");
        assert_eq!(doc.name, "f");

        let entry = &doc.basic_blocks[0];
        assert_eq!((entry.id, entry.block_type.as_str()), (-1, "Entry"));
        let exit = &doc.basic_blocks[1];
        assert_eq!((exit.id, exit.block_type.as_str()), (-2, "Exit"));

        // Entry edge and exit edge.
        assert!(doc.edges.contains(&(-1, 0x10)));
        assert!(doc.edges.contains(&(0x14, -2)));

        // The call block routes through a FunctionCall pseudo-block.
        let fcall = doc
            .basic_blocks
            .iter()
            .find(|b| b.block_type == "FunctionCall")
            .expect("function call block");
        assert_eq!(fcall.calls.as_deref(), Some(&["g".to_string()][..]));
        assert_eq!(fcall.addr_ranges.as_deref(), Some(&[(0x10, 0x10)][..]));
        assert!(doc.edges.contains(&(0x10, fcall.id)));
        assert!(doc.edges.contains(&(fcall.id, 0x14)));
        assert!(!doc.edges.contains(&(0x10, 0x14)));
    }

    #[test]
    fn test_flow_document_round_trip() {
        let doc = JsonFlowExporter::flow_document(&call_flow());
        let text = serde_json::to_string(&doc).unwrap();
        let parsed: FlowDocument = serde_json::from_str(&text).unwrap();
        assert_eq!(doc, parsed);
    }
}
