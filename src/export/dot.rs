//! Graphviz DOT export.
//!
//! One digraph per flow: a circle entry node, a doublecircle exit node,
//! basic blocks as boxes whose HTML-table labels carry the block id and
//! every address range as `low:high`, and (in func-blocks mode) an
//! `FCall`-labelled box interposed after each call block.

use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

use tracing::{error, info};

use crate::core::basic_block::AddrRange;
use crate::core::disasm::InsnMap;
use crate::core::flow::Flow;
use crate::error::Result;
use crate::export::{open_append, FlowExporter};

#[derive(Debug, Clone, Default)]
pub struct DotFlowExporter {
    add_func_blocks: bool,
}

impl DotFlowExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpose an `FCall` pseudo-node after each block ending in a
    /// call, mirroring the JSON exporter's pseudo-blocks.
    pub fn set_add_func_blocks(&mut self, state: bool) {
        self.add_func_blocks = state;
    }

    /// Render one flow as a Graphviz digraph.
    pub fn render(&self, flow: &Flow) -> String {
        let mut out = String::new();
        let mut dummy: i64 = 0;

        let _ = writeln!(out, "digraph G {{ \n");
        let _ = writeln!(out, "label=\"{}\";", flow.name());
        let _ = writeln!(out, "labelloc=\"top\"\n");

        dummy -= 1;
        let entry_id = dummy;
        let _ = writeln!(out, "{entry_id} [shape=circle, label=entry] \n");
        write_edge(&mut out, entry_id, flow.post_entry() as i64);

        let mut call_sites = flow.call_sites().clone();
        for (&entry, block) in flow.blocks() {
            write_block_node(&mut out, entry as i64, "BB", true, block.addr_ranges());

            let last = block.last_addr();
            if self.add_func_blocks && call_sites.remove(&last) {
                dummy -= 1;
                write_edge(&mut out, entry as i64, dummy);
                for &dst in flow.out_edges(entry) {
                    write_edge(&mut out, dummy, dst as i64);
                }
                write_block_node(&mut out, dummy, "FCall", false, &[AddrRange::new(last, last)]);
            } else {
                for &dst in flow.out_edges(entry) {
                    write_edge(&mut out, entry as i64, dst as i64);
                }
            }
        }

        dummy -= 1;
        let exit_id = dummy;
        let _ = writeln!(out, "{exit_id} [shape=doublecircle, label=exit] \n");
        for &pre_exit in flow.pre_exits() {
            write_edge(&mut out, pre_exit as i64, exit_id);
        }

        out.push('}');
        out
    }
}

fn write_edge(out: &mut String, src: i64, dst: i64) {
    let _ = writeln!(out, "{src} -> {dst}; ");
}

fn write_block_node(out: &mut String, id: i64, label: &str, show_id: bool, ranges: &[AddrRange]) {
    let _ = write!(
        out,
        "{id} [shape=box, margin=0, label=<\
         <TABLE border=\"0\" cellborder=\"0\" cellpadding=\"0\">\
         <TR><TD colspan=\"2\" border=\"1\" sides=\"b\">{label}"
    );
    if show_id {
        let _ = write!(out, "{id}");
    }
    let _ = writeln!(out, "</TD></TR> ");

    for range in ranges {
        let _ = writeln!(
            out,
            "<TR><TD align=\"right\" colspan=\"2\">\
             <FONT FACE=\"courier\" POINT-SIZE=\"10\" color=\"blue\">Range: </FONT>\
             <FONT FACE=\"courier\" POINT-SIZE=\"12\">{}:{}</FONT>\
             </TD></TR> ",
            range.low, range.high
        );
    }

    let _ = writeln!(out, "</TABLE>>]; \n");
}

impl FlowExporter for DotFlowExporter {
    fn export_flow(&self, flow: &Flow, _insns: &InsnMap, path: &Path) -> Result<()> {
        info!(flow = %flow.name(), "exporting flow to dot");

        let mut stream = open_append(path).inspect_err(|_| {
            error!(path = %path.display(), "could not open output file");
        })?;
        stream.write_all(self.render(flow).as_bytes())?;
        writeln!(stream)?;
        Ok(())
    }
}
