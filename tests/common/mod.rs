//! Common test utilities.
//!
//! Integration tests drive the pipeline the way the CLI does: a literal
//! disassembly listing is written to disk, read back through the reader
//! and handed to the generator.
#![allow(dead_code)]

use std::io::Write;

use bincfg::analysis::cfg::{FlowGenerator, FlowMap};
use bincfg::core::basic_block::BlockKind;
use bincfg::core::disasm::DisasmSection;
use bincfg::core::flow::Flow;
use bincfg::disasm::DisassemblyReader;

/// Parse a disassembly listing into a `.text` section.
pub fn read_section(listing: &str) -> DisasmSection {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(listing.as_bytes()).unwrap();
    DisassemblyReader::new(file.path())
        .read_section(".text")
        .expect("listing must parse")
}

/// Run the full AVR pipeline over a listing.
pub fn generate_avr(listing: &str) -> FlowMap {
    let section = read_section(listing);
    FlowGenerator::for_arch("avr", false)
        .unwrap()
        .generate_flows(&section)
        .expect("flow generation must succeed")
}

/// The `(low, high)` pairs of every range of every block, ascending.
pub fn block_ranges(flow: &Flow) -> Vec<(u64, Vec<(u64, u64)>)> {
    flow.blocks()
        .iter()
        .map(|(&entry, block)| {
            (
                entry,
                block
                    .addr_ranges()
                    .iter()
                    .map(|r| (r.low, r.high))
                    .collect(),
            )
        })
        .collect()
}

/// Structural invariants every produced flow must satisfy.
pub fn assert_flow_invariants(flow: &Flow) {
    // Edge maps are mutual transposes and only reference real blocks.
    for (src, dst) in flow.edges() {
        assert!(
            flow.in_edges(dst).contains(&src),
            "edge ({src:#x},{dst:#x}) missing from in-edges"
        );
        assert!(flow.is_block_present(src), "edge source {src:#x} has no block");
        assert!(flow.is_block_present(dst), "edge target {dst:#x} has no block");
    }
    for (&entry, _) in flow.blocks() {
        for &src in flow.in_edges(entry) {
            assert!(
                flow.out_edges(src).contains(&entry),
                "in-edge ({src:#x},{entry:#x}) missing from out-edges"
            );
        }
    }

    // Marker addresses refer to existing blocks.
    assert!(flow.is_block_present(flow.post_entry()), "dangling post-entry");
    for &pre_exit in flow.pre_exits() {
        assert!(flow.is_block_present(pre_exit), "dangling pre-exit {pre_exit:#x}");
    }

    // Address ranges are pairwise disjoint across the whole flow.
    let mut ranges: Vec<(u64, u64)> = flow
        .blocks()
        .values()
        .flat_map(|b| b.addr_ranges().iter().map(|r| (r.low, r.high)))
        .collect();
    ranges.sort();
    for pair in ranges.windows(2) {
        assert!(
            pair[0].1 < pair[1].0,
            "overlapping ranges {:x?} and {:x?}",
            pair[0],
            pair[1]
        );
    }

    // Block ids are exactly 0..n-1.
    let mut ids: Vec<usize> = flow.blocks().values().map(|b| b.id()).collect();
    ids.sort();
    assert_eq!(ids, (0..flow.blocks().len()).collect::<Vec<_>>());

    // Every call site ends a Call block.
    for &site in flow.call_sites() {
        let block = flow
            .blocks()
            .values()
            .find(|b| b.contains(site))
            .unwrap_or_else(|| panic!("call site {site:#x} outside any block"));
        assert_eq!(block.last_addr(), site, "call site {site:#x} does not end its block");
        assert_eq!(block.kind(), BlockKind::Call);
    }
}
