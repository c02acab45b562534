//! Exporter integration: JSON round trip, CSV and DOT output shapes.

mod common;

use std::path::Path;

use bincfg::analysis::cfg::FlowGenerator;
use bincfg::export::json::FlowDocument;
use bincfg::export::{CsvFlowExporter, DotFlowExporter, FlowExporter, JsonFlowExporter};
use common::{generate_avr, read_section};

const LISTING: &str = "Disassembly of section .text:\n\n\
                       00000000 <main>:\n\
                       \x20  0:\t0e 94 08 00 \tcall\t0x10\t; 0x10 <f>\n\
                       \x20  4:\t08 95       \tret\n\n\
                       00000010 <f>:\n\
                       \x20 10:\t0e 94 0c 00 \tcall\t0x18\t; 0x18 <g>\n\
                       \x20 14:\t00 00       \tnop\n\
                       \x20 16:\t08 95       \tret\n\n\
                       00000018 <g>:\n\
                       \x20 18:\t08 95       \tret\n";

fn parse_documents(path: &Path) -> Vec<FlowDocument> {
    let content = std::fs::read_to_string(path).unwrap();
    content
        .split("\n\n")
        .filter(|chunk| !chunk.trim().is_empty())
        .map(|chunk| serde_json::from_str(chunk).expect("valid flow document"))
        .collect()
}

#[test]
fn json_export_round_trips() {
    let flows = generate_avr(LISTING);
    let section = read_section(LISTING);

    let file = tempfile::NamedTempFile::new().unwrap();
    let exporter = JsonFlowExporter::new();
    for flow in flows.values() {
        exporter
            .export_flow(flow, section.instructions(), file.path())
            .unwrap();
    }

    let documents = parse_documents(file.path());
    assert_eq!(documents.len(), flows.len());

    for (flow, document) in flows.values().zip(&documents) {
        assert_eq!(document.doc_type, "Flow");
        assert_eq!(document.name, flow.name());
        // The parsed document equals the one built from the flow: block
        // set, edge set, types and callee lists all survive the trip.
        assert_eq!(document, &JsonFlowExporter::flow_document(flow));

        let entries: Vec<i64> = document.basic_blocks.iter().map(|b| b.id).collect();
        assert!(entries.contains(&-1), "missing Entry node");
        assert!(entries.contains(&-2), "missing Exit node");
    }

    // The call flow carries its FunctionCall pseudo-block and callees.
    let f_doc = documents
        .iter()
        .find(|d| d.name == "f")
        .expect("flow for f");
    let fcall = f_doc
        .basic_blocks
        .iter()
        .find(|b| b.block_type == "FunctionCall")
        .expect("FunctionCall block");
    assert_eq!(fcall.calls.as_deref(), Some(&["g".to_string()][..]));
    assert!(f_doc.edges.contains(&(0x10, fcall.id)));
    assert!(f_doc.edges.contains(&(fcall.id, 0x14)));
}

#[test]
fn json_insn_and_symbol_maps() {
    let section = read_section(LISTING);
    let generator = FlowGenerator::for_arch("avr", false).unwrap();
    let exporter = JsonFlowExporter::new();

    let file = tempfile::NamedTempFile::new().unwrap();
    exporter
        .export_insn_map(section.instructions(), &generator, ".text", file.path())
        .unwrap();
    exporter
        .export_symb_map(section.symbols(), ".text", file.path())
        .unwrap();

    let content = std::fs::read_to_string(file.path()).unwrap();
    let chunks: Vec<serde_json::Value> = content
        .split("\n\n")
        .filter(|chunk| !chunk.trim().is_empty())
        .map(|chunk| serde_json::from_str(chunk).unwrap())
        .collect();
    assert_eq!(chunks.len(), 2);

    assert_eq!(chunks[0]["Type"], "InsnMap");
    let insns = chunks[0]["Instructions"].as_array().unwrap();
    assert_eq!(insns.len(), section.instruction_count());
    let call = insns.iter().find(|i| i["Addr"] == 0).unwrap();
    assert_eq!(call["Mnem"], "CALL");
    assert_eq!(call["Target"][0], 0x10);

    assert_eq!(chunks[1]["Type"], "SymbolMap");
    let symbols = chunks[1]["Symbols"].as_array().unwrap();
    assert_eq!(symbols.len(), 3);
    assert_eq!(symbols[0]["Symbol"], "main");
}

#[test]
fn csv_export_emits_steps_for_every_flow() {
    let flows = generate_avr(LISTING);
    let section = read_section(LISTING);

    let mut exporter = CsvFlowExporter::new();
    exporter.set_add_func_blocks(true);
    let file = tempfile::NamedTempFile::new().unwrap();
    for flow in flows.values() {
        exporter
            .export_flow(flow, section.instructions(), file.path())
            .unwrap();
    }

    let content = std::fs::read_to_string(file.path()).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    // One header per appended flow.
    assert_eq!(
        lines
            .iter()
            .filter(|l| **l == "# Block number, Step address, Target address")
            .count(),
        flows.len()
    );
    // The call block of f: dummy row pair, then the tail block steps.
    assert!(lines.contains(&"16; 16; 16"));
    assert!(lines.contains(&"16; 16; 20"));
    assert!(lines.contains(&"20; 20; 22"));
    assert!(lines.contains(&"20; 22; "));
}

#[test]
fn dot_export_writes_digraphs() {
    let flows = generate_avr(LISTING);
    let section = read_section(LISTING);

    let mut exporter = DotFlowExporter::new();
    exporter.set_add_func_blocks(true);
    let file = tempfile::NamedTempFile::new().unwrap();
    for flow in flows.values() {
        exporter
            .export_flow(flow, section.instructions(), file.path())
            .unwrap();
    }

    let content = std::fs::read_to_string(file.path()).unwrap();
    assert_eq!(content.matches("digraph G {").count(), flows.len());
    assert_eq!(
        content.matches("[shape=circle, label=entry]").count(),
        flows.len()
    );
    assert_eq!(
        content.matches("[shape=doublecircle, label=exit]").count(),
        flows.len()
    );
    assert!(content.contains("label=\"f\";"));
    assert!(content.contains(">FCall</TD>"));
}
