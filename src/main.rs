use std::fs::File;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::{info, warn};

use bincfg::analysis::cfg::FlowGenerator;
use bincfg::arch;
use bincfg::cli::{Cli, EXIT_FAILURE};
use bincfg::disasm::DisassemblyReader;
use bincfg::dwarf::DebugData;
use bincfg::error::{BincfgError, Result};
use bincfg::export::{CsvFlowExporter, DotFlowExporter, FlowExporter, JsonFlowExporter};
use bincfg::logging;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.suppress_log {
        logging::init_tracing_quiet();
    } else {
        logging::init_tracing();
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {err}");
            ExitCode::from(EXIT_FAILURE as u8)
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    if cli.list_arch {
        println!("Supported architectures:");
        for name in arch::list() {
            println!(" {name}");
        }
        return Ok(());
    }

    // clap enforces these unless --list-arch was given.
    let asm = cli.asm.as_ref().expect("--asm is required");
    let arch_name = cli.arch.as_ref().expect("--arch is required");

    info!(path = %asm.display(), "reading disassembly");
    let section = DisassemblyReader::new(asm).read_section(".text")?;
    info!(
        instructions = section.instruction_count(),
        symbols = section.symbol_count(),
        "section read"
    );

    if let Some(flow_path) = &cli.flow {
        export_flows(cli, arch_name, &section, flow_path)?;
        info!(path = %flow_path.display(), "written flow file");
    }

    if let Some(debug_path) = &cli.debug {
        let elf = cli.elf.as_ref().ok_or_else(|| {
            BincfgError::MalformedInput("--elf is required with --debug".to_string())
        })?;
        export_debug(cli, elf, &section, debug_path)?;
        info!(path = %debug_path.display(), "written debug file");
    }

    Ok(())
}

fn export_flows(
    cli: &Cli,
    arch_name: &str,
    section: &bincfg::core::disasm::DisasmSection,
    flow_path: &Path,
) -> Result<()> {
    let generator = FlowGenerator::for_arch(arch_name, cli.ignore_errors)?;
    let flows = generator.generate_flows(section)?;
    if flows.is_empty() {
        warn!("no flows found");
    }

    // Attach line info to CSV output when the ELF is at hand.
    let debug_data = match (&cli.elf, extension(flow_path)) {
        (Some(elf), Some("csv")) => match DebugData::from_elf_path(elf) {
            Ok(debug) => Some(debug),
            Err(err) => {
                warn!(error = %err, "cannot read debug info, line columns stay empty");
                None
            }
        },
        _ => None,
    };

    // Exporters append; start from an empty file.
    File::create(flow_path)?;

    let exporter: Box<dyn FlowExporter + '_> = match extension(flow_path) {
        Some("csv") => {
            let mut csv = CsvFlowExporter::new();
            csv.set_add_func_blocks(true);
            if let Some(debug) = debug_data.as_ref() {
                csv.set_debug_data(debug);
            }
            Box::new(csv)
        }
        Some("dot") => {
            let mut dot = DotFlowExporter::new();
            dot.set_add_func_blocks(true);
            Box::new(dot)
        }
        _ => Box::new(JsonFlowExporter::new()),
    };

    for flow in flows.values() {
        info!(flow = %flow.name(), "writing flow");
        exporter.export_flow(flow, section.instructions(), flow_path)?;
    }

    if !matches!(extension(flow_path), Some("csv") | Some("dot")) {
        let json = JsonFlowExporter::new();
        if cli.inc_insn {
            json.export_insn_map(section.instructions(), &generator, section.name(), flow_path)?;
        }
        if cli.inc_symb {
            json.export_symb_map(section.symbols(), section.name(), flow_path)?;
        }
    }

    Ok(())
}

fn export_debug(cli: &Cli, elf: &Path, section: &bincfg::core::disasm::DisasmSection, debug_path: &Path) -> Result<()> {
    info!(path = %elf.display(), "reading debug information");
    let debug = DebugData::from_elf_path(elf)?;
    if !debug.is_valid() {
        if !cli.ignore_errors {
            return Err(BincfgError::DebugInfo(
                "could not process dwarf data successfully".to_string(),
            ));
        }
        warn!("could not process dwarf data successfully (data invalid)");
    }

    File::create(debug_path)?;
    JsonFlowExporter::new().export_debug_data(&debug, section.instructions(), debug_path)
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|e| e.to_str())
}
