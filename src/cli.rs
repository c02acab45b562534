//! CLI definitions and argument types.

use std::path::PathBuf;

use clap::Parser;

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for failure.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "elf2flow")]
#[command(about = "Reconstructs control flow graphs from disassembled ELF objects")]
#[command(version)]
pub struct Cli {
    /// File path of the disassembled object
    #[arg(short = 'm', long = "asm", value_name = "PATH", required_unless_present = "list_arch")]
    pub asm: Option<PathBuf>,

    /// Select architecture
    #[arg(short = 'a', long = "arch", value_name = "NAME", required_unless_present = "list_arch")]
    pub arch: Option<String>,

    /// Output path of flow information (JSON/CSV/dot, chosen by extension)
    #[arg(short = 'f', long = "flow", value_name = "PATH")]
    pub flow: Option<PathBuf>,

    /// Output path of debug information (JSON)
    #[arg(short = 'd', long = "debug", value_name = "PATH")]
    pub debug: Option<PathBuf>,

    /// File path of the ELF object (required with --debug)
    #[arg(short = 'e', long = "elf", value_name = "PATH")]
    pub elf: Option<PathBuf>,

    /// Export disassembled instructions when exporting to JSON
    #[arg(short = 'i', long = "inc-insn")]
    pub inc_insn: bool,

    /// Export the symbol map when exporting to JSON
    #[arg(short = 's', long = "inc-symb")]
    pub inc_symb: bool,

    /// Plough on despite hazards
    #[arg(long = "ignore-errors")]
    pub ignore_errors: bool,

    /// Suppress logging
    #[arg(long = "suppress-log")]
    pub suppress_log: bool,

    /// List supported architectures
    #[arg(short = 'l', long = "list-arch")]
    pub list_arch: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_args() {
        assert!(Cli::try_parse_from(["elf2flow"]).is_err());
        assert!(Cli::try_parse_from(["elf2flow", "--asm", "a.lst"]).is_err());

        let cli =
            Cli::try_parse_from(["elf2flow", "--asm", "a.lst", "--arch", "avr"]).unwrap();
        assert_eq!(cli.arch.as_deref(), Some("avr"));
        assert!(!cli.ignore_errors);
    }

    #[test]
    fn test_list_arch_waives_required_args() {
        let cli = Cli::try_parse_from(["elf2flow", "--list-arch"]).unwrap();
        assert!(cli.list_arch);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "elf2flow",
            "-m",
            "a.lst",
            "-a",
            "avr",
            "-f",
            "out.json",
            "-i",
            "-s",
            "--ignore-errors",
        ])
        .unwrap();
        assert!(cli.inc_insn && cli.inc_symb && cli.ignore_errors);
        assert_eq!(cli.flow.as_deref(), Some(std::path::Path::new("out.json")));
    }
}
