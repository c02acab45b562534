//! DWARF debug-line reading.
//!
//! The rest of the repository consumes exactly one interface from this
//! module: [`DebugData::line_info`], mapping an instruction address to
//! its source file, line and column. Address-to-CU attribution comes
//! from `.debug_aranges`; line rows from the `.debug_line` programs. A
//! filtered DIE dump is kept for the debug JSON export.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;

use object::{Object, ObjectSection};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{BincfgError, Result};

type Slice<'a> = gimli::EndianSlice<'a, gimli::RunTimeEndian>;

/// One debug-line table row, covering `[low_pc, high_pc)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInfoEntry {
    pub cu: u64,
    pub file_index: u64,
    pub file: String,
    pub line: u64,
    pub column: u64,
    pub low_pc: u64,
    pub high_pc: u64,
}

/// A compilation unit, identified by its `.debug_info` offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationUnit {
    pub id: u64,
    pub name: String,
    pub comp_dir: String,
}

/// A debugging information entry reduced to strings, for export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugDie {
    pub offset: u64,
    pub parent_offset: u64,
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
}

/// Decoded debug data of one ELF object.
#[derive(Debug, Clone, Default)]
pub struct DebugData {
    aranges: BTreeMap<u64, (u64, u64)>,
    lines: BTreeMap<u64, LineInfoEntry>,
    units: Vec<CompilationUnit>,
    dies: Vec<DebugDie>,
    valid: bool,
}

const EXPORTED_TAGS: &[gimli::DwTag] = &[
    gimli::DW_TAG_compile_unit,
    gimli::DW_TAG_subprogram,
    gimli::DW_TAG_inlined_subroutine,
    gimli::DW_TAG_variable,
    gimli::DW_TAG_base_type,
    gimli::DW_TAG_lexical_block,
];

fn dbg_err(e: gimli::Error) -> BincfgError {
    BincfgError::DebugInfo(e.to_string())
}

impl DebugData {
    /// Read and decode the debug sections of an ELF file.
    pub fn from_elf_path(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_elf_bytes(&data)
    }

    pub fn from_elf_bytes(data: &[u8]) -> Result<Self> {
        let obj = object::File::parse(data).map_err(|e| BincfgError::DebugInfo(e.to_string()))?;
        let endian = if obj.is_little_endian() {
            gimli::RunTimeEndian::Little
        } else {
            gimli::RunTimeEndian::Big
        };

        let load = |id: gimli::SectionId| -> std::result::Result<Cow<[u8]>, gimli::Error> {
            Ok(obj
                .section_by_name(id.name())
                .and_then(|section| section.uncompressed_data().ok())
                .unwrap_or(Cow::Borrowed(&[][..])))
        };
        let sections = gimli::DwarfSections::load(load).map_err(dbg_err)?;
        let dwarf = sections.borrow(|section| gimli::EndianSlice::new(section.as_ref(), endian));

        let mut debug = DebugData::default();
        debug.read_aranges(&obj, endian)?;
        debug.read_units(&dwarf)?;
        debug.valid = !debug.lines.is_empty() || !debug.units.is_empty();
        Ok(debug)
    }

    fn read_aranges(&mut self, obj: &object::File<'_>, endian: gimli::RunTimeEndian) -> Result<()> {
        let data = obj
            .section_by_name(".debug_aranges")
            .and_then(|section| section.uncompressed_data().ok())
            .unwrap_or_default();
        let debug_aranges = gimli::DebugAranges::new(data.as_ref(), endian);

        let mut warned = false;
        let mut headers = debug_aranges.headers();
        while let Some(header) = headers.next().map_err(dbg_err)? {
            let cu_offset = header.debug_info_offset().0 as u64;
            let mut entries = header.entries();
            while let Some(entry) = entries.next().map_err(dbg_err)? {
                Self::insert_arange(
                    &mut self.aranges,
                    &mut warned,
                    entry.address(),
                    entry.length(),
                    cu_offset,
                );
            }
        }
        Ok(())
    }

    /// Insert one address range, dropping it when it overlaps an already
    /// recorded one. Only the first overlap is reported.
    fn insert_arange(
        map: &mut BTreeMap<u64, (u64, u64)>,
        warned: &mut bool,
        start: u64,
        length: u64,
        cu_offset: u64,
    ) -> bool {
        if length == 0 {
            return false;
        }
        let end = start.saturating_add(length);
        let overlaps_below = map
            .range(..=start)
            .next_back()
            .is_some_and(|(&s, &(l, _))| s.saturating_add(l) > start);
        let overlaps_above = map.range(start..end).next().is_some();
        if overlaps_below || overlaps_above {
            if !*warned {
                warn!(
                    start = format_args!("{start:#x}"),
                    "overlapping .debug_aranges entries, subsequent occurrences dropped"
                );
                *warned = true;
            }
            return false;
        }
        map.insert(start, (length, cu_offset));
        true
    }

    fn read_units(&mut self, dwarf: &gimli::Dwarf<Slice<'_>>) -> Result<()> {
        let mut iter = dwarf.units();
        while let Some(header) = iter.next().map_err(dbg_err)? {
            let cu_id = header
                .offset()
                .as_debug_info_offset()
                .map(|offset| offset.0 as u64)
                .unwrap_or(0);
            let unit = dwarf.unit(header).map_err(dbg_err)?;

            self.units.push(CompilationUnit {
                id: cu_id,
                name: unit
                    .name
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                comp_dir: unit
                    .comp_dir
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            });

            self.read_dies(dwarf, &unit)?;
            self.read_line_rows(dwarf, &unit, cu_id)?;
        }
        Ok(())
    }

    fn read_dies(&mut self, dwarf: &gimli::Dwarf<Slice<'_>>, unit: &gimli::Unit<Slice<'_>>) -> Result<()> {
        let mut ancestors: Vec<u64> = Vec::new();
        let mut depth: isize = 0;

        let mut cursor = unit.entries();
        while let Some((delta, entry)) = cursor.next_dfs().map_err(dbg_err)? {
            depth += delta;
            ancestors.truncate(depth.max(0) as usize);

            let offset = entry
                .offset()
                .to_debug_info_offset(&unit.header)
                .map(|o| o.0 as u64)
                .unwrap_or(0);
            let parent_offset = ancestors.last().copied().unwrap_or(0);

            if EXPORTED_TAGS.contains(&entry.tag()) {
                let mut attributes = BTreeMap::new();
                let mut attrs = entry.attrs();
                while let Some(attr) = attrs.next().map_err(dbg_err)? {
                    let name = attr.name().static_string().unwrap_or("DW_AT_unknown");
                    attributes.insert(name.to_string(), render_attr(dwarf, unit, &attr.value()));
                }
                self.dies.push(DebugDie {
                    offset,
                    parent_offset,
                    tag: entry.tag().static_string().unwrap_or("DW_TAG_unknown").to_string(),
                    attributes,
                });
            }

            ancestors.push(offset);
        }
        Ok(())
    }

    fn read_line_rows(
        &mut self,
        dwarf: &gimli::Dwarf<Slice<'_>>,
        unit: &gimli::Unit<Slice<'_>>,
        cu_id: u64,
    ) -> Result<()> {
        let Some(program) = unit.line_program.clone() else {
            return Ok(());
        };

        // Each row opens at its address and closes at the next row's
        // address within the same sequence.
        let mut open: Option<LineInfoEntry> = None;
        let mut rows = program.rows();
        while let Some((header, row)) = rows.next_row().map_err(dbg_err)? {
            let addr = row.address();

            if let Some(mut entry) = open.take() {
                if addr > entry.low_pc {
                    entry.high_pc = addr;
                    self.lines.insert(entry.low_pc, entry);
                }
            }
            if row.end_sequence() {
                continue;
            }

            let file = row
                .file(header)
                .and_then(|f| dwarf.attr_string(unit, f.path_name()).ok())
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            open = Some(LineInfoEntry {
                cu: cu_id,
                file_index: row.file_index(),
                file,
                line: row.line().map(|l| l.get()).unwrap_or(0),
                column: match row.column() {
                    gimli::ColumnType::LeftEdge => 0,
                    gimli::ColumnType::Column(c) => c.get(),
                },
                low_pc: addr,
                high_pc: addr,
            });
        }
        Ok(())
    }

    /// Look up the line entry covering `vma`, if any.
    pub fn line_info(&self, vma: u64) -> Option<&LineInfoEntry> {
        let (_, entry) = self.lines.range(..=vma).next_back()?;
        (vma < entry.high_pc).then_some(entry)
    }

    /// Whether any usable debug information was found.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// All line entries, keyed by their low pc.
    pub fn line_entries(&self) -> &BTreeMap<u64, LineInfoEntry> {
        &self.lines
    }

    pub fn compilation_units(&self) -> &[CompilationUnit] {
        &self.units
    }

    pub fn dies(&self) -> &[DebugDie] {
        &self.dies
    }

    /// `.debug_aranges` coverage: start -> (length, CU offset).
    pub fn aranges(&self) -> &BTreeMap<u64, (u64, u64)> {
        &self.aranges
    }
}

fn render_attr(
    dwarf: &gimli::Dwarf<Slice<'_>>,
    unit: &gimli::Unit<Slice<'_>>,
    value: &gimli::AttributeValue<Slice<'_>>,
) -> String {
    use gimli::AttributeValue::*;

    // String-class forms first.
    if let Ok(s) = dwarf.attr_string(unit, value.clone()) {
        return s.to_string_lossy().into_owned();
    }

    match value {
        Addr(a) => format!("{a:#x}"),
        Udata(v) => v.to_string(),
        Sdata(v) => v.to_string(),
        Data1(v) => v.to_string(),
        Data2(v) => v.to_string(),
        Data4(v) => v.to_string(),
        Data8(v) => v.to_string(),
        Flag(f) => f.to_string(),
        FileIndex(i) => format!("file#{i}"),
        UnitRef(offset) => format!("<unit+{:#x}>", offset.0),
        DebugInfoRef(offset) => format!("<info+{:#x}>", offset.0),
        Language(lang) => lang.static_string().unwrap_or("DW_LANG_unknown").to_string(),
        Encoding(enc) => enc.static_string().unwrap_or("DW_ATE_unknown").to_string(),
        Exprloc(_) => "<exprloc>".to_string(),
        other => format!("<{other:?}>"),
    }
}
