//! A `DebugInfoProvider` for ELF, PE and Mach-O binaries. Symbols come from the symbol table and
//! compilands, section contributions and line tables come from DWARF.
//!
//! All tables are built up front, so the file is only read once and the provider doesn't borrow
//! from it afterwards.

use crate::debug_info::CompilandId;
use crate::debug_info::CompilandSources;
use crate::debug_info::DebugInfoProvider;
use crate::debug_info::DebugStream;
use crate::debug_info::DebugSymbol;
use crate::debug_info::LocationKind;
use crate::debug_info::SectionContribution;
use crate::debug_info::SectionHeader;
use crate::debug_info::SymbolScope;
use crate::debug_info::SymbolTag;
use crate::error::Result;
use crate::path_utils;
use anyhow::Context as _;
use object::Object as _;
use object::ObjectSection as _;
use object::ObjectSymbol as _;
use object::SectionFlags;
use object::SectionKind;
use object::SymbolKind;
use std::borrow::Cow;
use std::collections::HashMap;
use std::collections::hash_map;
use std::path::Path;
use std::path::PathBuf;
use symbolic_common::Name;
use symbolic_demangle::Demangle as _;
use symbolic_demangle::DemangleOptions;

/// Compiland ID used for parts of sections that no DWARF unit claims.
const NO_COMPILAND: CompilandId = CompilandId::MAX;

const SEPARATE_DEBUG_EXTENSION: &str = "debug";

type DwarfReader<'data> = gimli::EndianSlice<'data, gimli::RunTimeEndian>;

pub struct ObjectDebugInfo {
    contributions: Vec<SectionContribution>,
    compilands: Vec<CompilandSources>,
    symbols: Vec<TableSymbol>,

    /// Sorted by address.
    line_rows: Vec<LineRow>,

    /// Paths referenced by `line_rows`.
    line_files: Vec<String>,

    section_headers: Vec<SectionHeader>,
    debug_section_names: Vec<String>,
}

struct TableSymbol {
    symbol: DebugSymbol,
    is_global: bool,
    compiland_id: Option<CompilandId>,
}

#[derive(Debug, Clone, Copy)]
struct LineRow {
    rva: u64,
    file_index: usize,
}

/// A section that occupies memory at runtime.
struct LoadedSection {
    rva: u64,
    size: u64,
    is_code: bool,
    is_writable: bool,
    is_uninitialised_data: bool,
}

/// An address range covered by a DWARF unit.
#[derive(Debug, Clone, Copy)]
struct UnitRange {
    begin: u64,
    end: u64,
    compiland_id: CompilandId,
}

#[derive(Default)]
struct DwarfTables {
    unit_ranges: Vec<UnitRange>,
    compilands: Vec<CompilandSources>,
    line_rows: Vec<LineRow>,
    line_files: Vec<String>,
}

impl ObjectDebugInfo {
    /// Reads `path`. If it doesn't contain DWARF, then each directory in `search_path` is checked
    /// for a separate debug file named after it.
    #[tracing::instrument(skip_all, name = "Open debug info")]
    pub fn open(path: &Path, search_path: Option<&str>) -> Result<Self> {
        let data =
            std::fs::read(path).with_context(|| format!("Failed to read `{}`", path.display()))?;
        let image = object::File::parse(data.as_slice())
            .with_context(|| format!("Failed to parse `{}` as an object file", path.display()))?;

        if has_dwarf(&image) {
            return Self::from_objects(&image, &image);
        }

        let Some(debug_path) = find_separate_debug_file(path, search_path) else {
            tracing::debug!(path = %path.display(), "No DWARF found");
            return Self::from_objects(&image, &image);
        };
        tracing::debug!(path = %debug_path.display(), "Using separate debug file");
        let debug_data = std::fs::read(&debug_path)
            .with_context(|| format!("Failed to read `{}`", debug_path.display()))?;
        let debug_object = object::File::parse(debug_data.as_slice()).with_context(|| {
            format!("Failed to parse `{}` as an object file", debug_path.display())
        })?;
        Self::from_objects(&image, &debug_object)
    }

    /// Builds tables using sections and symbols from `image` and DWARF from `debug`, which may be
    /// the same file.
    fn from_objects(image: &object::File, debug: &object::File) -> Result<Self> {
        let base = image.relative_address_base();

        let mut loaded_sections = Vec::new();
        let mut section_headers = Vec::new();
        let mut debug_section_names = Vec::new();
        for section in image.sections() {
            let name = section.name().unwrap_or_default().to_owned();
            let kind = section.kind();
            let is_discardable = is_discardable(section.flags(), kind);
            if matches!(kind, SectionKind::Debug | SectionKind::DebugString) {
                debug_section_names.push(name.clone());
            }
            let Some(rva) = section.address().checked_sub(base) else {
                continue;
            };
            if !is_discardable && section.size() > 0 {
                loaded_sections.push(LoadedSection {
                    rva,
                    size: section.size(),
                    is_code: kind == SectionKind::Text,
                    is_writable: is_writable(section.flags(), kind),
                    is_uninitialised_data: matches!(
                        kind,
                        SectionKind::UninitializedData
                            | SectionKind::UninitializedTls
                            | SectionKind::Common
                    ),
                });
            }
            section_headers.push(SectionHeader {
                name,
                virtual_address: rva,
                virtual_size: section.size(),
                is_discardable,
            });
        }

        let mut dwarf = read_dwarf(debug).context("Failed to read DWARF")?;
        for range in &mut dwarf.unit_ranges {
            range.begin = range.begin.saturating_sub(base);
            range.end = range.end.saturating_sub(base);
        }
        for row in &mut dwarf.line_rows {
            row.rva = row.rva.saturating_sub(base);
        }
        dwarf.line_rows.sort_by_key(|row| row.rva);

        let contributions = build_contributions(&loaded_sections, &mut dwarf.unit_ranges);
        let symbols = read_symbol_table(image, base, &contributions);

        tracing::debug!(
            sections = loaded_sections.len(),
            contributions = contributions.len(),
            compilands = dwarf.compilands.len(),
            symbols = symbols.len(),
            line_rows = dwarf.line_rows.len(),
            "Built debug info tables"
        );

        Ok(Self {
            contributions,
            compilands: dwarf.compilands,
            symbols,
            line_rows: dwarf.line_rows,
            line_files: dwarf.line_files,
            section_headers,
            debug_section_names,
        })
    }
}

fn has_dwarf(object: &object::File) -> bool {
    object
        .section_by_name(gimli::SectionId::DebugInfo.name())
        .is_some()
}

/// Looks for `<name>.debug` or `<stem>.debug` in each directory of `search_path`.
fn find_separate_debug_file(path: &Path, search_path: Option<&str>) -> Option<PathBuf> {
    let search_path = search_path?;
    let file_name = path.file_name()?;

    let mut with_suffix = file_name.to_owned();
    with_suffix.push(".");
    with_suffix.push(SEPARATE_DEBUG_EXTENSION);
    let mut candidates = vec![PathBuf::from(with_suffix)];
    if let Some(stem) = path.file_stem()
        && stem != file_name
    {
        candidates.push(Path::new(stem).with_extension(SEPARATE_DEBUG_EXTENSION));
    }

    std::env::split_paths(search_path)
        .flat_map(|dir| candidates.iter().map(move |c| dir.join(c)))
        .find(|candidate| candidate.is_file())
}

fn is_discardable(flags: SectionFlags, kind: SectionKind) -> bool {
    match flags {
        SectionFlags::Elf { sh_flags } => sh_flags & u64::from(object::elf::SHF_ALLOC) == 0,
        SectionFlags::Coff { characteristics } => {
            characteristics & object::pe::IMAGE_SCN_MEM_DISCARDABLE != 0
        }
        _ => matches!(
            kind,
            SectionKind::Debug
                | SectionKind::DebugString
                | SectionKind::Linker
                | SectionKind::Metadata
                | SectionKind::Unknown
        ),
    }
}

fn is_writable(flags: SectionFlags, kind: SectionKind) -> bool {
    match flags {
        SectionFlags::Elf { sh_flags } => sh_flags & u64::from(object::elf::SHF_WRITE) != 0,
        SectionFlags::Coff { characteristics } => {
            characteristics & object::pe::IMAGE_SCN_MEM_WRITE != 0
        }
        _ => matches!(
            kind,
            SectionKind::Data
                | SectionKind::UninitializedData
                | SectionKind::Common
                | SectionKind::Tls
                | SectionKind::UninitializedTls
        ),
    }
}

/// Reads compilands, their address ranges and line tables. Addresses are not yet relative to the
/// image base.
fn read_dwarf(object: &object::File) -> Result<DwarfTables> {
    let endian = if object.is_little_endian() {
        gimli::RunTimeEndian::Little
    } else {
        gimli::RunTimeEndian::Big
    };

    let dwarf_sections = gimli::DwarfSections::load(|id: gimli::SectionId| -> Result<Cow<[u8]>> {
        match object.section_by_name(id.name()) {
            Some(section) => Ok(section.uncompressed_data()?),
            None => Ok(Cow::Borrowed(&[][..])),
        }
    })?;
    let dwarf =
        dwarf_sections.borrow(|section| gimli::EndianSlice::new(Cow::as_ref(section), endian));

    let mut tables = DwarfTables::default();
    let mut interned_files: HashMap<String, usize> = HashMap::new();

    let mut units = dwarf.units();
    let mut compiland_id: CompilandId = 0;
    while let Some(header) = units.next()? {
        let unit = dwarf.unit(header)?;
        let id = compiland_id;
        compiland_id += 1;

        let mut ranges = dwarf.unit_ranges(&unit)?;
        while let Some(range) = ranges.next()? {
            if range.begin < range.end {
                tables.unit_ranges.push(UnitRange {
                    begin: range.begin,
                    end: range.end,
                    compiland_id: id,
                });
            }
        }

        let mut files = Vec::new();
        if let Some(program) = unit.line_program.clone() {
            let line_header = program.header();
            for file in line_header.file_names() {
                let path = file_path(&dwarf, &unit, line_header, file)?;
                if !files.contains(&path) {
                    files.push(path);
                }
            }

            // Maps this unit's file indexes to indexes into `line_files`.
            let mut unit_files: HashMap<u64, usize> = HashMap::new();
            let mut rows = program.rows();
            while let Some((line_header, row)) = rows.next_row()? {
                if row.end_sequence() {
                    continue;
                }
                let file_index = match unit_files.entry(row.file_index()) {
                    hash_map::Entry::Occupied(entry) => *entry.get(),
                    hash_map::Entry::Vacant(entry) => {
                        let Some(file) = row.file(line_header) else {
                            continue;
                        };
                        let path = file_path(&dwarf, &unit, line_header, file)?;
                        let next_index = tables.line_files.len();
                        let index = *interned_files.entry(path.clone()).or_insert(next_index);
                        if index == next_index {
                            tables.line_files.push(path);
                        }
                        *entry.insert(index)
                    }
                };
                tables.line_rows.push(LineRow {
                    rva: row.address(),
                    file_index,
                });
            }
        }

        tables.compilands.push(CompilandSources {
            compiland_id: id,
            files,
        });
    }

    Ok(tables)
}

fn file_path(
    dwarf: &gimli::Dwarf<DwarfReader<'_>>,
    unit: &gimli::Unit<DwarfReader<'_>>,
    header: &gimli::LineProgramHeader<DwarfReader<'_>>,
    file: &gimli::FileEntry<DwarfReader<'_>>,
) -> Result<String> {
    let mut path = String::new();
    if let Some(comp_dir) = &unit.comp_dir {
        path = comp_dir.to_string_lossy().into_owned();
    }
    if let Some(directory) = file.directory(header) {
        push_component(&mut path, &dwarf.attr_string(unit, directory)?.to_string_lossy());
    }
    push_component(
        &mut path,
        &dwarf.attr_string(unit, file.path_name())?.to_string_lossy(),
    );
    Ok(path)
}

/// Appends `component` to `path`. A rooted component replaces `path` entirely.
fn push_component(path: &mut String, component: &str) {
    if component.is_empty() {
        return;
    }
    if path_utils::is_rooted(component) {
        component.clone_into(path);
        return;
    }
    if !path.is_empty() && !path.ends_with(path_utils::is_separator) {
        path.push('/');
    }
    path.push_str(component);
}

/// Splits each loaded section into contributions, attributing each part to the DWARF unit that
/// covers it. Parts that no unit covers still get a contribution, so that data in them can be
/// classified. The result is sorted by address.
fn build_contributions(
    sections: &[LoadedSection],
    unit_ranges: &mut [UnitRange],
) -> Vec<SectionContribution> {
    unit_ranges.sort_by_key(|r| r.begin);

    let mut contributions = Vec::new();
    for section in sections {
        let section_end = section.rva + section.size;
        let mut push = |rva: u64, end: u64, compiland_id: CompilandId| {
            contributions.push(SectionContribution {
                rva,
                length: end - rva,
                compiland_id,
                is_code: section.is_code,
                is_writable: section.is_writable,
                is_uninitialised_data: section.is_uninitialised_data,
            });
        };

        let mut cursor = section.rva;
        for range in unit_ranges
            .iter()
            .filter(|r| r.begin < section_end && r.end > section.rva)
        {
            // Overlapping units are unusual. The first unit to claim an address keeps it.
            let begin = range.begin.max(cursor);
            let end = range.end.min(section_end);
            if begin >= end {
                continue;
            }
            if begin > cursor {
                push(cursor, begin, NO_COMPILAND);
            }
            push(begin, end, range.compiland_id);
            cursor = end;
        }
        if cursor < section_end {
            push(cursor, section_end, NO_COMPILAND);
        }
    }
    contributions.sort_by_key(|c| c.rva);
    contributions
}

fn read_symbol_table(
    image: &object::File,
    base: u64,
    contributions: &[SectionContribution],
) -> Vec<TableSymbol> {
    let mut table = Vec::new();
    let symbols = if image.symbols().next().is_some() {
        image.symbols()
    } else {
        image.dynamic_symbols()
    };
    for symbol in symbols {
        if symbol.is_undefined() || (!symbol.is_definition() && symbol.kind() != SymbolKind::Tls) {
            continue;
        }
        let (is_code, location) = match symbol.kind() {
            SymbolKind::Text => (true, LocationKind::Static),
            SymbolKind::Data => (false, LocationKind::Static),
            SymbolKind::Tls => (false, LocationKind::ThreadLocal),
            _ => continue,
        };
        let Ok(raw_name) = symbol.name() else {
            continue;
        };
        if raw_name.is_empty() {
            continue;
        }
        let Some(rva) = symbol.address().checked_sub(base) else {
            continue;
        };

        let (name, undecorated_name) = demangle(raw_name);
        let size = symbol.size();
        table.push(TableSymbol {
            symbol: DebugSymbol {
                name: Some(name),
                undecorated_name,
                rva,
                length: size,
                location,
                type_length: (!is_code && size > 0).then_some(size),
                is_code,
            },
            is_global: symbol.is_global(),
            compiland_id: compiland_at(contributions, rva),
        });
    }
    table
}

/// `contributions` must be sorted by address.
fn compiland_at(contributions: &[SectionContribution], rva: u64) -> Option<CompilandId> {
    let index = contributions.partition_point(|c| c.rva <= rva);
    let contribution = contributions.get(index.checked_sub(1)?)?;
    (rva < contribution.rva + contribution.length && contribution.compiland_id != NO_COMPILAND)
        .then_some(contribution.compiland_id)
}

/// Returns the name without parameters, and the full demangled name if `raw` is mangled.
fn demangle(raw: &str) -> (String, Option<String>) {
    let name = Name::from(raw);
    let full = name
        .demangle(DemangleOptions::complete())
        .filter(|full| full != raw);
    let short = name
        .demangle(DemangleOptions::name_only())
        .unwrap_or_else(|| raw.to_owned());
    (short, full)
}

impl TableSymbol {
    fn matches(&self, tag: SymbolTag, scope: SymbolScope) -> bool {
        let is_code = self.symbol.is_code;
        match (tag, scope) {
            (SymbolTag::Public, SymbolScope::Global) => self.is_global,
            (SymbolTag::Function, SymbolScope::Global) => is_code,
            (SymbolTag::Data, SymbolScope::Global) => {
                !is_code && (self.is_global || self.compiland_id.is_none())
            }
            (SymbolTag::Data, SymbolScope::Compiland(id)) => {
                !is_code && !self.is_global && self.compiland_id == Some(id)
            }
            // Functions are all read from the global scope. Symbol tables don't describe thunks.
            (SymbolTag::Function | SymbolTag::Public | SymbolTag::Thunk, _) => false,
        }
    }
}

impl DebugInfoProvider for ObjectDebugInfo {
    fn section_contributions(&self) -> Result<Vec<SectionContribution>> {
        Ok(self.contributions.clone())
    }

    fn compilands(&self) -> Result<Vec<CompilandId>> {
        Ok(self.compilands.iter().map(|c| c.compiland_id).collect())
    }

    fn source_files_by_compiland(&self) -> Result<Vec<CompilandSources>> {
        Ok(self.compilands.clone())
    }

    fn enumerate_symbols(&self, tag: SymbolTag, scope: SymbolScope) -> Result<Vec<DebugSymbol>> {
        Ok(self
            .symbols
            .iter()
            .filter(|s| s.matches(tag, scope))
            .map(|s| s.symbol.clone())
            .collect())
    }

    fn lines_for_address_range(&self, rva: u64, length: u64) -> Result<Vec<String>> {
        let end = rva.saturating_add(length);
        let start = self.line_rows.partition_point(|row| row.rva < rva);
        Ok(self.line_rows[start..]
            .iter()
            .take_while(|row| row.rva < end)
            .map(|row| self.line_files[row.file_index].clone())
            .collect())
    }

    fn debug_streams(&self) -> Result<Vec<DebugStream>> {
        let mut streams = vec![DebugStream::SectionHeaders(self.section_headers.clone())];
        streams.extend(
            self.debug_section_names
                .iter()
                .map(|name| DebugStream::Other { name: name.clone() }),
        );
        Ok(streams)
    }
}
