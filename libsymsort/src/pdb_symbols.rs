//! Reads symbols out of structured debug info, via a `DebugInfoProvider`.
//!
//! Symbols overlap in the address space and are listed redundantly under different tags, names and
//! scopes. We read them in priority order, so that when overlaps are later resolved, the symbols
//! read first win.

use crate::debug_info::CompilandId;
use crate::debug_info::DebugInfoProvider;
use crate::debug_info::DebugSymbol;
use crate::debug_info::LocationKind;
use crate::debug_info::SectionContribution;
use crate::debug_info::SymbolScope;
use crate::debug_info::SymbolTag;
use crate::error::Result;
use crate::progress::PercentTracker;
use crate::progress::ProgressSink;
use crate::resolution;
use crate::symbol::Symbol;
use crate::symbol::SymbolFlags;
use std::collections::HashMap;

const THUNK_PLACEHOLDER_NAME: &str = "[thunk]";
const SECTION_NAME_PREFIX: &str = "[SECTION] ";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugInfoOptions {
    /// Read the public symbol table first. Public symbols usually include alignment padding in
    /// their sizes, so they take priority over the function and data symbols that they duplicate.
    pub include_public_symbols: bool,

    /// Don't resolve overlaps. Gaps are still filled.
    pub keep_redundant_symbols: bool,

    /// Add a symbol for each loaded section.
    pub include_sections_as_symbols: bool,
}

/// Section contributions sorted by address, for looking up which compiland an address belongs to.
struct ContributionTable {
    contributions: Vec<SectionContribution>,
}

impl ContributionTable {
    fn new(mut contributions: Vec<SectionContribution>) -> Self {
        contributions.sort_by_key(|c| c.rva);
        Self { contributions }
    }

    /// Returns the contribution whose range contains `rva`, if any.
    fn find(&self, rva: u64) -> Option<&SectionContribution> {
        let index = self.contributions.partition_point(|c| c.rva <= rva);
        let candidate = self.contributions.get(index.checked_sub(1)?)?;
        (rva < candidate.rva + candidate.length).then_some(candidate)
    }
}

/// How much a source file tells us about the compiland that references it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SourceFileType {
    Implementation,
    Unknown,
    Header,
}

impl SourceFileType {
    fn from_filename(filename: &str) -> SourceFileType {
        let basename = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
        let Some((_, extension)) = basename.rsplit_once('.') else {
            return SourceFileType::Unknown;
        };
        let extension = extension.to_ascii_lowercase();
        if extension.starts_with('c') {
            SourceFileType::Implementation
        } else if extension.starts_with('h') || extension == "pch" {
            SourceFileType::Header
        } else {
            SourceFileType::Unknown
        }
    }
}

/// The single source file that best represents each compiland. The best file is the one shared
/// with the fewest other compilands, which for a typical compiland is its own implementation file
/// rather than a common header.
struct CompilandFileMap {
    files: HashMap<CompilandId, String>,
}

impl CompilandFileMap {
    fn build(provider: &dyn DebugInfoProvider) -> Result<Self> {
        let compiland_sources = provider.source_files_by_compiland()?;

        let mut usage: HashMap<&str, usize> = HashMap::new();
        for sources in &compiland_sources {
            for file in &sources.files {
                *usage.entry(file.as_str()).or_default() += 1;
            }
        }

        let mut files = HashMap::new();
        for sources in &compiland_sources {
            let mut best: Option<(&str, usize, SourceFileType)> = None;
            for file in &sources.files {
                let count = usage.get(file.as_str()).copied().unwrap_or(0);
                let file_type = SourceFileType::from_filename(file);
                let is_better = match best {
                    None => true,
                    Some((_, best_count, best_type)) => {
                        count < best_count
                            || (count == best_count
                                && best_type != SourceFileType::Implementation
                                && file_type < best_type)
                    }
                };
                if is_better {
                    best = Some((file, count, file_type));
                }
            }
            let best = best.map_or_else(String::new, |(file, _, _)| file.to_lowercase());
            files.insert(sources.compiland_id, best);
        }

        Ok(Self { files })
    }

    fn source_for(&self, contribution: Option<&SectionContribution>) -> String {
        contribution
            .and_then(|c| self.files.get(&c.compiland_id))
            .cloned()
            .unwrap_or_default()
    }
}

/// State shared while reading each group of symbols.
struct SymbolReader<'a> {
    provider: &'a dyn DebugInfoProvider,
    contributions: ContributionTable,
    compiland_files: CompilandFileMap,
    symbols: Vec<Symbol>,
}

impl SymbolReader<'_> {
    fn read_scope(
        &mut self,
        tag: SymbolTag,
        scope: SymbolScope,
        extra_flags: SymbolFlags,
    ) -> Result {
        for debug_symbol in self.provider.enumerate_symbols(tag, scope)? {
            if let Some(symbol) = self.convert(tag, &debug_symbol, extra_flags)? {
                self.symbols.push(symbol);
            }
        }
        Ok(())
    }

    /// Reads `tag` symbols from each compiland in turn.
    fn read_compilands(
        &mut self,
        tag: SymbolTag,
        extra_flags: SymbolFlags,
        tracker: &mut PercentTracker,
    ) -> Result {
        let compilands = self.provider.compilands()?;
        for (index, compiland_id) in compilands.iter().enumerate() {
            self.read_scope(tag, SymbolScope::Compiland(*compiland_id), extra_flags)?;
            tracker.update(index + 1, compilands.len());
        }
        Ok(())
    }

    fn convert(
        &self,
        tag: SymbolTag,
        debug_symbol: &DebugSymbol,
        extra_flags: SymbolFlags,
    ) -> Result<Option<Symbol>> {
        if debug_symbol.location != LocationKind::Static {
            return Ok(None);
        }
        let size = match tag {
            SymbolTag::Data => match debug_symbol.type_length {
                Some(length) => length,
                None => return Ok(None),
            },
            _ if debug_symbol.length == 0 => return Ok(None),
            _ => debug_symbol.length,
        };
        let (Ok(rva_start), Ok(size)) = (i64::try_from(debug_symbol.rva), i64::try_from(size))
        else {
            tracing::debug!(rva = debug_symbol.rva, size, "Skipping out-of-range symbol");
            return Ok(None);
        };

        let mut short_name = debug_symbol.name.clone().unwrap_or_default();
        let mut name = debug_symbol
            .undecorated_name
            .clone()
            .unwrap_or_else(|| short_name.clone());

        let contribution = self.contributions.find(debug_symbol.rva);

        let (section, source, flags) = match tag {
            SymbolTag::Data => (
                classify_data(contribution),
                self.compiland_files.source_for(contribution),
                SymbolFlags::DATA,
            ),
            SymbolTag::Thunk => {
                for target in [&mut name, &mut short_name] {
                    if target.is_empty() {
                        THUNK_PLACEHOLDER_NAME.clone_into(target);
                    }
                }
                (
                    "thunk",
                    self.compiland_files.source_for(contribution),
                    SymbolFlags::THUNK,
                )
            }
            SymbolTag::Function => (
                "code",
                self.code_source(debug_symbol, contribution)?,
                SymbolFlags::FUNCTION,
            ),
            SymbolTag::Public if debug_symbol.is_code => (
                "code",
                self.code_source(debug_symbol, contribution)?,
                SymbolFlags::PUBLIC_SYMBOL,
            ),
            SymbolTag::Public => (
                classify_data(contribution),
                self.compiland_files.source_for(contribution),
                SymbolFlags::PUBLIC_SYMBOL,
            ),
        };

        let Some(symbol) = Symbol::checked_new(name, rva_start, size) else {
            tracing::trace!(rva = debug_symbol.rva, size, "Skipping symbol that overflows");
            return Ok(None);
        };
        Ok(Some(
            symbol
                .with_short_name(short_name)
                .with_section(section)
                .with_source(source)
                .with_flags(flags | extra_flags),
        ))
    }

    /// Code is attributed to the file of its first line table entry. Failing that, to the main file
    /// of the compiland that contributed it.
    fn code_source(
        &self,
        debug_symbol: &DebugSymbol,
        contribution: Option<&SectionContribution>,
    ) -> Result<String> {
        let lines = self
            .provider
            .lines_for_address_range(debug_symbol.rva, debug_symbol.length)?;
        Ok(match lines.into_iter().find(|file| !file.is_empty()) {
            Some(file) => file.to_lowercase(),
            None => self.compiland_files.source_for(contribution),
        })
    }

    fn read_section_headers(&mut self) -> Result {
        for header in self.provider.section_headers()? {
            if header.is_discardable {
                continue;
            }
            let (Ok(rva), Ok(size)) = (
                i64::try_from(header.virtual_address),
                i64::try_from(header.virtual_size),
            ) else {
                continue;
            };
            let name = format!("{SECTION_NAME_PREFIX}{}", header.name);
            let Some(symbol) = Symbol::checked_new(name, rva, size) else {
                tracing::trace!(section = %header.name, "Skipping section that overflows");
                continue;
            };
            self.symbols
                .push(symbol.with_section("section").with_flags(SymbolFlags::SECTION));
        }
        Ok(())
    }
}

fn classify_data(contribution: Option<&SectionContribution>) -> &'static str {
    match contribution {
        Some(c) if c.is_uninitialised_data => "bss",
        Some(c) if c.is_writable => "data",
        Some(_) => "rdata",
        None => "data",
    }
}

/// Reads all symbols from `provider`, then resolves overlaps between them according to `options`.
#[tracing::instrument(skip_all, name = "Read debug info symbols")]
pub fn read_symbols(
    provider: &dyn DebugInfoProvider,
    options: &DebugInfoOptions,
    progress: &mut dyn ProgressSink,
) -> Result<Vec<Symbol>> {
    let mut tracker = PercentTracker::new(progress);

    let mut reader = SymbolReader {
        provider,
        contributions: ContributionTable::new(provider.section_contributions()?),
        compiland_files: CompilandFileMap::build(provider)?,
        symbols: Vec::new(),
    };

    // Anything that's also listed as a public symbol is redundant if we've read the public symbols.
    let redundant_flag = if options.include_public_symbols {
        SymbolFlags::WEAK
    } else {
        SymbolFlags::empty()
    };

    if options.include_public_symbols {
        tracker.begin_step(0, 15);
        reader.read_scope(SymbolTag::Public, SymbolScope::Global, SymbolFlags::empty())?;
    }

    tracker.begin_step(15, 30);
    reader.read_scope(SymbolTag::Function, SymbolScope::Global, redundant_flag)?;

    tracker.begin_step(30, 50);
    reader.read_compilands(SymbolTag::Thunk, redundant_flag, &mut tracker)?;

    tracker.begin_step(50, 70);
    reader.read_compilands(SymbolTag::Data, redundant_flag, &mut tracker)?;

    // Global data is listed both as public symbols and under the compilands that define it.
    tracker.begin_step(70, 80);
    reader.read_scope(SymbolTag::Data, SymbolScope::Global, SymbolFlags::WEAK)?;

    if options.include_sections_as_symbols {
        tracker.begin_step(80, 85);
        reader.read_section_headers()?;
    }

    let mut symbols = reader.symbols;
    tracing::debug!(count = symbols.len(), "Read debug info symbols");

    tracker.begin_step(85, 100);
    if options.keep_redundant_symbols {
        resolution::add_symbols_for_missing_addresses(&mut symbols);
    } else {
        resolution::remove_overlapping_symbols(&mut symbols, true)?;
        resolution::remove_empty_weak_symbols(&mut symbols);
    }
    tracker.finish();

    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::FixtureDebugInfo;
    use crate::progress::NoProgress;

    fn contribution(rva: u64, length: u64, compiland_id: CompilandId) -> SectionContribution {
        SectionContribution {
            rva,
            length,
            compiland_id,
            is_code: false,
            is_writable: false,
            is_uninitialised_data: false,
        }
    }

    #[test]
    fn contribution_lookup() {
        let table = ContributionTable::new(vec![
            contribution(0x2000, 0x100, 2),
            contribution(0x1000, 0x100, 1),
        ]);
        assert_eq!(table.find(0x1000).map(|c| c.compiland_id), Some(1));
        assert_eq!(table.find(0x10ff).map(|c| c.compiland_id), Some(1));
        assert_eq!(table.find(0x1100), None);
        assert_eq!(table.find(0x20ff).map(|c| c.compiland_id), Some(2));
        assert_eq!(table.find(0xfff), None);
        assert_eq!(table.find(0x3000), None);
    }

    #[test]
    fn source_file_types() {
        assert_eq!(
            SourceFileType::from_filename("C:\\src\\Widget.CPP"),
            SourceFileType::Implementation
        );
        assert_eq!(
            SourceFileType::from_filename("/src/a.c"),
            SourceFileType::Implementation
        );
        assert_eq!(
            SourceFileType::from_filename("/inc/a.hpp"),
            SourceFileType::Header
        );
        assert_eq!(
            SourceFileType::from_filename("stdafx.pch"),
            SourceFileType::Header
        );
        assert_eq!(
            SourceFileType::from_filename("/src.d/readme"),
            SourceFileType::Unknown
        );
        assert_eq!(
            SourceFileType::from_filename("gen.inl"),
            SourceFileType::Unknown
        );
    }

    #[test]
    fn symbols_ending_past_the_address_space_are_skipped() {
        let data = |name: &str, rva: u64| DebugSymbol {
            name: Some(name.to_owned()),
            undecorated_name: None,
            rva,
            length: 0,
            location: LocationKind::Static,
            type_length: Some(0x10),
            is_code: false,
        };
        let provider = FixtureDebugInfo::new()
            .compiland(1, &["/src/a.c"])
            .symbol(
                SymbolTag::Data,
                SymbolScope::Compiland(1),
                data("table", 0x1000),
            )
            .symbol(
                SymbolTag::Data,
                SymbolScope::Compiland(1),
                data("wrapped", 0x7fff_ffff_ffff_fff8),
            );
        let options = DebugInfoOptions {
            keep_redundant_symbols: true,
            ..DebugInfoOptions::default()
        };

        let symbols = read_symbols(&provider, &options, &mut NoProgress).unwrap();
        itertools::assert_equal(
            symbols
                .iter()
                .filter(|s| !s.is_unmapped())
                .map(|s| s.name.as_str()),
            ["table"],
        );
    }

    #[test]
    fn data_classification() {
        let mut c = contribution(0, 1, 0);
        assert_eq!(classify_data(Some(&c)), "rdata");
        c.is_writable = true;
        assert_eq!(classify_data(Some(&c)), "data");
        c.is_uninitialised_data = true;
        assert_eq!(classify_data(Some(&c)), "bss");
        assert_eq!(classify_data(None), "data");
    }
}
