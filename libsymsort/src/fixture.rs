//! A `DebugInfoProvider` backed by tables built in memory. Useful for exercising the debug info
//! reader without a real binary.

use crate::debug_info::CompilandId;
use crate::debug_info::CompilandSources;
use crate::debug_info::DebugInfoProvider;
use crate::debug_info::DebugStream;
use crate::debug_info::DebugSymbol;
use crate::debug_info::SectionContribution;
use crate::debug_info::SectionHeader;
use crate::debug_info::SymbolScope;
use crate::debug_info::SymbolTag;
use crate::error::Result;

#[derive(Debug, Clone)]
struct LineEntry {
    rva: u64,
    length: u64,
    file: String,
}

#[derive(Debug, Default, Clone)]
pub struct FixtureDebugInfo {
    contributions: Vec<SectionContribution>,
    compilands: Vec<CompilandSources>,
    symbols: Vec<(SymbolTag, SymbolScope, DebugSymbol)>,
    lines: Vec<LineEntry>,
    section_headers: Vec<SectionHeader>,
}

impl FixtureDebugInfo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a compiland that references `files`.
    #[must_use]
    pub fn compiland(mut self, compiland_id: CompilandId, files: &[&str]) -> Self {
        self.compilands.push(CompilandSources {
            compiland_id,
            files: files.iter().map(|f| (*f).to_owned()).collect(),
        });
        self
    }

    #[must_use]
    pub fn contribution(mut self, contribution: SectionContribution) -> Self {
        self.contributions.push(contribution);
        self
    }

    #[must_use]
    pub fn symbol(mut self, tag: SymbolTag, scope: SymbolScope, symbol: DebugSymbol) -> Self {
        self.symbols.push((tag, scope, symbol));
        self
    }

    /// Adds a line table entry covering `rva..rva + length`.
    #[must_use]
    pub fn line(mut self, rva: u64, length: u64, file: &str) -> Self {
        self.lines.push(LineEntry {
            rva,
            length,
            file: file.to_owned(),
        });
        self
    }

    #[must_use]
    pub fn section_header(mut self, header: SectionHeader) -> Self {
        self.section_headers.push(header);
        self
    }
}

impl DebugInfoProvider for FixtureDebugInfo {
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
            .filter(|(t, s, _)| *t == tag && *s == scope)
            .map(|(_, _, symbol)| symbol.clone())
            .collect())
    }

    fn lines_for_address_range(&self, rva: u64, length: u64) -> Result<Vec<String>> {
        let end = rva + length;
        let mut lines: Vec<&LineEntry> = self
            .lines
            .iter()
            .filter(|line| line.rva < end && rva < line.rva + line.length)
            .collect();
        lines.sort_by_key(|line| line.rva);
        Ok(lines.into_iter().map(|line| line.file.clone()).collect())
    }

    fn debug_streams(&self) -> Result<Vec<DebugStream>> {
        Ok(vec![
            DebugStream::Other {
                name: "FPO".to_owned(),
            },
            DebugStream::SectionHeaders(self.section_headers.clone()),
        ])
    }
}
