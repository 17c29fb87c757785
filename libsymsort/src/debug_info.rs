//! The interface between the structured debug info reader and whatever backend supplies the
//! tables. A backend hands out owned snapshots, so the reader never holds on to backend state.

use crate::error::Result;

pub type CompilandId = u32;

/// A range of the image attributed to one compiland.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionContribution {
    pub rva: u64,
    pub length: u64,
    pub compiland_id: CompilandId,
    pub is_code: bool,
    pub is_writable: bool,
    pub is_uninitialised_data: bool,
}

/// The source files referenced by a compiland, in the order that the backend lists them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilandSources {
    pub compiland_id: CompilandId,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolTag {
    Public,
    Function,
    Thunk,
    Data,
}

/// Which symbols to enumerate. Local symbols are grouped by the compiland that defines them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolScope {
    Global,
    Compiland(CompilandId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    /// At a fixed address in the image. These are the only symbols we attribute size to.
    Static,
    ThreadLocal,
    Register,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugSymbol {
    pub name: Option<String>,
    pub undecorated_name: Option<String>,
    pub rva: u64,
    pub length: u64,
    pub location: LocationKind,

    /// Size of the symbol's type, if the type could be resolved. Data symbols take their size from
    /// this rather than from `length`.
    pub type_length: Option<u64>,

    pub is_code: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: String,
    pub virtual_address: u64,
    pub virtual_size: u64,

    /// The section isn't loaded at runtime, e.g. relocations or debug info.
    pub is_discardable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugStream {
    SectionHeaders(Vec<SectionHeader>),
    Other { name: String },
}

pub trait DebugInfoProvider {
    /// Section contributions, in no particular order.
    fn section_contributions(&self) -> Result<Vec<SectionContribution>>;

    fn compilands(&self) -> Result<Vec<CompilandId>>;

    fn source_files_by_compiland(&self) -> Result<Vec<CompilandSources>>;

    fn enumerate_symbols(&self, tag: SymbolTag, scope: SymbolScope) -> Result<Vec<DebugSymbol>>;

    /// Source files of the line table entries that fall within `rva..rva + length`, in address
    /// order.
    fn lines_for_address_range(&self, rva: u64, length: u64) -> Result<Vec<String>>;

    fn debug_streams(&self) -> Result<Vec<DebugStream>>;

    /// Section headers from the first section header stream, if there is one.
    fn section_headers(&self) -> Result<Vec<SectionHeader>> {
        Ok(self
            .debug_streams()?
            .into_iter()
            .find_map(|stream| match stream {
                DebugStream::SectionHeaders(headers) => Some(headers),
                DebugStream::Other { .. } => None,
            })
            .unwrap_or_default())
    }
}

impl DebugSymbol {
    /// A statically located symbol with only the fields that most backends fill in.
    #[must_use]
    pub fn new(name: impl Into<String>, rva: u64, length: u64) -> DebugSymbol {
        DebugSymbol {
            name: Some(name.into()),
            undecorated_name: None,
            rva,
            length,
            location: LocationKind::Static,
            type_length: None,
            is_code: false,
        }
    }
}
