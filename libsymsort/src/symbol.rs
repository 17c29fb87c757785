//! The canonical shape that every input format is normalised into.

use bitflags::bitflags;

/// Name given to the records that the resolver synthesises for address ranges that no symbol
/// claims.
pub const UNMAPPED_NAME: &str = "missing in pdb";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SymbolFlags: u8 {
        const FUNCTION = 1 << 0;
        const DATA = 1 << 1;
        const THUNK = 1 << 2;

        /// The record came from the public symbol table.
        const PUBLIC_SYMBOL = 1 << 3;

        /// The record is a section header rather than a symbol.
        const SECTION = 1 << 4;

        /// Synthesised to cover a gap between symbols.
        const UNMAPPED = 1 << 5;

        /// The record is redundant with a higher-priority record and should be dropped if it ends
        /// up with no size of its own.
        const WEAK = 1 << 6;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,

    /// Name without parameters or return type, where the input format can supply one.
    pub short_name: String,

    pub rva_start: i64,

    /// Set once at creation. The resolver shrinks `size` but leaves this alone.
    pub rva_end: i64,

    pub size: i64,
    pub count: i64,
    pub section: String,
    pub source_filename: String,
    pub flags: SymbolFlags,
}

/// The result of grouping symbols by some key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedSymbol {
    pub id: String,
    pub total_count: i64,
    pub total_size: i64,
}

impl Symbol {
    /// `rva_start + size` must not overflow. Values read from inputs should go through
    /// `checked_new` instead.
    pub fn new(name: impl Into<String>, rva_start: i64, size: i64) -> Symbol {
        let name = name.into();
        Symbol {
            short_name: name.clone(),
            name,
            rva_start,
            rva_end: rva_start + size,
            size,
            count: 1,
            section: String::new(),
            source_filename: String::new(),
            flags: SymbolFlags::empty(),
        }
    }

    /// Returns `None` if the end address of the symbol isn't representable.
    pub fn checked_new(name: impl Into<String>, rva_start: i64, size: i64) -> Option<Symbol> {
        rva_start.checked_add(size)?;
        Some(Symbol::new(name, rva_start, size))
    }

    /// A filler record covering `start..end`.
    pub(crate) fn unmapped(start: i64, end: i64) -> Symbol {
        Symbol::new(UNMAPPED_NAME, start, end - start).with_flags(SymbolFlags::UNMAPPED)
    }

    #[must_use]
    pub fn with_short_name(mut self, short_name: impl Into<String>) -> Symbol {
        self.short_name = short_name.into();
        self
    }

    #[must_use]
    pub fn with_section(mut self, section: impl Into<String>) -> Symbol {
        self.section = section.into();
        self
    }

    #[must_use]
    pub fn with_source(mut self, source_filename: impl Into<String>) -> Symbol {
        self.source_filename = source_filename.into();
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: SymbolFlags) -> Symbol {
        self.flags |= flags;
        self
    }

    #[must_use]
    pub fn is_weak(&self) -> bool {
        self.flags.contains(SymbolFlags::WEAK)
    }

    #[must_use]
    pub fn is_unmapped(&self) -> bool {
        self.flags.contains(SymbolFlags::UNMAPPED)
    }

    /// Turns this record into its contribution to a difference. Only `count` and `size` change
    /// sign.
    pub fn negate(&mut self) {
        self.count = -self.count;
        self.size = -self.size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_symbol_defaults() {
        let symbol = Symbol::new("foo", 0x10, 0x20);
        assert_eq!(symbol.short_name, "foo");
        assert_eq!(symbol.rva_end, 0x30);
        assert_eq!(symbol.count, 1);
        assert!(symbol.flags.is_empty());
    }

    #[test]
    fn checked_end_address() {
        assert_eq!(
            Symbol::checked_new("last", i64::MAX - 0x10, 0x10).map(|s| s.rva_end),
            Some(i64::MAX)
        );
        assert!(Symbol::checked_new("past", i64::MAX - 8, 0x10).is_none());
    }

    #[test]
    fn negate_keeps_addresses() {
        let mut symbol = Symbol::new("foo", 100, 8).with_flags(SymbolFlags::WEAK);
        symbol.negate();
        assert_eq!((symbol.count, symbol.size), (-1, -8));
        assert_eq!((symbol.rva_start, symbol.rva_end), (100, 108));
        assert!(symbol.is_weak());
    }

    #[test]
    fn unmapped_filler() {
        let filler = Symbol::unmapped(150, 200);
        assert_eq!(filler.name, UNMAPPED_NAME);
        assert_eq!(filler.size, 50);
        assert!(filler.section.is_empty());
        assert!(filler.is_unmapped());
    }
}
