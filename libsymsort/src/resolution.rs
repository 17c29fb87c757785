//! Turns a list of possibly overlapping, possibly redundant symbols into one where every byte of the
//! address space is attributed to at most one symbol.
//!
//! The position of a symbol in the list is its priority, with earlier symbols taking precedence.
//! Wherever symbols overlap, only the highest priority symbol keeps the overlapping bytes. The
//! sizes of the others are reduced accordingly. Their start and end addresses are left alone.

use crate::error::Result;
use crate::symbol::Symbol;
use anyhow::bail;

/// One end of a symbol's address range.
#[derive(Debug, Clone, Copy)]
struct Extent {
    location: i64,

    /// Negative for the start of a symbol and non-negative for the end. Sorting by this within a
    /// location puts all starts before all ends, with later symbols starting first.
    priority: i64,

    symbol_index: usize,
}

impl Extent {
    fn open(index: usize, symbol: &Symbol) -> Extent {
        Extent {
            location: symbol.rva_start,
            priority: !(index as i64),
            symbol_index: index,
        }
    }

    fn close(index: usize, symbol: &Symbol) -> Extent {
        Extent {
            location: symbol.rva_end,
            priority: index as i64,
            symbol_index: index,
        }
    }

    fn is_open(&self) -> bool {
        self.priority < 0
    }

    fn sort_key(&self) -> (i64, i64) {
        (self.location, self.priority)
    }
}

/// Reduces the sizes of overlapping symbols so that overlapping bytes are only counted against the
/// highest priority symbol. If `fill_gaps` is set, a filler symbol is appended for each address
/// range between the lowest start and the highest end that no symbol covers.
#[tracing::instrument(skip_all, name = "Remove overlapping symbols")]
pub fn remove_overlapping_symbols(symbols: &mut Vec<Symbol>, fill_gaps: bool) -> Result {
    let mut extents = Vec::with_capacity(symbols.len() * 2);
    for (index, symbol) in symbols.iter().enumerate() {
        extents.push(Extent::open(index, symbol));
        extents.push(Extent::close(index, symbol));
    }
    extents.sort_by_key(Extent::sort_key);

    let mut open: Vec<Extent> = Vec::new();
    let mut max_open_priority: Option<i64> = None;
    let mut previous_location = extents.first().map_or(0, |e| e.location);
    let mut fillers = Vec::new();

    for extent in &extents {
        let span = extent.location - previous_location;

        if span > 0 {
            if open.is_empty() {
                if fill_gaps {
                    fillers.push(Symbol::unmapped(previous_location, extent.location));
                }
            } else {
                for overlapped in open
                    .iter()
                    .filter(|e| Some(e.priority) < max_open_priority)
                {
                    let symbol = &mut symbols[overlapped.symbol_index];
                    if symbol.size < span {
                        bail!(
                            "Internal error: reducing size of `{}` ({}) by {span} would make it \
                             negative",
                            symbol.name,
                            symbol.size
                        );
                    }
                    symbol.size -= span;
                }
            }
        }

        previous_location = extent.location;

        if extent.is_open() {
            max_open_priority = max_open_priority.max(Some(extent.priority));
            open.push(*extent);
        } else {
            let num_open = open.len();
            open.retain(|e| e.symbol_index != extent.symbol_index);
            let num_removed = num_open - open.len();
            if num_removed != 1 {
                bail!(
                    "Internal error: closing `{}` removed {num_removed} open symbols",
                    symbols[extent.symbol_index].name
                );
            }
            max_open_priority = open.iter().map(|e| e.priority).max();
        }
    }

    tracing::debug!(fillers = fillers.len(), "Resolved overlapping symbols");
    symbols.extend(fillers);
    Ok(())
}

/// Removes weak symbols that were entirely covered by higher priority symbols.
pub fn remove_empty_weak_symbols(symbols: &mut Vec<Symbol>) {
    symbols.retain(|s| !(s.size == 0 && s.is_weak()));
}

/// Sorts by start address and appends a filler symbol for each gap, without touching the sizes of
/// overlapping symbols.
#[tracing::instrument(skip_all, name = "Add symbols for missing addresses")]
pub fn add_symbols_for_missing_addresses(symbols: &mut Vec<Symbol>) {
    symbols.sort_by(|a, b| a.rva_start.cmp(&b.rva_start).then_with(|| a.name.cmp(&b.name)));

    let Some(first) = symbols.first() else {
        return;
    };
    let mut high_water_mark = first.rva_start;
    let mut fillers = Vec::new();
    for symbol in symbols.iter() {
        if symbol.rva_start > high_water_mark {
            fillers.push(Symbol::unmapped(high_water_mark, symbol.rva_start));
        }
        high_water_mark = high_water_mark.max(symbol.rva_end);
    }
    symbols.extend(fillers);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolFlags;
    use crate::symbol::UNMAPPED_NAME;

    fn sizes(symbols: &[Symbol]) -> Vec<(&str, i64)> {
        symbols.iter().map(|s| (s.name.as_str(), s.size)).collect()
    }

    #[test]
    fn partial_overlap_and_gap() {
        let mut symbols = vec![
            Symbol::new("A", 0, 100),
            Symbol::new("B", 50, 100),
            Symbol::new("C", 200, 10),
        ];
        remove_overlapping_symbols(&mut symbols, true).unwrap();
        assert_eq!(
            sizes(&symbols),
            vec![("A", 100), ("B", 50), ("C", 10), (UNMAPPED_NAME, 50)]
        );
        let filler = &symbols[3];
        assert_eq!((filler.rva_start, filler.rva_end), (150, 200));
        assert!(filler.flags.contains(SymbolFlags::UNMAPPED));
    }

    #[test]
    fn lower_priority_container_loses_nested_range() {
        let mut symbols = vec![Symbol::new("inner", 10, 20), Symbol::new("outer", 0, 100)];
        remove_overlapping_symbols(&mut symbols, false).unwrap();
        assert_eq!(sizes(&symbols), vec![("inner", 20), ("outer", 80)]);
        assert_eq!(symbols[1].rva_end, 100);
    }

    #[test]
    fn nested_weak_symbol_is_dropped() {
        let mut symbols = vec![
            Symbol::new("outer", 0, 100),
            Symbol::new("inner", 10, 20).with_flags(SymbolFlags::WEAK),
            Symbol::new("strong_inner", 30, 20),
        ];
        remove_overlapping_symbols(&mut symbols, true).unwrap();
        remove_empty_weak_symbols(&mut symbols);
        assert_eq!(sizes(&symbols), vec![("outer", 100), ("strong_inner", 0)]);
    }

    #[test]
    fn identical_ranges_go_to_the_first_symbol() {
        let mut symbols = vec![
            Symbol::new("public", 0x40, 0x10),
            Symbol::new("function", 0x40, 0x10).with_flags(SymbolFlags::WEAK),
            Symbol::new("data", 0x40, 0x10).with_flags(SymbolFlags::WEAK),
        ];
        remove_overlapping_symbols(&mut symbols, true).unwrap();
        assert_eq!(
            sizes(&symbols),
            vec![("public", 0x10), ("function", 0), ("data", 0)]
        );
    }

    #[test]
    fn adjacent_symbols_at_shared_boundary() {
        // At location 10, both `b` and `c` open before `a` closes, so `a` isn't reduced. `c` lies
        // entirely within `b`.
        let mut symbols = vec![
            Symbol::new("a", 0, 10),
            Symbol::new("b", 10, 10),
            Symbol::new("c", 10, 5),
        ];
        remove_overlapping_symbols(&mut symbols, true).unwrap();
        assert_eq!(sizes(&symbols), vec![("a", 10), ("b", 10), ("c", 0)]);
    }

    #[test]
    fn zero_sized_symbols() {
        let mut symbols = vec![Symbol::new("a", 0, 10), Symbol::new("empty", 5, 0)];
        remove_overlapping_symbols(&mut symbols, true).unwrap();
        assert_eq!(sizes(&symbols), vec![("a", 10), ("empty", 0)]);
    }

    #[test]
    fn no_filler_before_first_symbol() {
        let mut symbols = vec![Symbol::new("a", 0x1000, 0x10)];
        remove_overlapping_symbols(&mut symbols, true).unwrap();
        assert_eq!(sizes(&symbols), vec![("a", 0x10)]);
    }

    #[test]
    fn negative_size_is_internal_error() {
        // Sizes inconsistent with the address range can't be resolved.
        let mut b = Symbol::new("b", 0, 100);
        b.size = 10;
        let mut symbols = vec![Symbol::new("a", 0, 100), b];
        let error = remove_overlapping_symbols(&mut symbols, false).unwrap_err();
        assert!(error.to_string().starts_with("Internal error"));
    }

    #[test]
    fn fill_gaps_only() {
        let mut symbols = vec![
            Symbol::new("z", 0x30, 0x10),
            Symbol::new("b", 0, 0x20),
            Symbol::new("a", 0, 0x10),
            Symbol::new("y", 0x50, 0x8),
        ];
        add_symbols_for_missing_addresses(&mut symbols);
        assert_eq!(
            sizes(&symbols),
            vec![
                ("a", 0x10),
                ("b", 0x20),
                ("z", 0x10),
                ("y", 0x8),
                (UNMAPPED_NAME, 0x10),
                (UNMAPPED_NAME, 0x10),
            ]
        );
        assert_eq!((symbols[4].rva_start, symbols[4].rva_end), (0x20, 0x30));
        assert_eq!((symbols[5].rva_start, symbols[5].rva_end), (0x40, 0x50));
    }

    #[test]
    fn fill_gaps_only_empty() {
        let mut symbols = Vec::new();
        add_symbols_for_missing_addresses(&mut symbols);
        assert!(symbols.is_empty());
    }
}
