//! Combines two symbol sets into one whose totals are the difference between them.

use crate::symbol::Symbol;

/// Appends `baseline` to `symbols` with counts and sizes negated. Grouping the result by any key
/// then gives the change from `baseline` to `symbols` for that key.
pub fn append_difference(symbols: &mut Vec<Symbol>, baseline: Vec<Symbol>) {
    symbols.reserve(baseline.len());
    symbols.extend(baseline.into_iter().map(|mut symbol| {
        symbol.negate();
        symbol
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collation::collate;

    #[test]
    fn difference_of_identical_sets_is_zero() {
        let snapshot = vec![
            Symbol::new("a", 0, 10).with_section("code"),
            Symbol::new("b", 10, 4).with_section("data"),
            Symbol::new("a", 20, 10).with_section("code"),
        ];
        let mut symbols = snapshot.clone();
        append_difference(&mut symbols, snapshot);
        assert_eq!(symbols.len(), 6);

        for merged in collate(&symbols, |s| [s.name.as_str(), s.section.as_str()]) {
            assert_eq!((merged.total_count, merged.total_size), (0, 0), "{}", merged.id);
        }
    }

    #[test]
    fn growth_is_positive() {
        let mut symbols = vec![Symbol::new("a", 0, 30)];
        append_difference(&mut symbols, vec![Symbol::new("a", 0, 10), Symbol::new("gone", 10, 4)]);
        let merged = collate(&symbols, |s| Some(s.name.as_str()));
        assert_eq!(merged[0].total_size, 20);
        assert_eq!(merged[0].total_count, 0);
        assert_eq!((merged[1].total_count, merged[1].total_size), (-1, -4));
    }
}
