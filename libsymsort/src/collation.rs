//! Groups symbols by various keys and totals up their counts and sizes. Nothing here mutates the
//! symbols themselves.

use crate::path_utils;
use crate::symbol::MergedSymbol;
use crate::symbol::Symbol;
use indexmap::IndexMap;
use regex::Regex;
use std::borrow::Cow;
use std::cmp::Ordering;

const TAG_SEPARATORS: [char; 12] = [' ', ',', '.', '&', '*', '(', ')', '<', '>', ':', '\'', '`'];

/// Groups `symbols` by the keys that `keys` returns for each symbol. A symbol that produces several
/// keys is counted against each of them. A symbol that produces no keys isn't counted at all.
/// Results are in the order that each key was first seen.
pub fn collate<'a, F, I>(symbols: &'a [Symbol], mut keys: F) -> Vec<MergedSymbol>
where
    F: FnMut(&'a Symbol) -> I,
    I: IntoIterator,
    I::Item: Into<Cow<'a, str>>,
{
    let mut totals: IndexMap<Cow<'a, str>, (i64, i64)> = IndexMap::new();
    for symbol in symbols {
        for key in keys(symbol) {
            let (count, size) = totals.entry(key.into()).or_default();
            *count += symbol.count;
            *size += symbol.size;
        }
    }
    totals
        .into_iter()
        .map(|(id, (total_count, total_size))| MergedSymbol {
            id: id.into_owned(),
            total_count,
            total_size,
        })
        .collect()
}

/// Replaces the contents of each outermost `open`...`close` group in `name` with `placeholder`.
/// Nested groups are absorbed into their enclosing group. If the last group is never closed,
/// nothing after its opening character is kept. `open` and `close` may be the same character, in
/// which case groups can't nest.
#[must_use]
pub fn collapse_groups(name: &str, open: char, close: char, placeholder: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut depth = 0_u32;
    let mut verbatim_start = 0;

    for (index, ch) in name.char_indices() {
        if ch == close && depth > 0 {
            depth -= 1;
            if depth == 0 {
                out.push_str(placeholder);
                out.push(close);
                verbatim_start = index + ch.len_utf8();
            }
        } else if ch == open {
            if depth == 0 {
                out.push_str(&name[verbatim_start..index + ch.len_utf8()]);
            }
            depth += 1;
        }
    }

    if depth == 0 {
        out.push_str(&name[verbatim_start..]);
    }
    out
}

/// Collapses template arguments and quoted names, so that all instantiations of a template share a
/// key.
#[must_use]
pub fn template_key(name: &str) -> String {
    let name = collapse_groups(name, '<', '>', "T");
    collapse_groups(&name, '\'', '\'', "...")
}

/// Like `template_key`, but also collapses parameter lists so that all overloads share a key.
#[must_use]
pub fn overload_key(name: &str) -> String {
    collapse_groups(&template_key(name), '(', ')', "...")
}

/// Splits a name into the words that make it up.
pub fn tag_keys(name: &str) -> impl Iterator<Item = &str> {
    name.split(|ch: char| ch.is_whitespace() || TAG_SEPARATORS.contains(&ch))
        .filter(|tag| !tag.is_empty())
}

/// Highest count first, then highest size, then by id.
pub fn by_count(a: &MergedSymbol, b: &MergedSymbol) -> Ordering {
    b.total_count
        .cmp(&a.total_count)
        .then_with(|| b.total_size.cmp(&a.total_size))
        .then_with(|| a.id.cmp(&b.id))
}

/// Highest size first, then highest count, then by id.
pub fn by_size(a: &MergedSymbol, b: &MergedSymbol) -> Ordering {
    b.total_size
        .cmp(&a.total_size)
        .then_with(|| b.total_count.cmp(&a.total_count))
        .then_with(|| a.id.cmp(&b.id))
}

/// A regex substitution applied to source paths before they're grouped into folders.
#[derive(Debug, Clone)]
pub struct PathReplacement {
    pub pattern: Regex,
    pub replacement: String,
}

impl PathReplacement {
    pub fn apply<'a>(&self, path: &'a str) -> Cow<'a, str> {
        self.pattern.replace_all(path, self.replacement.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderStat {
    pub path: String,
    pub count: i64,
    pub size: i64,

    /// All of the symbols counted here were also counted against one child. Such entries add no
    /// information when listed alongside that child.
    pub single_child: bool,
}

/// Totals symbols by source file and by every directory containing that source file. Paths rooted
/// at `/` roll up into `/`. Symbols without a source file are totalled under the empty path.
#[tracing::instrument(skip_all, name = "Build folder stats")]
pub fn folder_stats(symbols: &[Symbol], replacements: &[PathReplacement]) -> Vec<FolderStat> {
    let mut stats: IndexMap<String, FolderStat> = IndexMap::new();

    for symbol in symbols {
        let mut path = replacements
            .iter()
            .fold(symbol.source_filename.clone(), |path, replacement| {
                replacement.apply(&path).into_owned()
            });

        let mut child_count = None;
        loop {
            let stat = stats.entry(path.clone()).or_default();
            stat.count += symbol.count;
            stat.size += symbol.size;
            stat.single_child = child_count == Some(stat.count);
            child_count = Some(stat.count);

            let Some(separator) = path.rfind(path_utils::is_separator) else {
                break;
            };
            if separator == 0 {
                // Rooted paths end with the root itself rather than an empty path.
                if path.len() == 1 {
                    break;
                }
                path.truncate(1);
            } else {
                path.truncate(separator);
            }
        }
    }

    stats
        .into_iter()
        .map(|(path, stat)| FolderStat { path, ..stat })
        .collect()
}

/// Largest first. Ties are broken by path so that output is stable.
pub fn folder_by_size(a: &FolderStat, b: &FolderStat) -> Ordering {
    b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path))
}

pub fn folder_by_path(a: &FolderStat, b: &FolderStat) -> Ordering {
    a.path.cmp(&b.path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn totals(merged: &[MergedSymbol]) -> Vec<(&str, i64, i64)> {
        merged
            .iter()
            .map(|m| (m.id.as_str(), m.total_count, m.total_size))
            .collect()
    }

    #[test]
    fn collapse_nested_templates() {
        assert_eq!(template_key("Foo<Bar<Baz>>::method()"), "Foo<T>::method()");
        assert_eq!(
            template_key("std::map<int,std::pair<a,b> >::insert"),
            "std::map<T>::insert"
        );
    }

    #[test]
    fn collapse_quotes() {
        assert_eq!(
            template_key("`anonymous namespace'::Thing::`vftable'"),
            "`anonymous namespace'...'"
        );
        assert_eq!(template_key("a'b'c'd'e"), "a'...'c'...'e");
    }

    #[test]
    fn collapse_unterminated_group() {
        assert_eq!(collapse_groups("operator<", '<', '>', "T"), "operator<");
        assert_eq!(collapse_groups("a<b>c<d", '<', '>', "T"), "a<T>c<");
    }

    #[test]
    fn unmatched_close_is_verbatim() {
        assert_eq!(collapse_groups("operator>>(x)", '<', '>', "T"), "operator>>(x)");
    }

    #[test]
    fn overloads_collapse_parameters() {
        assert_eq!(overload_key("Foo<int>::bar(int, char)"), "Foo<T>::bar(...)");
        assert_eq!(overload_key("f(g(x))"), "f(...)");
    }

    #[test]
    fn tags() {
        itertools::assert_equal(
            tag_keys("const std::vector<int>::iterator & `x'"),
            ["const", "std", "vector", "int", "iterator", "x"],
        );
    }

    #[test]
    fn collate_counts_each_key() {
        let symbols = vec![
            Symbol::new("a b", 0, 10),
            Symbol::new("b", 10, 5),
            Symbol::new("c", 15, 1),
        ];
        let merged = collate(&symbols, |s| tag_keys(&s.name));
        assert_eq!(totals(&merged), vec![("a", 1, 10), ("b", 2, 15), ("c", 1, 1)]);

        let merged = collate(&symbols, |s| (s.size > 1).then_some(s.name.as_str()));
        assert_eq!(totals(&merged), vec![("a b", 1, 10), ("b", 1, 5)]);
    }

    #[test]
    fn sort_orders() {
        let merged = |id: &str, total_count, total_size| MergedSymbol {
            id: id.to_owned(),
            total_count,
            total_size,
        };
        let mut symbols = vec![
            merged("b", 2, 10),
            merged("a", 2, 10),
            merged("c", 1, 50),
            merged("d", 3, 1),
        ];

        symbols.sort_by(by_count);
        itertools::assert_equal(symbols.iter().map(|m| m.id.as_str()), ["d", "a", "b", "c"]);

        symbols.sort_by(by_size);
        itertools::assert_equal(symbols.iter().map(|m| m.id.as_str()), ["c", "a", "b", "d"]);
    }

    #[test]
    fn folder_rollup() {
        let symbols = vec![
            Symbol::new("a", 0, 10).with_source("/src/lib/a.cpp"),
            Symbol::new("b", 10, 20).with_source("/src/lib/a.cpp"),
            Symbol::new("c", 30, 5).with_source("/src/main.cpp"),
            Symbol::new("d", 35, 1),
        ];
        let stats = folder_stats(&symbols, &[]);
        let summary: Vec<_> = stats
            .iter()
            .map(|s| (s.path.as_str(), s.count, s.size, s.single_child))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("/src/lib/a.cpp", 2, 30, false),
                ("/src/lib", 2, 30, true),
                ("/src", 3, 35, false),
                ("/", 3, 35, true),
                ("/src/main.cpp", 1, 5, false),
                ("", 1, 1, false),
            ]
        );
    }

    #[test]
    fn folder_rollup_with_replacements() {
        let symbols = vec![
            Symbol::new("a", 0, 10).with_source("d:\\sdk_v1\\inc\\a.h"),
            Symbol::new("b", 10, 20).with_source("d:\\sdk_v2\\inc\\a.h"),
        ];
        let replacements = [PathReplacement {
            pattern: Regex::new(r"d:\\sdk_v\d").unwrap(),
            replacement: "c:\\sdk".to_owned(),
        }];
        let stats = folder_stats(&symbols, &replacements);
        let file = stats.iter().find(|s| s.path == "c:\\sdk\\inc\\a.h").unwrap();
        assert_eq!((file.count, file.size), (2, 30));
    }
}
