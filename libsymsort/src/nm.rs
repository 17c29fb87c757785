//! Parses the textual symbol listings produced by `nm`, in either BSD or SysV format. Lines that
//! can't be parsed are skipped.

use crate::path_utils;
use crate::progress::PercentTracker;
use crate::progress::ProgressSink;
use crate::symbol::Symbol;
use indexmap::IndexSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `[address] [size] <type> <name>[\t<source>[:line]]`
    Bsd,

    /// `name|value|class|type|size|line|section[\t<source>[:line]]`
    SysV,
}

const BITWISE_OR: (&str, &str) = ("operator|(", ">>operatorBitwiseOr<<");
const LOGICAL_OR: (&str, &str) = ("operator||(", ">>operatorLogicalOr<<");

const SYSV_FIELD_COUNT: usize = 7;

/// Parses a complete listing, then normalises the source paths of everything that was read.
#[tracing::instrument(skip_all, name = "Parse nm listing", fields(dialect = ?dialect))]
pub fn parse(text: &str, dialect: Dialect, progress: &mut dyn ProgressSink) -> Vec<Symbol> {
    let mut tracker = PercentTracker::new(progress);
    tracker.begin_step(0, 90);

    let mut symbols = Vec::new();
    let mut skipped = 0_usize;
    let mut consumed = 0;
    for line in text.lines() {
        consumed += line.len() + 1;
        tracker.update(consumed, text.len());
        if line.trim().is_empty() {
            continue;
        }
        let symbol = match dialect {
            Dialect::Bsd => parse_bsd_line(line),
            Dialect::SysV => parse_sysv_line(line),
        };
        match symbol {
            Some(symbol) => symbols.push(symbol),
            None => {
                skipped += 1;
                tracing::trace!(line, "Skipping unparsable line");
            }
        }
    }
    if skipped > 0 {
        tracing::debug!(skipped, "Skipped lines that didn't look like symbols");
    }

    tracker.begin_step(90, 100);
    normalise_source_paths(&mut symbols);
    tracker.finish();

    symbols
}

/// Splits off the first whitespace-delimited token, returning it and the remainder with leading
/// whitespace removed. Returns `None` if there's no remainder.
fn split_token(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    let (token, rest) = text.split_once(char::is_whitespace)?;
    let rest = rest.trim_start();
    (!rest.is_empty()).then_some((token, rest))
}

/// Splits on the first run of tabs or line terminators. Empty pieces are ignored.
fn split_source(text: &str) -> (&str, Option<&str>) {
    let is_break = |ch: char| matches!(ch, '\t' | '\r' | '\n');
    let text = text.trim_start_matches(is_break);
    match text.split_once(is_break) {
        Some((head, tail)) => {
            let tail = tail.trim_matches(is_break);
            (head, (!tail.is_empty()).then_some(tail))
        }
        None => (text, None),
    }
}

fn parse_hex(text: &str) -> Option<u64> {
    u64::from_str_radix(text.trim(), 16).ok()
}

/// Addresses in the top half of a 64 bit address space, e.g. kernel addresses, come out negative.
/// Their order relative to each other is kept.
fn parse_address(text: &str) -> Option<i64> {
    parse_hex(text).map(u64::cast_signed)
}

/// Sizes are lenient. Anything unparsable becomes 0.
fn parse_size(text: &str) -> i64 {
    parse_hex(text)
        .and_then(|size| i64::try_from(size).ok())
        .unwrap_or(0)
}

fn new_symbol(name: &str, rva: i64, size: i64) -> Option<Symbol> {
    let symbol = Symbol::checked_new(name, rva, size);
    if symbol.is_none() {
        tracing::trace!(name, rva, size, "Symbol extends past the end of the address space");
    }
    symbol
}

pub(crate) fn parse_bsd_line(line: &str) -> Option<Symbol> {
    let (mut token, mut rest) = split_token(line)?;

    let mut rva = 0;
    if token.len() > 1 {
        rva = parse_address(token)?;
        (token, rest) = split_token(rest)?;
    }

    let mut size = 0;
    if token.len() > 1 {
        size = parse_size(token);
        (token, rest) = split_token(rest)?;
    }

    let section = token;
    let (name, source) = split_source(rest);
    if name.is_empty() {
        return None;
    }

    Some(
        new_symbol(name, rva, size)?
            .with_section(section)
            .with_source(source.unwrap_or_default()),
    )
}

pub(crate) fn parse_sysv_line(line: &str) -> Option<Symbol> {
    // Names may contain `operator|` and `operator||`. Hide them so that they don't get treated as
    // field separators.
    let line = line
        .replace(BITWISE_OR.0, BITWISE_OR.1)
        .replace(LOGICAL_OR.0, LOGICAL_OR.1);

    let fields: Vec<&str> = line.splitn(SYSV_FIELD_COUNT, '|').collect();
    if fields.len() < SYSV_FIELD_COUNT {
        return None;
    }

    let name = fields[0]
        .replace(BITWISE_OR.1, BITWISE_OR.0)
        .replace(LOGICAL_OR.1, LOGICAL_OR.0);
    let name = name.trim();

    let rva = parse_address(fields[1]).unwrap_or(0);
    let size = parse_size(fields[4]);

    let (section, source) = split_source(fields[6]);

    Some(
        new_symbol(name, rva, size)?
            .with_section(section.trim())
            .with_source(source.map(str::trim).unwrap_or_default()),
    )
}

/// Cleans up the source paths of symbols read from a listing. Line numbers are stripped and
/// absolute paths are canonicalised and lower-cased. The directories of absolute paths are then
/// used to resolve relative paths: the first directory that, when joined with the relative path,
/// gives a path in a directory that we've already seen wins.
pub(crate) fn normalise_source_paths(symbols: &mut [Symbol]) {
    let mut root_paths = IndexSet::new();

    for symbol in symbols.iter_mut() {
        if symbol.source_filename.is_empty() {
            continue;
        }
        let stripped_len = path_utils::strip_line_number(&symbol.source_filename).len();
        symbol.source_filename.truncate(stripped_len);
        if path_utils::is_rooted(&symbol.source_filename) {
            symbol.source_filename = path_utils::canonicalize(&symbol.source_filename).to_lowercase();
            root_paths.insert(path_utils::parent_directory(&symbol.source_filename).to_owned());
        }
    }

    for symbol in symbols.iter_mut() {
        if symbol.source_filename.is_empty() || path_utils::is_rooted(&symbol.source_filename) {
            continue;
        }
        let resolved = root_paths.iter().find_map(|root| {
            let full_path =
                path_utils::canonicalize(&path_utils::join(root, &symbol.source_filename))
                    .to_lowercase();
            root_paths
                .contains(path_utils::parent_directory(&full_path))
                .then_some(full_path)
        });
        symbol.source_filename = resolved.unwrap_or_else(|| {
            path_utils::canonicalize(&symbol.source_filename).to_lowercase()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;

    #[test]
    fn bsd_full_line() {
        let symbol =
            parse_bsd_line("0000000000001139 000000000000000b T main\t/src/main.c:3").unwrap();
        assert_eq!(symbol.name, "main");
        assert_eq!(symbol.rva_start, 0x1139);
        assert_eq!(symbol.size, 0xb);
        assert_eq!(symbol.rva_end, 0x1144);
        assert_eq!(symbol.section, "T");
        assert_eq!(symbol.source_filename, "/src/main.c:3");
    }

    #[test]
    fn bsd_without_address() {
        let symbol = parse_bsd_line("                 U puts").unwrap();
        assert_eq!(symbol.name, "puts");
        assert_eq!(symbol.section, "U");
        assert_eq!((symbol.rva_start, symbol.size), (0, 0));
    }

    #[test]
    fn bsd_without_size() {
        let symbol = parse_bsd_line("0000000000004010 b completed.0").unwrap();
        assert_eq!(symbol.rva_start, 0x4010);
        assert_eq!(symbol.size, 0);
        assert_eq!(symbol.section, "b");
        assert_eq!(symbol.name, "completed.0");
    }

    #[test]
    fn bsd_name_with_spaces() {
        let symbol =
            parse_bsd_line("0000000000001200 0000000000000010 W foo(int, char const*)").unwrap();
        assert_eq!(symbol.name, "foo(int, char const*)");
        assert!(symbol.source_filename.is_empty());
    }

    #[test]
    fn bsd_malformed() {
        assert!(parse_bsd_line("main").is_none());
        assert!(parse_bsd_line("0000000000001139 T").is_none());
        assert!(parse_bsd_line("zzzz 0000000b T main").is_none());
    }

    #[test]
    fn bsd_high_addresses() {
        let symbol = parse_bsd_line("ffffffff81000000 0000000000000010 T startup_64").unwrap();
        assert_eq!(symbol.name, "startup_64");
        assert_eq!(symbol.rva_start, 0xffff_ffff_8100_0000_u64.cast_signed());
        assert_eq!(symbol.size, 0x10);
        assert_eq!(symbol.rva_end - symbol.rva_start, 0x10);

        let next = parse_bsd_line("ffffffff81000010 0000000000000008 T secondary").unwrap();
        assert!(symbol.rva_start < next.rva_start);

        // Would end past the largest representable address.
        assert!(parse_bsd_line("7ffffffffffffff8 0000000000000010 T last").is_none());
    }

    #[test]
    fn sysv_line() {
        let symbol = parse_sysv_line(
            "main                |0000000000001139|   T  |              FUNC|000000000000000b|     |.text\tmain.c:3",
        )
        .unwrap();
        assert_eq!(symbol.name, "main");
        assert_eq!(symbol.rva_start, 0x1139);
        assert_eq!(symbol.size, 0xb);
        assert_eq!(symbol.section, ".text");
        assert_eq!(symbol.source_filename, "main.c:3");
    }

    #[test]
    fn sysv_operator_or() {
        let symbol = parse_sysv_line("operator|(int)|1000|f|FUNC|4|0|.text\tC:\\a.cpp").unwrap();
        assert_eq!(symbol.name, "operator|(int)");
        assert_eq!(symbol.rva_start, 0x1000);
        assert_eq!(symbol.size, 4);
        assert_eq!(symbol.section, ".text");
        assert_eq!(symbol.source_filename, "C:\\a.cpp");

        let symbol = parse_sysv_line("A::operator||(A const&)|20|t|FUNC|8||.text").unwrap();
        assert_eq!(symbol.name, "A::operator||(A const&)");
        assert_eq!(symbol.size, 8);
    }

    #[test]
    fn sysv_lenient_fields() {
        let symbol = parse_sysv_line("x|  |U|NOTYPE|zz||").unwrap();
        assert_eq!((symbol.rva_start, symbol.size), (0, 0));
        assert!(symbol.section.is_empty());

        let symbol = parse_sysv_line("foo|zz|T|FUNC|10||.text").unwrap();
        assert_eq!(symbol.name, "foo");
        assert_eq!((symbol.rva_start, symbol.size), (0, 0x10));
        assert_eq!(symbol.section, ".text");
        assert!(parse_sysv_line("Symbols from a.out:").is_none());
        assert!(parse_sysv_line("x|1|2|3|4|5").is_none());
    }

    #[test]
    fn relative_paths_resolve_against_known_directories() {
        let mut symbols = vec![
            Symbol::new("a", 0, 1).with_source("/Src/Lib/A.cpp:10"),
            Symbol::new("b", 1, 1).with_source("B.cpp:3"),
            Symbol::new("c", 2, 1).with_source("./other/C.cpp"),
            Symbol::new("d", 3, 1).with_source("/src/x/../lib/d.h"),
        ];
        normalise_source_paths(&mut symbols);
        itertools::assert_equal(
            symbols.iter().map(|s| s.source_filename.as_str()),
            ["/src/lib/a.cpp", "/src/lib/b.cpp", "other/c.cpp", "/src/lib/d.h"],
        );
    }

    #[test]
    fn parse_skips_blank_and_bad_lines() {
        let text = "\n0000000000001000 0000000000000010 T f\njunk\n\n0000000000001010 T g\n";
        let symbols = parse(text, Dialect::Bsd, &mut NoProgress);
        itertools::assert_equal(symbols.iter().map(|s| s.name.as_str()), ["f", "g"]);
    }
}
