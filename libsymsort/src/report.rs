//! Writes the textual report. Every view is produced from the same symbol list, either as a plain
//! listing or, when comparing against a baseline, as separate increases and decreases.

use crate::collation;
use crate::collation::FolderStat;
use crate::collation::PathReplacement;
use crate::error::Result;
use crate::symbol::MergedSymbol;
use crate::symbol::Symbol;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::io::Write;

const RULE: &str = "--------------------------------------";
const UNKNOWN_PATH: &str = "[unknown]";

pub struct ReportOptions<'a> {
    /// Maximum number of rows in each listing. The by-path folder listing and the complete dump
    /// aren't limited.
    pub max_count: usize,

    /// The symbols include negated baseline symbols, so totals are differences.
    pub show_differences: bool,

    /// Append every symbol sorted by address.
    pub complete: bool,

    pub path_replacements: &'a [PathReplacement],
}

/// Totals over all loaded symbols, taken before filler records are removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub count: i64,
    pub size: i64,

    /// Size of filler records covering addresses no symbol claimed.
    pub unattributed: i64,
}

impl Totals {
    #[must_use]
    pub fn of(symbols: &[Symbol]) -> Totals {
        symbols.iter().fold(Totals::default(), |mut totals, symbol| {
            totals.count += symbol.count;
            totals.size += symbol.size;
            if symbol.is_unmapped() {
                totals.unattributed += symbol.size;
            }
            totals
        })
    }
}

/// A grouping of symbols reported as its own section.
struct MergedView {
    title: &'static str,
    key: fn(&Symbol) -> Vec<Cow<'_, str>>,
}

const MERGED_VIEWS: [MergedView; 5] = [
    MergedView {
        title: "Merged Sections / Types",
        key: |s| vec![Cow::Borrowed(s.section.as_str())],
    },
    MergedView {
        title: "Merged Duplicate Symbols",
        key: |s| vec![Cow::Borrowed(s.name.as_str())],
    },
    MergedView {
        title: "Merged Template Symbols",
        key: |s| vec![Cow::Owned(collation::template_key(&s.name))],
    },
    MergedView {
        title: "Merged Overloaded Symbols",
        key: |s| vec![Cow::Owned(collation::overload_key(&s.short_name))],
    },
    MergedView {
        title: "Symbol Tags",
        key: |s| collation::tag_keys(&s.name).map(Cow::Borrowed).collect(),
    },
];

/// Writes all views of `symbols`. `symbols` is reordered along the way.
pub fn write_report(
    out: &mut dyn Write,
    symbols: &mut [Symbol],
    totals: &Totals,
    options: &ReportOptions,
) -> Result {
    write_raw_symbols(out, symbols, totals, options)?;

    let stats = collation::folder_stats(symbols, options.path_replacements);
    write_folder_stats(out, stats, options)?;

    for view in &MERGED_VIEWS {
        let _span = tracing::info_span!("Merge symbols", view = view.title).entered();
        writeln!(out, "{}", view.title)?;
        let merged = collation::collate(symbols, view.key);
        write_merged(out, merged, options)?;
    }

    if options.complete {
        write_complete(out, symbols)?;
    }
    Ok(())
}

#[tracing::instrument(skip_all, name = "Write raw symbols")]
fn write_raw_symbols(
    out: &mut dyn Write,
    symbols: &mut [Symbol],
    totals: &Totals,
    options: &ReportOptions,
) -> Result {
    if options.show_differences {
        writeln!(out, "Raw Symbols Differences")?;
    } else {
        writeln!(out, "Raw Symbols")?;
    }
    writeln!(out, "Total Count  : {}", totals.count)?;
    writeln!(out, "Total Size   : {}", totals.size)?;
    if totals.unattributed != totals.size {
        writeln!(out, "Unattributed : {}", totals.unattributed)?;
    }

    if options.show_differences {
        writeln!(out)?;
        return Ok(());
    }

    writeln!(out, "{RULE}")?;
    symbols.sort_by(by_size_then_name);
    writeln!(out, "Sorted by Size")?;
    writeln!(
        out,
        "{:>12} {:>12}  {:<120}  {}",
        "Size", "Section/Type", "Name", "Source"
    )?;
    for s in symbols.iter().take(options.max_count) {
        writeln!(
            out,
            "{:>12} {:>12}  {:<120}  {}",
            s.size, s.section, s.name, s.source_filename
        )?;
    }
    writeln!(out)?;
    Ok(())
}

fn write_folder_stats(
    out: &mut dyn Write,
    mut stats: Vec<FolderStat>,
    options: &ReportOptions,
) -> Result {
    writeln!(out, "File Contributions")?;
    writeln!(out, "{RULE}")?;

    stats.sort_by(collation::folder_by_size);
    if options.show_differences {
        writeln!(out, "Increases in Size")?;
        write_folder_list(
            out,
            stats.iter().filter(|s| !s.single_child && s.size > 0),
            options.max_count,
        )?;
        writeln!(out, "Decreases in Size")?;
        write_folder_list(
            out,
            stats.iter().rev().filter(|s| !s.single_child && s.size < 0),
            options.max_count,
        )?;
    } else {
        writeln!(out, "Sorted by Size")?;
        write_folder_list(
            out,
            stats.iter().filter(|s| !s.single_child),
            options.max_count,
        )?;
    }

    stats.sort_by(collation::folder_by_path);
    writeln!(out, "Sorted by Path")?;
    write_folder_list(
        out,
        stats.iter().filter(|s| s.size != 0 || s.count != 0),
        usize::MAX,
    )?;
    Ok(())
}

fn write_folder_list<'a>(
    out: &mut dyn Write,
    stats: impl Iterator<Item = &'a FolderStat>,
    max_count: usize,
) -> Result {
    writeln!(out, "{:>12}{:>8}  {}", "Size", "Count", "Source Path")?;
    for s in stats.take(max_count) {
        let path = if s.path.is_empty() {
            UNKNOWN_PATH
        } else {
            s.path.as_str()
        };
        writeln!(out, "{:>12}{:>8}  {}", s.size, s.count, path)?;
    }
    writeln!(out)?;
    Ok(())
}

fn write_merged(
    out: &mut dyn Write,
    mut merged: Vec<MergedSymbol>,
    options: &ReportOptions,
) -> Result {
    writeln!(out, "Merged Count  : {}", merged.len())?;
    writeln!(out, "{RULE}")?;

    merged.sort_by(collation::by_count);
    if options.show_differences {
        writeln!(out, "Increases in Total Count")?;
        write_merged_list(
            out,
            merged.iter().filter(|m| m.total_count > 0),
            options.max_count,
        )?;
        writeln!(out, "Decreases in Total Count")?;
        write_merged_list(
            out,
            merged.iter().rev().filter(|m| m.total_count < 0),
            options.max_count,
        )?;
    } else {
        writeln!(out, "Sorted by Total Count")?;
        write_merged_list(
            out,
            merged.iter().filter(|m| m.total_count != 1),
            options.max_count,
        )?;
    }

    merged.sort_by(collation::by_size);
    if options.show_differences {
        writeln!(out, "Increases in Total Size")?;
        write_merged_list(
            out,
            merged.iter().filter(|m| m.total_size > 0),
            options.max_count,
        )?;
        writeln!(out, "Decreases in Total Size")?;
        write_merged_list(
            out,
            merged.iter().rev().filter(|m| m.total_size < 0),
            options.max_count,
        )?;
    } else {
        writeln!(out, "Sorted by Total Size")?;
        write_merged_list(
            out,
            merged.iter().filter(|m| m.total_count != 1),
            options.max_count,
        )?;
    }
    writeln!(out)?;
    Ok(())
}

fn write_merged_list<'a>(
    out: &mut dyn Write,
    merged: impl Iterator<Item = &'a MergedSymbol>,
    max_count: usize,
) -> Result {
    writeln!(out, "{:>12} {:>12}  {}", "Total Size", "Total Count", "Name")?;
    for m in merged.take(max_count) {
        writeln!(out, "{:>12} {:>12}  {}", m.total_size, m.total_count, m.id)?;
    }
    writeln!(out)?;
    Ok(())
}

#[tracing::instrument(skip_all, name = "Write complete listing")]
fn write_complete(out: &mut dyn Write, symbols: &mut [Symbol]) -> Result {
    symbols.sort_by(by_address);
    writeln!(
        out,
        "{:>12} {:>12} {:>12} {:>12}  {:<120}  {}",
        "Addr. Start", "Addr. End", "Unique Size", "Section/Type", "Name", "Source"
    )?;
    for s in symbols.iter() {
        writeln!(
            out,
            "{:>12} {:>12} {:>12} {:>12}  {:<120}  {}",
            s.rva_start, s.rva_end, s.size, s.section, s.name, s.source_filename
        )?;
    }
    writeln!(out)?;
    Ok(())
}

/// Largest first, then by name.
fn by_size_then_name(a: &Symbol, b: &Symbol) -> Ordering {
    b.size.cmp(&a.size).then_with(|| a.name.cmp(&b.name))
}

/// Lowest start first. Of symbols starting at the same address, enclosing ones come first.
fn by_address(a: &Symbol, b: &Symbol) -> Ordering {
    a.rva_start
        .cmp(&b.rva_start)
        .then_with(|| b.rva_end.cmp(&a.rva_end))
        .then_with(|| b.size.cmp(&a.size))
        .then_with(|| a.name.cmp(&b.name))
}
