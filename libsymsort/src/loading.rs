//! Works out what kind of file each input is, then loads it into canonical symbol records.

use crate::comdat;
use crate::error::Result;
use crate::nm;
use crate::object_debug_info::ObjectDebugInfo;
use crate::pdb_symbols;
use crate::pdb_symbols::DebugInfoOptions;
use crate::progress::ProgressSink;
use crate::symbol::Symbol;
use anyhow::Context as _;
use std::path::Path;
use std::path::PathBuf;

/// Extensions that always identify a binary or debug info file.
const DEBUG_INFO_EXTENSIONS: [&str; 3] = ["pdb", "exe", "dll"];

/// How many lines of a text input are examined when guessing its format.
const SNIFF_LINES: usize = 64;

/// A SysV-format `nm` line has 6 separators between its 7 fields.
const SYSV_SEPARATORS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputKind {
    /// Work out the kind from the file's name and contents.
    #[default]
    Auto,

    /// A binary, or a separate debug file, read through a `DebugInfoProvider`.
    DebugInfo,

    /// Output of `dumpbin /headers`.
    Comdat,

    /// Output of `nm --format=sysv`.
    SysV,

    /// Output of `nm --format=bsd --print-size`.
    Bsd,
}

impl InputKind {
    /// Parses the suffix of options like `-in:comdat`.
    pub(crate) fn from_selector(selector: &str) -> Option<InputKind> {
        Some(match selector {
            "auto" => InputKind::Auto,
            "pdb" | "debuginfo" => InputKind::DebugInfo,
            "comdat" => InputKind::Comdat,
            "sysv" => InputKind::SysV,
            "bsd" => InputKind::Bsd,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub path: PathBuf,
    pub kind: InputKind,
}

impl InputFile {
    pub fn new(path: impl Into<PathBuf>, kind: InputKind) -> InputFile {
        InputFile {
            path: path.into(),
            kind,
        }
    }
}

/// Loads all symbols from `input`. Debug info inputs have their overlaps resolved before
/// returning.
#[tracing::instrument(skip_all, name = "Load symbols", fields(path = %input.path.display()))]
pub fn load_symbols(
    input: &InputFile,
    search_path: Option<&str>,
    options: &DebugInfoOptions,
    progress: &mut dyn ProgressSink,
) -> Result<Vec<Symbol>> {
    let path = input.path.as_path();

    if input.kind == InputKind::DebugInfo
        || (input.kind == InputKind::Auto && has_debug_info_extension(path))
    {
        return load_debug_info(path, search_path, options, progress);
    }

    let data = std::fs::read(path).with_context(|| format!("Failed to read `{}`", path.display()))?;
    if input.kind == InputKind::Auto && object::FileKind::parse(data.as_slice()).is_ok() {
        return load_debug_info(path, search_path, options, progress);
    }

    let text = String::from_utf8_lossy(&data);
    let format = match input.kind {
        InputKind::Comdat => TextFormat::Comdat,
        InputKind::SysV => TextFormat::Nm(nm::Dialect::SysV),
        InputKind::Bsd => TextFormat::Nm(nm::Dialect::Bsd),
        InputKind::Auto | InputKind::DebugInfo => sniff_text_format(&text),
    };
    tracing::debug!(?format, "Input format");

    let symbols = match format {
        TextFormat::Comdat => comdat::parse(&text, progress)?,
        TextFormat::Nm(dialect) => nm::parse(&text, dialect, progress),
    };
    tracing::debug!(count = symbols.len(), "Loaded symbols");
    Ok(symbols)
}

fn load_debug_info(
    path: &Path,
    search_path: Option<&str>,
    options: &DebugInfoOptions,
    progress: &mut dyn ProgressSink,
) -> Result<Vec<Symbol>> {
    let provider = ObjectDebugInfo::open(path, search_path)?;
    pdb_symbols::read_symbols(&provider, options, progress)
        .with_context(|| format!("Failed to read symbols from `{}`", path.display()))
}

fn has_debug_info_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            DEBUG_INFO_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextFormat {
    Comdat,
    Nm(nm::Dialect),
}

/// Guesses which text format `text` is in from its first few lines.
fn sniff_text_format(text: &str) -> TextFormat {
    let mut format = TextFormat::Nm(nm::Dialect::Bsd);
    for line in text.lines().take(SNIFF_LINES) {
        if line.contains("Dump of file") {
            return TextFormat::Comdat;
        }
        if line.matches('|').count() >= SYSV_SEPARATORS {
            format = TextFormat::Nm(nm::Dialect::SysV);
        }
    }
    format
}

/// Removes every symbol whose name contains one of `exclusions`.
#[tracing::instrument(skip_all, name = "Remove exclusions")]
pub fn remove_excluded(symbols: &mut Vec<Symbol>, exclusions: &[String]) {
    if exclusions.is_empty() {
        return;
    }
    let before = symbols.len();
    symbols.retain(|symbol| !exclusions.iter().any(|e| symbol.name.contains(e.as_str())));
    tracing::debug!(removed = before - symbols.len());
}

/// Removes the records synthesised to cover unclaimed addresses.
pub fn remove_unmapped(symbols: &mut Vec<Symbol>) {
    symbols.retain(|symbol| !symbol.is_unmapped());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors() {
        assert_eq!(InputKind::from_selector("sysv"), Some(InputKind::SysV));
        assert_eq!(InputKind::from_selector("pdb"), Some(InputKind::DebugInfo));
        assert_eq!(InputKind::from_selector("elf"), None);
    }

    #[test]
    fn sniffing() {
        assert_eq!(
            sniff_text_format("\nDump of file foo.obj\n\nFILE HEADER VALUES\n"),
            TextFormat::Comdat
        );
        assert_eq!(
            sniff_text_format(
                "Symbols from a.out:\n\nName                  Value   Class        Type         Size     Line  Section\n\nmain|0000000000001139|   T  |              FUNC|000000000000000b|     |.text\n"
            ),
            TextFormat::Nm(nm::Dialect::SysV)
        );
        assert_eq!(
            sniff_text_format("0000000000001139 000000000000000b T main\n"),
            TextFormat::Nm(nm::Dialect::Bsd)
        );
    }

    #[test]
    fn extensions() {
        assert!(has_debug_info_extension(Path::new("c:/build/App.EXE")));
        assert!(has_debug_info_extension(Path::new("app.pdb")));
        assert!(!has_debug_info_extension(Path::new("app.txt")));
        assert!(!has_debug_info_extension(Path::new("pdb")));
    }

    #[test]
    fn exclusions() {
        let mut symbols = vec![
            Symbol::new("std::vector<int>::push_back", 0, 1),
            Symbol::new("main", 1, 1),
            Symbol::new("boost::any", 2, 1),
        ];
        remove_excluded(&mut symbols, &["std::".to_owned(), "boost".to_owned()]);
        itertools::assert_equal(symbols.iter().map(|s| s.name.as_str()), ["main"]);
    }
}
