//! A handwritten parser for our arguments.
//!
//! Options are accepted with either one or two leading dashes and are case-insensitive. Values
//! can be given as the next argument (`-out report.txt`) or inline (`--out=report.txt`). Input
//! options take an optional type selector after a colon, e.g. `-in:sysv symbols.txt`.

use crate::collation::PathReplacement;
use crate::error::Result;
use crate::loading::InputFile;
use crate::loading::InputKind;
use crate::pdb_symbols::DebugInfoOptions;
use anyhow::Context as _;
use anyhow::bail;
use anyhow::ensure;
use regex::Regex;
use std::path::Path;
use std::path::PathBuf;

const DEFAULT_MAX_COUNT: usize = 500;

pub const USAGE: &str = "\
Usage: symsort [options]

Options:
  -in[:type] filename
      Specify an input file with optional type. Binaries are identified by their
      contents and PDB, EXE and DLL files by extension. Otherwise type may be:
          auto      - guess from the file name and contents (the default)
          debuginfo - a binary or separate debug file (also accepted as `pdb`)
          comdat    - the format produced by DumpBin /headers
          sysv      - the format produced by nm --format=sysv
          bsd       - the format produced by nm --format=bsd --print-size

  -out filename
      Write output to specified file instead of stdout

  -count num_symbols
      Limit the number of symbols displayed to num_symbols

  -exclude substring
      Exclude symbols that contain the specified substring

  -diff[:type] filename
      Use this file as a basis for generating a differences report.
      See -in option for valid types.

  -searchpath path
      Directories searched for separate debug files when loading a binary

  -path_replace regex_match regex_replace
      Specify a regular expression search/replace for symbol paths.
      Multiple path_replace sequences can be specified for a single
      run. For example: -path_replace d:\\\\SDK_v1 c:\\SDK -path_replace
      d:\\\\SDK_v2 c:\\SDK

  -complete
      Include a complete listing of all symbols sorted by address.

  -time
      Print how long each phase takes to stderr.

  @filename
      Read arguments from filename. Can't be combined with other arguments.

Options specific to debug info inputs:
  -include_public_symbols
      Include 'public symbols'. Many symbols are listed redundantly as
      public symbols. These provide a slightly different view as they are
      named more descriptively and usually include padding for alignment
      in their sizes.

  -keep_redundant_symbols
      Normally symbols are processed to remove redundancies. Partially
      overlapped symbols are adjusted so that their sizes aren't over
      reported and completely overlapped symbols are discarded
      completely. This option preserves all symbols and their reported
      sizes.

  -include_sections_as_symbols
      Attempt to extract entire sections and treat them as individual
      symbols. This can be useful when mapping sections of an
      executable that don't otherwise contain symbols.

  -include_unmapped_addresses
      Insert fake symbols representing any unmapped addresses. This
      option can highlight sections of the executable that aren't
      directly attributable to symbols. In the complete view this will
      also highlight space lost due to alignment padding.
";

#[derive(Debug)]
pub struct Args {
    pub inputs: Vec<InputFile>,

    /// Baseline inputs. When present, the report shows differences from these.
    pub differences: Vec<InputFile>,

    /// Where to write the report. Stdout if not set.
    pub output: Option<PathBuf>,

    pub max_count: usize,
    pub exclusions: Vec<String>,
    pub search_path: Option<String>,
    pub path_replacements: Vec<PathReplacement>,
    pub complete: bool,
    pub debug_info: DebugInfoOptions,
    pub include_unmapped_addresses: bool,
    pub time_phases: bool,
}

#[derive(Debug)]
pub(crate) enum Action {
    Report(Args),
    Help,
    Version,
}

impl Default for Args {
    fn default() -> Self {
        Args {
            inputs: Vec::new(),
            differences: Vec::new(),
            output: None,
            max_count: DEFAULT_MAX_COUNT,
            exclusions: Vec::new(),
            search_path: None,
            path_replacements: Vec::new(),
            complete: false,
            debug_info: DebugInfoOptions::default(),
            include_unmapped_addresses: false,
            time_phases: false,
        }
    }
}

fn strip_option(arg: &str) -> Option<&str> {
    arg.strip_prefix("--").or(arg.strip_prefix('-'))
}

pub(crate) fn parse<S: AsRef<str>, I: Iterator<Item = S>>(mut input: I) -> Result<Action> {
    let mut args = Args::default();
    let mut unrecognised = Vec::new();

    let mut arg_num = 0;
    while let Some(arg) = input.next() {
        arg_num += 1;
        let arg = arg.as_ref();

        if let Some(path) = arg.strip_prefix('@') {
            if input.next().is_some() || arg_num > 1 {
                bail!("Mixing of @{{filename}} and regular arguments isn't supported");
            }
            return parse_from_argument_file(Path::new(path));
        }

        let Some(option) = strip_option(arg) else {
            unrecognised.push(format!("`{arg}`"));
            continue;
        };
        let option = option.to_ascii_lowercase();
        let (option, inline_value) = match option.split_once('=') {
            Some((option, value)) => (option, Some(value)),
            None => (option.as_str(), None),
        };
        let (option, selector) = match option.split_once(':') {
            Some((option, selector)) => (option, Some(selector)),
            None => (option, None),
        };

        // Inline values keep their original case. `option` was lower-cased, so find the value
        // again in `arg`.
        let inline_value = inline_value.map(|v| &arg[arg.len() - v.len()..]);
        let mut value = || -> Result<String> {
            match inline_value {
                Some(value) => Ok(value.to_owned()),
                None => input
                    .next()
                    .map(|v| v.as_ref().to_owned())
                    .with_context(|| format!("Missing argument to -{option}")),
            }
        };

        match (option, selector) {
            ("in" | "diff", selector) => {
                let kind = match selector {
                    Some(selector) => InputKind::from_selector(selector)
                        .with_context(|| format!("Unknown input type `{selector}` in `{arg}`"))?,
                    None => InputKind::Auto,
                };
                let file = InputFile::new(value()?, kind);
                if option == "in" {
                    args.inputs.push(file);
                } else {
                    args.differences.push(file);
                }
            }
            ("out", None) => args.output = Some(PathBuf::from(value()?)),
            ("count", None) => {
                let count = value()?;
                args.max_count = count
                    .parse()
                    .with_context(|| format!("Invalid -count `{count}`"))?;
            }
            ("exclude", None) => args.exclusions.push(value()?),
            ("searchpath", None) => args.search_path = Some(value()?),
            ("path_replace", None) => {
                let pattern = value()?;
                let pattern = Regex::new(&pattern)
                    .with_context(|| format!("Invalid -path_replace regex `{pattern}`"))?;
                let replacement = input
                    .next()
                    .context("Missing replacement for -path_replace")?
                    .as_ref()
                    .to_owned();
                args.path_replacements.push(PathReplacement {
                    pattern,
                    replacement,
                });
            }
            ("complete", None) => args.complete = true,
            ("include_public_symbols", None) => args.debug_info.include_public_symbols = true,
            ("keep_redundant_symbols", None) => args.debug_info.keep_redundant_symbols = true,
            ("include_sections_as_symbols", None) => {
                args.debug_info.include_sections_as_symbols = true;
            }
            ("include_unmapped_addresses", None) => args.include_unmapped_addresses = true,
            ("time", None) => args.time_phases = true,
            ("help" | "h" | "?", None) => return Ok(Action::Help),
            ("version", None) => return Ok(Action::Version),
            _ => unrecognised.push(format!("`{arg}`")),
        }
    }

    if !unrecognised.is_empty() {
        bail!("Unrecognised argument(s): {}", unrecognised.join(" "));
    }

    args.validate()?;
    Ok(Action::Report(args))
}

fn parse_from_argument_file(path: &Path) -> Result<Action> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read arguments from file `{}`", path.display()))?;
    parse(arguments_from_string(&contents)?.into_iter())
}

impl Args {
    fn validate(&self) -> Result {
        ensure!(
            !self.inputs.is_empty(),
            "At least one input file must be specified"
        );
        for input in &self.inputs {
            ensure!(
                input.path.exists(),
                "Input file `{}` does not exist",
                input.path.display()
            );
        }
        for input in &self.differences {
            ensure!(
                input.path.exists(),
                "Difference file `{}` does not exist",
                input.path.display()
            );
        }
        Ok(())
    }

    #[must_use]
    pub fn show_differences(&self) -> bool {
        !self.differences.is_empty()
    }
}

/// Parses arguments from a string, handling quoting, escapes etc.
/// All arguments must be surrounded by a white space.
fn arguments_from_string(input: &str) -> Result<Vec<String>> {
    const QUOTES: [char; 2] = ['\'', '"'];

    let mut out = Vec::new();
    let mut chars = input.chars();
    let mut current: Option<String> = None;
    let mut quote = None;
    let mut expect_whitespace = false;

    loop {
        let Some(mut ch) = chars.next() else {
            if let Some(quote) = quote.take() {
                bail!("Missing closing '{quote}'");
            }
            out.extend(current.take());
            break;
        };

        ensure!(
            !expect_whitespace || ch.is_whitespace(),
            "Expected white space after quoted argument"
        );
        expect_whitespace = false;

        if QUOTES.contains(&ch) {
            match quote {
                Some(open) if open == ch => {
                    out.extend(current.take());
                    quote = None;
                    expect_whitespace = true;
                }
                Some(_) => current.get_or_insert_default().push(ch),
                None => {
                    ensure!(current.is_none(), "Missing opening quote '{ch}'");
                    quote = Some(ch);
                }
            }
        } else if ch.is_whitespace() && quote.is_none() {
            out.extend(current.take());
        } else {
            if ch == '\\' && quote != Some('\'') {
                ch = chars.next().context("Invalid escape")?;
            }
            current.get_or_insert_default().push(ch);
        }
    }

    Ok(out)
}
