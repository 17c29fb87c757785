use crate::args::Action;
use crate::args::Args;
use crate::loading::InputFile;
use crate::symbol::Symbol;
use anyhow::Context as _;
use std::io::Write as _;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub mod args;
pub mod collation;
pub mod comdat;
pub mod debug_info;
pub mod diff;
pub mod error;
pub mod fixture;
pub mod loading;
pub mod nm;
pub mod object_debug_info;
pub(crate) mod path_utils;
pub mod pdb_symbols;
pub mod progress;
pub mod report;
pub mod resolution;
pub mod symbol;
pub(crate) mod timing;

pub use args::USAGE;

/// When set to `1`, progress through each input is logged at info level rather than debug.
const PROGRESS_ENV: &str = "SYMSORT_PROGRESS";

pub struct SymbolSort {
    action: Action,
}

impl SymbolSort {
    pub fn from_args<S: AsRef<str>, I: Iterator<Item = S>>(args: I) -> error::Result<Self> {
        Ok(SymbolSort {
            action: args::parse(args)?,
        })
    }

    pub fn run(&self) -> error::Result {
        match &self.action {
            Action::Report(args) => {
                if args.time_phases {
                    // A subscriber may already be installed when we're run from tests.
                    let _ = timing::init_tracing();
                } else {
                    let _ = tracing_subscriber::registry()
                        .with(fmt::layer().with_writer(std::io::stderr))
                        .with(EnvFilter::from_default_env())
                        .try_init();
                }
                write_report(args)
            }
            Action::Help => {
                print!("{USAGE}");
                Ok(())
            }
            Action::Version => {
                println!("symsort version {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

#[tracing::instrument(skip_all, name = "Symsort")]
fn write_report(args: &Args) -> error::Result {
    // Open the output first, so that we don't do all the work only to find we can't write it.
    let mut out: Box<dyn std::io::Write> = match &args.output {
        Some(path) => Box::new(std::io::BufWriter::new(
            std::fs::File::create(path)
                .with_context(|| format!("Failed to create `{}`", path.display()))?,
        )),
        None => Box::new(std::io::BufWriter::new(std::io::stdout().lock())),
    };

    let mut symbols = Vec::new();
    for input in &args.inputs {
        symbols.extend(load(input, args)?);
    }
    for input in &args.differences {
        let baseline = load(input, args)?;
        diff::append_difference(&mut symbols, baseline);
    }

    loading::remove_excluded(&mut symbols, &args.exclusions);

    let totals = report::Totals::of(&symbols);
    if totals.unattributed > 0 && !args.include_unmapped_addresses {
        loading::remove_unmapped(&mut symbols);
    }

    report::write_report(
        &mut out,
        &mut symbols,
        &totals,
        &report::ReportOptions {
            max_count: args.max_count,
            show_differences: args.show_differences(),
            complete: args.complete,
            path_replacements: &args.path_replacements,
        },
    )?;
    out.flush().context("Failed to write report")?;
    Ok(())
}

fn load(input: &InputFile, args: &Args) -> error::Result<Vec<Symbol>> {
    let verbose = std::env::var(PROGRESS_ENV).is_ok_and(|v| v == "1");
    let path = input.path.display();
    let mut progress = |percent: u32| {
        if verbose {
            tracing::info!(%path, percent, "Loading");
        } else {
            tracing::debug!(%path, percent, "Loading");
        }
    };

    let symbols = loading::load_symbols(
        input,
        args.search_path.as_deref(),
        &args.debug_info,
        &mut progress,
    )?;
    if symbols.is_empty() {
        error::warning(&format!("No symbols found in `{path}`"));
    }
    Ok(symbols)
}
