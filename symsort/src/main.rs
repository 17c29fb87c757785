fn main() {
    if let Err(error) = run() {
        libsymsort::error::report_error_and_exit(&error)
    }
}

fn run() -> libsymsort::error::Result {
    let symsort = libsymsort::SymbolSort::from_args(std::env::args().skip(1)).inspect_err(|_| {
        eprintln!("{}", libsymsort::USAGE);
    })?;
    symsort.run()
}
