fn main() {
    let args = std::env::args();
    // Initialize logging as early as possible; fallback to stderr on failure.
    let _ = boxfs::logging::init_logging(boxfs::logging::LogFormat::Human);

    if let Err(err) = boxfs::run(args) {
        eprintln!("boxfs error: {err}");
        std::process::exit(1);
    }
}
