#![forbid(unsafe_code)]

//! keepn CLI entry point.

use clap::Parser;

mod cli_app;

fn main() {
    // Usage errors share the configuration exit code; help and version exit 0.
    let args = match cli_app::Cli::try_parse() {
        Ok(args) => args,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(1);
        }
        Err(e) => e.exit(),
    };
    if let Err(e) = cli_app::run(&args) {
        eprintln!("keepn: {e}");
        std::process::exit(e.exit_code());
    }
}
