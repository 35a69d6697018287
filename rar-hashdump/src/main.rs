//! # rar-hashdump
//!
//! Dumps crackable hash records from password-protected RAR 3.x/5.x
//! archives, one line per record on stdout:
//!
//! ```text
//! rar-hashdump [-v] <ARCHIVE>...
//! ```
//!
//! Diagnostics go to stderr; `-v` adds per-entry detail. Failures are
//! isolated per archive — a corrupt input is reported and the remaining
//! archives are still scanned — and the exit code stays 0 once the
//! arguments parse.

use std::io;

use clap::Parser;

use rar_probe::Diag;

/// Extract password-recovery hash records from encrypted RAR archives.
#[derive(Debug, Parser)]
#[command(name = "rar-hashdump", version, about)]
struct Cli {
    /// Print verbose diagnostics on stderr
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// RAR archive(s) to inspect
    #[arg(value_name = "ARCHIVE", required = true)]
    archives: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut diag = Diag::stderr(cli.verbose);

    for archive in &cli.archives {
        if let Err(err) = rar_probe::scan_path(archive, &mut diag, &mut out) {
            eprintln!("! {archive}: {err}");
        }
    }
}
