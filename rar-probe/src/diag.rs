//! Diagnostics sink for scan progress and advisories.
//!
//! Records go to the caller's output stream; everything else goes here.
//! The scanner never writes to stderr directly, so callers (and tests) can
//! route diagnostics wherever they want.

use std::io::{self, Write};

/// A verbosity-aware message sink.
///
/// Two levels are used while scanning:
/// - [`Diag::info`] — per-entry progress, printed only in verbose mode
/// - [`Diag::note`] — advisories that are always printed (no candidate
///   found, plaintext too small to verify reliably)
///
/// Both are prefixed with `"! "`. Errors are not routed through the sink;
/// they propagate as [`crate::RarError`] and the caller reports them.
pub struct Diag {
    verbose: bool,
    sink: Box<dyn Write>,
}

impl Diag {
    /// A sink over stderr, the usual choice for the CLI.
    pub fn stderr(verbose: bool) -> Self {
        Self::with_sink(verbose, Box::new(io::stderr()))
    }

    /// A sink over an arbitrary writer.
    pub fn with_sink(verbose: bool, sink: Box<dyn Write>) -> Self {
        Diag { verbose, sink }
    }

    /// Whether verbose diagnostics are enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Print a progress message, only in verbose mode.
    pub(crate) fn info(&mut self, msg: &str) {
        if self.verbose {
            let _ = writeln!(self.sink, "! {msg}");
        }
    }

    /// Print an advisory, regardless of verbosity.
    pub(crate) fn note(&mut self, msg: &str) {
        let _ = writeln!(self.sink, "! {msg}");
    }
}
