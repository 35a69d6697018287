//! # rar-probe
//!
//! Inspects password-protected RAR archives (3.x and 5.x) and emits one
//! textual "hash record" per attackable unit: the key-derivation salt, the
//! iteration exponent, any password-verification token, the encryption IV,
//! and — for RAR3 archives that encrypt only file contents — the selected
//! entry's ciphertext with its sizes, CRC and compression method. The
//! records feed an offline password-recovery engine; nothing is decrypted
//! here.
//!
//! ## Supported inputs
//!
//! - **RAR 3.x** archives in `-p` (per-file encryption) and `-hp`
//!   (encrypted headers) modes
//! - **RAR 5.x** archives with encrypted entries or encrypted headers,
//!   provided a password-check value is stored
//! - **SFX archives**: the executable stub is scanned for the embedded
//!   RAR signature
//!
//! Pre-1.5 archives are rejected. Multi-volume sets are not reassembled;
//! each volume is treated as an independent archive.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use rar_probe::Diag;
//!
//! let mut out = std::io::stdout().lock();
//! let mut diag = Diag::stderr(false);
//! match rar_probe::scan_path("archive.rar", &mut diag, &mut out) {
//!     Ok(records) => eprintln!("{records} record(s)"),
//!     Err(err) => eprintln!("archive.rar: {err}"),
//! }
//! ```
//!
//! Records are assembled in memory and written as whole lines, so a writer
//! shared between archives never sees a torn record.

#![warn(clippy::all)]

pub mod diag;
pub mod error;
mod record;
mod sfx;
mod v3;
mod v5;

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

pub use diag::Diag;
pub use error::{RarError, Result};

/// RAR 1.x signature, recognized only to reject it.
const OLD_SIGNATURE: [u8; 4] = [0x52, 0x45, 0x7E, 0x5E];

/// Names under which an archive appears in emitted records.
#[derive(Debug, Clone)]
pub struct ArchiveNames {
    /// The archive's base file name.
    pub base: String,
    /// The path as given by the caller.
    pub path: String,
}

impl ArchiveNames {
    /// Build from a command-line argument.
    pub fn from_arg(arg: &str) -> Self {
        let base = Path::new(arg)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| arg.to_owned());
        ArchiveNames {
            base,
            path: arg.to_owned(),
        }
    }
}

/// Open the archive at `arg` and scan it, writing hash-record lines to
/// `out`. Returns the number of records emitted.
pub fn scan_path<W: Write>(arg: &str, diag: &mut Diag, out: &mut W) -> Result<u32> {
    let file = File::open(arg)?;
    let names = ArchiveNames::from_arg(arg);
    scan_reader(BufReader::new(file), &names, diag, out)
}

/// Classify and scan an archive from any seekable byte source.
///
/// Dispatch order: the pre-1.5 signature is rejected, the RAR3 and RAR5
/// signatures at offset zero select their parser, and an `MZ` prefix
/// triggers an SFX scan for an embedded signature (RAR3 first, then RAR5).
/// Anything else is [`RarError::NotArchive`].
pub fn scan_reader<R: Read + Seek, W: Write>(
    mut reader: R,
    names: &ArchiveNames,
    diag: &mut Diag,
    out: &mut W,
) -> Result<u32> {
    let mut magic = [0u8; 8];
    let magic_len = sfx::read_fill(&mut reader, &mut magic)?;

    // Anything too short to hold the RAR3 signature is not an archive, no
    // matter what its first bytes look like.
    if magic_len < v3::RAR3_SIGNATURE.len() {
        return Err(RarError::NotArchive);
    }
    if magic[..OLD_SIGNATURE.len()] == OLD_SIGNATURE {
        return Err(RarError::OldVersion);
    }
    if magic[..v3::RAR3_SIGNATURE.len()] == v3::RAR3_SIGNATURE {
        reader.seek(SeekFrom::Start(v3::RAR3_SIGNATURE.len() as u64))?;
        return v3::scan(&mut reader, names, diag, out);
    }
    if magic_len >= v5::RAR5_SIGNATURE.len() && magic == v5::RAR5_SIGNATURE {
        reader.seek(SeekFrom::Start(v5::RAR5_SIGNATURE.len() as u64))?;
        return v5::scan(&mut reader, names, diag, out);
    }
    if &magic[..2] == b"MZ" {
        reader.seek(SeekFrom::Start(0))?;
        if sfx::seek_past_signature(&mut reader, &v3::RAR3_SIGNATURE)? {
            diag.info(&format!("{}: RAR3 signature inside SFX stub", names.base));
            return v3::scan(&mut reader, names, diag, out);
        }
        reader.seek(SeekFrom::Start(0))?;
        if sfx::seek_past_signature(&mut reader, &v5::RAR5_SIGNATURE)? {
            diag.info(&format!("{}: RAR5 signature inside SFX stub", names.base));
            return v5::scan(&mut reader, names, diag, out);
        }
    }

    Err(RarError::NotArchive)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
