//! Hash-record assembly and rendering.
//!
//! A record is built completely in memory and written as one call, so a
//! half-formatted candidate can never smear bytes into the output stream
//! and concurrent writers keep lines intact.

use std::fmt::{self, Display};
use std::io::Write;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;

use crate::error::Result;

/// A fully assembled hash record, ready to be rendered as a single line.
///
/// Byte fields render as lowercase base-16 for the RAR3 syntaxes and as
/// unpadded base64 for RAR5, matching what password-recovery loaders expect.
#[derive(Debug, Clone)]
pub(crate) enum HashRecord {
    /// RAR3 `-hp` mode: all headers are encrypted, so the record carries the
    /// archive salt and the fixed-plaintext block from the archive tail.
    Rar3EncryptedHeaders {
        base: String,
        path: String,
        salt: [u8; 8],
        block: [u8; 16],
    },
    /// RAR3 `-p` mode: one selected encrypted file entry, ciphertext inlined.
    Rar3File {
        base: String,
        salt: [u8; 8],
        crc: [u8; 4],
        packed_size: u64,
        unpacked_size: u64,
        method: u8,
        ciphertext: Vec<u8>,
        /// Space-terminated accumulation of every file name seen in the archive.
        names: String,
    },
    /// RAR5: key-derivation parameters plus password check, one per
    /// encrypted entry (or one for the whole archive under `-hp`).
    Rar5 {
        base: String,
        salt: [u8; 16],
        log2_count: u8,
        iv: [u8; 16],
        pswcheck: [u8; 12],
    },
}

impl HashRecord {
    /// Render the record and write it as one atomic line.
    pub fn write_line<W: Write>(&self, out: &mut W) -> Result<()> {
        let mut line = self.to_string();
        line.push('\n');
        out.write_all(line.as_bytes())?;
        Ok(())
    }
}

impl Display for HashRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashRecord::Rar3EncryptedHeaders {
                base,
                path,
                salt,
                block,
            } => {
                write!(f, "{base}:$RAR3$*0*{}*{}:0::::{path}", Hex(salt), Hex(block))
            }
            HashRecord::Rar3File {
                base,
                salt,
                crc,
                packed_size,
                unpacked_size,
                method,
                ciphertext,
                names,
            } => write!(
                f,
                "{base}:$RAR3$*1*{}*{}*{packed_size}*{unpacked_size}*1*{}*{method:02x}:1::{names}",
                Hex(salt),
                Hex(crc),
                Hex(ciphertext),
            ),
            HashRecord::Rar5 {
                base,
                salt,
                log2_count,
                iv,
                pswcheck,
            } => write!(
                f,
                "{base}:$rar5${}${}${log2_count}${}${}${}",
                salt.len(),
                STANDARD_NO_PAD.encode(salt),
                STANDARD_NO_PAD.encode(iv),
                pswcheck.len(),
                STANDARD_NO_PAD.encode(pswcheck),
            ),
        }
    }
}

/// Lowercase base-16 display adapter for byte fields.
pub(crate) struct Hex<'a>(pub &'a [u8]);

impl Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_renders_lowercase_pairs() {
        assert_eq!(Hex(&[0x00, 0x1a, 0xff]).to_string(), "001aff");
        assert_eq!(Hex(&[]).to_string(), "");
    }

    #[test]
    fn encrypted_headers_record_line() {
        let record = HashRecord::Rar3EncryptedHeaders {
            base: "x.rar".into(),
            path: "dir/x.rar".into(),
            salt: [0, 1, 2, 3, 4, 5, 6, 7],
            block: [0xaa; 16],
        };
        assert_eq!(
            record.to_string(),
            "x.rar:$RAR3$*0*0001020304050607*aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa:0::::dir/x.rar"
        );
    }

    #[test]
    fn file_record_line() {
        let record = HashRecord::Rar3File {
            base: "a.rar".into(),
            salt: [1; 8],
            crc: [0xde, 0xad, 0xbe, 0xef],
            packed_size: 16,
            unpacked_size: 10,
            method: 0x30,
            ciphertext: vec![0x10, 0x32],
            names: "f.txt ".into(),
        };
        assert_eq!(
            record.to_string(),
            "a.rar:$RAR3$*1*0101010101010101*deadbeef*16*10*1*1032*30:1::f.txt "
        );
    }

    #[test]
    fn rar5_record_uses_unpadded_base64() {
        let mut salt = [0u8; 16];
        let mut pswcheck = [0u8; 12];
        for (i, b) in salt.iter_mut().enumerate() {
            *b = i as u8;
        }
        for (i, b) in pswcheck.iter_mut().enumerate() {
            *b = 0x10 + i as u8;
        }
        let record = HashRecord::Rar5 {
            base: "v.rar".into(),
            salt,
            log2_count: 15,
            iv: [0; 16],
            pswcheck,
        };
        // Pins the alphabet and the absence of padding.
        assert_eq!(
            record.to_string(),
            "v.rar:$rar5$16$AAECAwQFBgcICQoLDA0ODw$15$AAAAAAAAAAAAAAAAAAAAAAA$12$EBESExQVFhcYGRob"
        );
    }
}
