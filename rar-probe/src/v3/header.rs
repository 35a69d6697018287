//! RAR 3.x header structures and parsing.
//!
//! Every block starts with a common 7-byte prologue:
//! ```text
//! CRC16   (2 bytes, LE) – CRC of the header fields that follow
//! TYPE    (1 byte)      – block type tag
//! FLAGS   (2 bytes, LE) – block flags
//! SIZE    (2 bytes, LE) – total header size
//! ```
//! The archive header is a fixed 13-byte block; file headers are 32 bytes of
//! fixed fields followed by the name, optional salt, and optional extended
//! time region, all inside the declared header size.

use std::io::{Cursor, Read};

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{RarError, Result};

/// RAR 3.x magic signature bytes.
pub(crate) const RAR3_SIGNATURE: [u8; 7] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00];

/// Block type tag for the archive header.
pub(crate) const HEAD_ARCHIVE: u8 = 0x73;
/// Block type tag for a file entry.
pub(crate) const HEAD_FILE: u8 = 0x74;
/// Block type tag for a new-style subblock (archive comments and such).
pub(crate) const HEAD_NEWSUB: u8 = 0x7A;

/// Fixed size of the file-header field block, up to and including the
/// attributes word.
pub(crate) const FILE_HEADER_LEN: usize = 32;

bitflags! {
    /// Flags carried by the archive header block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct ArchiveFlags: u16 {
        /// Part of a multi-volume set.
        const VOLUME            = 0x0001;
        /// Archive comment present.
        const COMMENT           = 0x0002;
        /// Solid archive.
        const SOLID             = 0x0008;
        /// File headers are encrypted (`-hp` mode).
        const ENCRYPTED         = 0x0080;
    }
}

bitflags! {
    /// Flags carried by file header blocks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct FileFlags: u16 {
        /// Entry continued from the previous volume.
        const SPLIT_BEFORE      = 0x0001;
        /// Entry continues in the next volume.
        const SPLIT_AFTER       = 0x0002;
        /// Entry data is encrypted.
        const ENCRYPTED         = 0x0004;
        /// Old-style file comment present.
        const COMMENT           = 0x0008;
        /// Entry depends on the dictionary of preceding entries.
        const SOLID             = 0x0010;
        /// Dictionary size exponent (bits 5–7); value 7 marks a directory.
        const DICT_MASK         = 0x00E0;
        /// High 32-bit size words follow the fixed fields.
        const LARGE             = 0x0100;
        /// Name field carries the packed OEM+UTF-16 encoding.
        const UNICODE_NAME      = 0x0200;
        /// An 8-byte key-derivation salt follows the name.
        const SALT              = 0x0400;
        /// Extended time region present at the end of the header.
        const EXT_TIME          = 0x1000;
        /// Long-block marker; required on every file header.
        const LONG_BLOCK        = 0x8000;
    }
}

/// Compression method byte: `0x30` stored, up to `0x35` best.
pub(crate) const METHOD_STORE: u8 = 0x30;

/// Parsed 13-byte archive header block.
#[derive(Debug, Clone)]
pub(crate) struct ArchiveHeader {
    pub flags: ArchiveFlags,
    /// Declared header size; anything past the fixed 13 bytes is an opaque
    /// comment region to be skipped.
    pub head_size: u16,
}

impl ArchiveHeader {
    /// Read and validate the archive header at the current position.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut block = [0u8; 13];
        reader.read_exact(&mut block)?;
        if block[2] != HEAD_ARCHIVE {
            return Err(RarError::Corrupt(format!(
                "archive header type tag {:#04x}, expected {HEAD_ARCHIVE:#04x}",
                block[2]
            )));
        }
        Ok(ArchiveHeader {
            flags: ArchiveFlags::from_bits_truncate(u16::from_le_bytes([block[3], block[4]])),
            head_size: u16::from_le_bytes([block[5], block[6]]),
        })
    }
}

/// The fixed fields of a file header block.
#[derive(Debug, Clone)]
pub(crate) struct FileHeader {
    pub tag: u8,
    pub flags: FileFlags,
    pub head_size: u16,
    pub packed_size_low: u32,
    pub unpacked_size_low: u32,
    /// CRC of the unpacked data, kept in stored byte order.
    pub crc: [u8; 4],
    /// Minimum RAR version needed to unpack, tenths (0x1d = 2.9).
    pub required_version: u8,
    pub method: u8,
    pub name_len: u16,
}

impl FileHeader {
    /// Parse the 32 fixed bytes of a file header block.
    pub fn parse(block: &[u8; FILE_HEADER_LEN]) -> Result<Self> {
        let mut cursor = Cursor::new(&block[..]);
        let _head_crc = cursor.read_u16::<LittleEndian>()?;
        let tag = cursor.read_u8()?;
        let flags = FileFlags::from_bits_truncate(cursor.read_u16::<LittleEndian>()?);
        let head_size = cursor.read_u16::<LittleEndian>()?;
        let packed_size_low = cursor.read_u32::<LittleEndian>()?;
        let unpacked_size_low = cursor.read_u32::<LittleEndian>()?;
        let _host_os = cursor.read_u8()?;
        let mut crc = [0u8; 4];
        cursor.read_exact(&mut crc)?;
        let _file_time = cursor.read_u32::<LittleEndian>()?;
        let required_version = cursor.read_u8()?;
        let method = cursor.read_u8()?;
        let name_len = cursor.read_u16::<LittleEndian>()?;
        let _attributes = cursor.read_u32::<LittleEndian>()?;

        Ok(FileHeader {
            tag,
            flags,
            head_size,
            packed_size_low,
            unpacked_size_low,
            crc,
            required_version,
            method,
            name_len,
        })
    }

    /// Dictionary size exponent from the flag word.
    pub fn dict_bits(&self) -> u16 {
        (self.flags.bits() & FileFlags::DICT_MASK.bits()) >> 5
    }

    /// A dictionary exponent of 7 marks a directory entry.
    pub fn is_directory(&self) -> bool {
        self.dict_bits() == 7
    }

    /// Dictionary size in KB (64 KB through 4096 KB).
    pub fn dict_size_kb(&self) -> u32 {
        64 << self.dict_bits()
    }
}

// ---------------------------------------------------------------------------
// Packed wide-name decoding
// ---------------------------------------------------------------------------

/// Capacity of the decoded wide name, in UTF-16 units.
const MAX_WIDE_NAME: usize = 256;

/// Decode the packed OEM+UTF-16 name encoding into a string.
///
/// `oem` is the plain single-byte name preceding the NUL in the name field;
/// `enc` is the packed region after it. The first packed byte is the default
/// high byte; the rest is a 2-bit command stream (MSB first, one flag byte
/// per four commands):
///
/// - `0` — next byte is a character with high byte zero
/// - `1` — next byte is a character with the default high byte
/// - `2` — next two bytes are a little-endian UTF-16 unit
/// - `3` — run length: copy bytes out of `oem`, optionally adding a
///   correction byte and the default high byte
///
/// Decoding stops when either the source or the output capacity runs out.
pub(crate) fn decode_wide_name(oem: &[u8], enc: &[u8]) -> String {
    if enc.len() < 2 {
        return String::new();
    }

    let mut out: Vec<u16> = Vec::new();
    let high_byte = u16::from(enc[0]);
    let mut enc_pos = 1usize;
    let mut flags: u8 = 0;
    let mut flag_bits: u32 = 0;

    while enc_pos < enc.len() - 1 && out.len() < MAX_WIDE_NAME - 1 {
        if flag_bits == 0 {
            flags = enc[enc_pos];
            enc_pos += 1;
            flag_bits = 8;
        }
        match flags >> 6 {
            0 => {
                let Some(&low) = enc.get(enc_pos) else { break };
                enc_pos += 1;
                out.push(u16::from(low));
            }
            1 => {
                let Some(&low) = enc.get(enc_pos) else { break };
                enc_pos += 1;
                out.push(u16::from(low) | (high_byte << 8));
            }
            2 => {
                if enc_pos + 1 >= enc.len() {
                    break;
                }
                out.push(u16::from_le_bytes([enc[enc_pos], enc[enc_pos + 1]]));
                enc_pos += 2;
            }
            _ => {
                let Some(&length) = enc.get(enc_pos) else { break };
                enc_pos += 1;
                if length & 0x80 != 0 {
                    let Some(&correction) = enc.get(enc_pos) else {
                        break;
                    };
                    enc_pos += 1;
                    for _ in 0..u16::from(length & 0x7f) + 2 {
                        if out.len() >= MAX_WIDE_NAME {
                            break;
                        }
                        let base = oem.get(out.len()).copied().unwrap_or(0);
                        out.push(u16::from(base.wrapping_add(correction)) | (high_byte << 8));
                    }
                } else {
                    for _ in 0..u16::from(length) + 2 {
                        if out.len() >= MAX_WIDE_NAME {
                            break;
                        }
                        out.push(u16::from(oem.get(out.len()).copied().unwrap_or(0)));
                    }
                }
            }
        }
        flags <<= 2;
        flag_bits -= 2;
    }

    String::from_utf16_lossy(&out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fixed_file_header_fields() {
        let mut block = [0u8; FILE_HEADER_LEN];
        block[2] = HEAD_FILE;
        block[3] = 0x04; // encrypted
        block[4] = 0x80; // long block
        block[5] = 0x2c; // head size 44
        block[7..11].copy_from_slice(&1000u32.to_le_bytes());
        block[11..15].copy_from_slice(&20u32.to_le_bytes());
        block[16..20].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        block[24] = 0x1d;
        block[25] = 0x33;
        block[26..28].copy_from_slice(&4u16.to_le_bytes());

        let header = FileHeader::parse(&block).unwrap();
        assert_eq!(header.tag, HEAD_FILE);
        assert!(header.flags.contains(FileFlags::ENCRYPTED));
        assert!(header.flags.contains(FileFlags::LONG_BLOCK));
        assert_eq!(header.head_size, 44);
        assert_eq!(header.packed_size_low, 1000);
        assert_eq!(header.unpacked_size_low, 20);
        assert_eq!(header.crc, [0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(header.required_version, 0x1d);
        assert_eq!(header.method, 0x33);
        assert_eq!(header.name_len, 4);
        assert!(!header.is_directory());
    }

    #[test]
    fn dictionary_bits_of_seven_mark_a_directory() {
        let mut block = [0u8; FILE_HEADER_LEN];
        block[2] = HEAD_FILE;
        block[3] = 0xe0;
        let header = FileHeader::parse(&block).unwrap();
        assert_eq!(header.dict_bits(), 7);
        assert!(header.is_directory());
    }

    #[test]
    fn archive_header_rejects_wrong_tag() {
        let mut block = [0u8; 13];
        block[2] = 0x74;
        let err = ArchiveHeader::read(&mut &block[..]).unwrap_err();
        assert!(matches!(err, RarError::Corrupt(_)));
    }

    #[test]
    fn wide_name_plain_low_bytes() {
        // Flag byte of zero yields four command-0 slots.
        let enc = [0x00, 0b0000_0000, b'f', b'o', b'o', 0x00];
        assert_eq!(decode_wide_name(b"", &enc), "foo");
    }

    #[test]
    fn wide_name_applies_default_high_byte() {
        // Command 1 merges the default high byte 0x04 into each unit.
        let enc = [0x04, 0b0101_0101, 0x10, 0x11, 0x12, 0x13, 0x00];
        assert_eq!(decode_wide_name(b"", &enc), "АБВГ");
    }

    #[test]
    fn wide_name_full_utf16_unit() {
        let enc = [0x00, 0b1000_0000, 0x42, 0x26, 0x00];
        assert_eq!(decode_wide_name(b"", &enc), "\u{2642}");
    }

    #[test]
    fn wide_name_copies_run_from_oem_name() {
        let enc = [0x00, 0b1100_0000, 0x04, 0x00];
        assert_eq!(decode_wide_name(b"data.bin", &enc), "data.b");
    }

    #[test]
    fn wide_name_run_with_correction_byte() {
        let enc = [0x04, 0b1100_0000, 0x81, 0x01, 0x00];
        let expected = String::from_utf16(&[0x0462, 0x0463, 0x0464]).unwrap();
        assert_eq!(decode_wide_name(b"abc", &enc), expected);
    }

    #[test]
    fn wide_name_output_is_capacity_bounded() {
        // Two maximal runs would produce 258 units; output stops at capacity.
        let enc = [0x00, 0b1111_0000, 0x7f, 0x7f, 0x00, 0x00];
        let decoded = decode_wide_name(b"", &enc);
        assert_eq!(decoded.chars().count(), MAX_WIDE_NAME);
    }

    #[test]
    fn wide_name_empty_or_tiny_input() {
        assert_eq!(decode_wide_name(b"x", &[]), "");
        assert_eq!(decode_wide_name(b"x", &[0x00]), "");
    }
}
