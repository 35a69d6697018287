//! RAR 5.x header structures and parsing.
//!
//! RAR5 headers are built from variable-length integers (vints): each byte
//! contributes 7 bits, LSB first, with the high bit as continuation. Blocks
//! share a common prologue (CRC32, size, type, flags) and may append an
//! "extra" area of TLV records carrying per-entry metadata such as
//! encryption parameters.

use std::io::{self, Read, Seek, SeekFrom};

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};
use sha2::{Digest, Sha256};

use crate::error::{RarError, Result};

/// RAR 5.x magic signature bytes.
pub(crate) const RAR5_SIGNATURE: [u8; 8] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x01, 0x00];

/// Key-derivation salt length.
pub(crate) const SALT_LEN: usize = 16;
/// AES initialization vector length.
pub(crate) const IV_LEN: usize = 16;
/// Password-check value length.
pub(crate) const PSWCHECK_LEN: usize = 12;
/// Length of the SHA-256 truncation guarding the password-check value.
pub(crate) const PSWCHECK_CSUM_LEN: usize = 4;

/// Highest encryption version we can describe.
const MAX_CRYPT_VERSION: u64 = 0;
/// Bound on the PBKDF2 iteration exponent.
const MAX_KDF_LG2: u8 = 24;

/// Extra-record type carrying encryption parameters.
const EXTRA_CRYPT: u64 = 0x01;

/// RAR5 block types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockType {
    Main,
    File,
    Service,
    Crypt,
    EndOfArchive,
    Unknown(u8),
}

impl From<u8> for BlockType {
    fn from(v: u8) -> Self {
        match v {
            1 => BlockType::Main,
            2 => BlockType::File,
            3 => BlockType::Service,
            4 => BlockType::Crypt,
            5 => BlockType::EndOfArchive,
            other => BlockType::Unknown(other),
        }
    }
}

bitflags! {
    /// Common block flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct BlockFlags: u64 {
        /// Extra area present.
        const EXTRA_DATA    = 0x0001;
        /// Data area present.
        const DATA_AREA     = 0x0002;
        /// Skip when unknown.
        const SKIP_UNKNOWN  = 0x0004;
        /// Data continues from the previous volume.
        const SPLIT_BEFORE  = 0x0008;
        /// Data continues in the next volume.
        const SPLIT_AFTER   = 0x0010;
    }
}

bitflags! {
    /// Main (archive) header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct ArchiveFlags: u64 {
        /// Part of a multi-volume set.
        const VOLUME        = 0x0001;
        /// Volume number field present.
        const VOLUME_NUMBER = 0x0002;
        /// Solid archive.
        const SOLID         = 0x0004;
    }
}

bitflags! {
    /// File/service header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct FileFlags: u64 {
        /// Directory entry.
        const DIRECTORY     = 0x0001;
        /// Modification time field present.
        const UNIX_TIME     = 0x0002;
        /// CRC32 field present.
        const CRC32_PRESENT = 0x0004;
        /// Unpacked size is unknown.
        const UNKNOWN_SIZE  = 0x0008;
    }
}

bitflags! {
    /// Encryption flags shared by the crypt header and the per-file crypt
    /// extra record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct CryptFlags: u64 {
        /// A password-check value is stored.
        const PSWCHECK = 0x0001;
    }
}

// ---------------------------------------------------------------------------
// Variable-length integer decoding
// ---------------------------------------------------------------------------

/// Read a variable-length integer.
///
/// Consumes 1–10 bytes; a tenth byte still carrying the continuation bit is
/// a [`RarError::MalformedVarint`].
pub(crate) fn read_vint<R: Read>(reader: &mut R) -> Result<u64> {
    read_vint_len(reader).map(|(value, _)| value)
}

/// Like [`read_vint`], additionally reporting the number of bytes consumed.
/// Callers use the width for header-footprint arithmetic.
pub(crate) fn read_vint_len<R: Read>(reader: &mut R) -> Result<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;

    for i in 0..10 {
        let byte = reader.read_u8()?;
        value |= u64::from(byte & 0x7F).wrapping_shl(shift);
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }

    Err(RarError::MalformedVarint)
}

// ---------------------------------------------------------------------------
// Block prologue
// ---------------------------------------------------------------------------

/// The common prologue of a RAR5 block.
#[derive(Debug, Clone)]
pub(crate) struct BlockHeader {
    /// Absolute offset of the block in the archive.
    pub offset: u64,
    /// Full header footprint: declared size plus the CRC32 field and the
    /// width of the size vint itself.
    pub footprint: u64,
    pub header_type: BlockType,
    pub extra_size: u64,
    pub data_size: u64,
}

impl BlockHeader {
    /// Read a block prologue at the current position.
    ///
    /// Returns `Ok(None)` on a clean end of stream at the block boundary.
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Option<Self>> {
        let offset = reader.stream_position()?;
        let _header_crc = match reader.read_u32::<LittleEndian>() {
            Ok(crc) => crc,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let (block_size, size_width) = read_vint_len(reader)?;
        let header_type = BlockType::from(reader.read_u8()?);
        let flags = BlockFlags::from_bits_truncate(read_vint(reader)?);

        let extra_size = if flags.contains(BlockFlags::EXTRA_DATA) {
            read_vint(reader)?
        } else {
            0
        };
        let data_size = if flags.contains(BlockFlags::DATA_AREA) {
            read_vint(reader)?
        } else {
            0
        };

        Ok(Some(BlockHeader {
            offset,
            footprint: block_size.saturating_add(4 + size_width as u64),
            header_type,
            extra_size,
            data_size,
        }))
    }

    /// Absolute offset where the next block begins. Saturates on absurd
    /// declared sizes; the resulting seek past EOF ends the scan.
    pub fn next_block_position(&self) -> u64 {
        self.offset
            .saturating_add(self.footprint)
            .saturating_add(self.data_size)
    }
}

// ---------------------------------------------------------------------------
// Crypt header (archive-level encryption)
// ---------------------------------------------------------------------------

/// Parsed crypt block: every header that follows it is encrypted.
#[derive(Debug, Clone)]
pub(crate) struct CryptHeader {
    pub log2_count: u8,
    pub salt: [u8; SALT_LEN],
    pub pswcheck: [u8; PSWCHECK_LEN],
    /// Whether the stored password-check value survived its SHA-256
    /// truncation check.
    pub pswcheck_usable: bool,
}

impl CryptHeader {
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let version = read_vint(reader)?;
        if version > MAX_CRYPT_VERSION {
            return Err(RarError::UnsupportedCryptVersion(version));
        }
        let flags = CryptFlags::from_bits_truncate(read_vint(reader)?);
        let log2_count = reader.read_u8()?;
        if log2_count > MAX_KDF_LG2 {
            return Err(RarError::KdfCountTooLarge(log2_count));
        }

        let mut salt = [0u8; SALT_LEN];
        reader.read_exact(&mut salt)?;

        let mut pswcheck = [0u8; PSWCHECK_LEN];
        let mut pswcheck_usable = false;
        if flags.contains(CryptFlags::PSWCHECK) {
            reader.read_exact(&mut pswcheck)?;
            let mut csum = [0u8; PSWCHECK_CSUM_LEN];
            reader.read_exact(&mut csum)?;
            let digest = Sha256::digest(pswcheck);
            pswcheck_usable = digest[..PSWCHECK_CSUM_LEN] == csum[..];
        }

        Ok(CryptHeader {
            log2_count,
            salt,
            pswcheck,
            pswcheck_usable,
        })
    }
}

// ---------------------------------------------------------------------------
// File/service headers and their extra area
// ---------------------------------------------------------------------------

/// Walk the fields of a file or service header up to the extra area,
/// discarding everything; only the extra area can carry encryption data.
pub(crate) fn skip_file_fields<R: Read + Seek>(reader: &mut R) -> Result<()> {
    let flags = FileFlags::from_bits_truncate(read_vint(reader)?);
    let _unpacked_size = read_vint(reader)?;
    let _attributes = read_vint(reader)?;
    if flags.contains(FileFlags::UNIX_TIME) {
        let _mtime = reader.read_u32::<LittleEndian>()?;
    }
    if flags.contains(FileFlags::CRC32_PRESENT) {
        let _crc32 = reader.read_u32::<LittleEndian>()?;
    }
    let _compression = read_vint(reader)?;
    let _host_os = read_vint(reader)?;
    let name_len = read_vint(reader)?;
    let name_len =
        i64::try_from(name_len).map_err(|_| RarError::Corrupt("name length out of range".into()))?;
    reader.seek(SeekFrom::Current(name_len))?;
    Ok(())
}

/// Encryption parameters from a file/service crypt extra record.
#[derive(Debug, Clone)]
pub(crate) struct CryptExtra {
    pub log2_count: u8,
    pub salt: [u8; SALT_LEN],
    pub iv: [u8; IV_LEN],
    pub pswcheck: [u8; PSWCHECK_LEN],
}

/// Outcome of parsing a crypt extra record.
#[derive(Debug)]
pub(crate) enum FileCrypt {
    Usable(CryptExtra),
    /// The record stores no password-check value; nothing to attack offline.
    MissingPswCheck,
    /// Iteration exponent out of range.
    CountTooLarge(u8),
}

impl FileCrypt {
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let _version = read_vint(reader)?;
        let flags = CryptFlags::from_bits_truncate(read_vint(reader)?);
        if !flags.contains(CryptFlags::PSWCHECK) {
            return Ok(FileCrypt::MissingPswCheck);
        }
        let log2_count = reader.read_u8()?;
        if log2_count >= MAX_KDF_LG2 {
            return Ok(FileCrypt::CountTooLarge(log2_count));
        }

        let mut salt = [0u8; SALT_LEN];
        reader.read_exact(&mut salt)?;
        let mut iv = [0u8; IV_LEN];
        reader.read_exact(&mut iv)?;
        let mut pswcheck = [0u8; PSWCHECK_LEN];
        reader.read_exact(&mut pswcheck)?;

        Ok(FileCrypt::Usable(CryptExtra {
            log2_count,
            salt,
            iv,
            pswcheck,
        }))
    }
}

/// Walk a file/service block's extra area looking for a crypt record.
///
/// TLV records are iterated until the declared byte budget is exhausted; a
/// size field wider than three bytes or a budget underflow is a structural
/// error. The walk stops at the first crypt record.
pub(crate) fn find_crypt_extra<R: Read + Seek>(
    reader: &mut R,
    extra_size: u64,
) -> Result<Option<FileCrypt>> {
    let mut bytes_left = i64::try_from(extra_size)
        .map_err(|_| RarError::Corrupt("extra area size out of range".into()))?;

    while bytes_left > 0 {
        let (field_size, size_width) = read_vint_len(reader)?;
        if size_width > 3 {
            return Err(RarError::Corrupt("extra record size field too wide".into()));
        }
        bytes_left -= size_width as i64;
        bytes_left -= i64::try_from(field_size)
            .map_err(|_| RarError::Corrupt("extra record size out of range".into()))?;
        if bytes_left < 0 {
            return Err(RarError::Corrupt("extra area underflow".into()));
        }

        let record_start = reader.stream_position()?;
        let field_type = read_vint(reader)?;
        if field_type == EXTRA_CRYPT {
            return FileCrypt::read(reader).map(Some);
        }
        reader.seek(SeekFrom::Start(record_start + field_size))?;
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    /// Minimal-length vint encoding, the inverse of [`read_vint`].
    fn encode_vint(mut value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let byte = (value & 0x7F) as u8;
            value >>= 7;
            if value == 0 {
                out.push(byte);
                return out;
            }
            out.push(byte | 0x80);
        }
    }

    #[test]
    fn vint_round_trips_minimal_encodings() {
        for value in [
            0u64,
            1,
            0x7F,
            0x80,
            0x3FFF,
            0x4000,
            u32::MAX as u64,
            u64::MAX,
        ] {
            let encoded = encode_vint(value);
            let (decoded, width) = read_vint_len(&mut Cursor::new(&encoded)).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(width, encoded.len());
        }
    }

    #[test]
    fn vint_accepts_non_minimal_encoding() {
        // 0x80 0x00 is a two-byte spelling of zero.
        let (value, width) = read_vint_len(&mut Cursor::new(&[0x80, 0x00])).unwrap();
        assert_eq!(value, 0);
        assert_eq!(width, 2);
    }

    #[test]
    fn vint_rejects_ten_continuation_bytes() {
        let bytes = [0xFF; 10];
        let err = read_vint(&mut Cursor::new(&bytes)).unwrap_err();
        assert!(matches!(err, RarError::MalformedVarint));
    }

    #[test]
    fn vint_consumes_at_most_ten_bytes() {
        let bytes = [0x81, 0x81, 0x81, 0x81, 0x81, 0x81, 0x81, 0x81, 0x81, 0x01];
        let (_, width) = read_vint_len(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(width, 10);
    }

    #[test]
    fn block_header_footprint_accounts_for_prologue() {
        // CRC32 + size vint (1 byte, value 3) + type + flags.
        let bytes = [0x00, 0x00, 0x00, 0x00, 0x03, 0x01, 0x00, 0x00];
        let block = BlockHeader::read(&mut Cursor::new(&bytes)).unwrap().unwrap();
        assert_eq!(block.header_type, BlockType::Main);
        assert_eq!(block.footprint, 3 + 4 + 1);
        assert_eq!(block.data_size, 0);
        assert_eq!(block.next_block_position(), 8);
    }

    #[test]
    fn block_header_clean_eof_is_none() {
        let block = BlockHeader::read(&mut Cursor::new(&[])).unwrap();
        assert!(block.is_none());
    }

    #[test]
    fn crypt_header_verifies_pswcheck_checksum() {
        let pswcheck = [0x10u8; PSWCHECK_LEN];
        let digest = Sha256::digest(pswcheck);

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&encode_vint(0)); // version
        bytes.extend_from_slice(&encode_vint(1)); // flags: pswcheck
        bytes.push(15);
        bytes.extend_from_slice(&[0xAA; SALT_LEN]);
        bytes.extend_from_slice(&pswcheck);
        bytes.extend_from_slice(&digest[..PSWCHECK_CSUM_LEN]);

        let header = CryptHeader::read(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header.log2_count, 15);
        assert!(header.pswcheck_usable);

        // Corrupt the stored checksum.
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let header = CryptHeader::read(&mut Cursor::new(&bytes)).unwrap();
        assert!(!header.pswcheck_usable);
    }

    #[test]
    fn crypt_header_rejects_unknown_version() {
        let bytes = encode_vint(9);
        let err = CryptHeader::read(&mut Cursor::new(&bytes)).unwrap_err();
        assert!(matches!(err, RarError::UnsupportedCryptVersion(9)));
    }

    #[test]
    fn crypt_header_rejects_oversized_iteration_exponent() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&encode_vint(0));
        bytes.extend_from_slice(&encode_vint(0));
        bytes.push(25);
        let err = CryptHeader::read(&mut Cursor::new(&bytes)).unwrap_err();
        assert!(matches!(err, RarError::KdfCountTooLarge(25)));
    }

    #[test]
    fn extra_walk_underflow_is_structural() {
        // Declared budget of 1 byte, record claiming 100.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&encode_vint(100));
        let err = find_crypt_extra(&mut Cursor::new(&bytes), 1).unwrap_err();
        assert!(matches!(err, RarError::Corrupt(_)));
    }

    #[test]
    fn extra_walk_skips_unrelated_records() {
        // One 3-byte record of type 5, then a crypt record without pswcheck.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&encode_vint(3)); // size
        bytes.extend_from_slice(&encode_vint(5)); // type
        bytes.extend_from_slice(&[0xEE, 0xEE]); // payload
        let crypt_body = {
            let mut body = Vec::new();
            body.extend_from_slice(&encode_vint(EXTRA_CRYPT));
            body.extend_from_slice(&encode_vint(0)); // version
            body.extend_from_slice(&encode_vint(0)); // flags: no pswcheck
            body
        };
        bytes.extend_from_slice(&encode_vint(crypt_body.len() as u64));
        bytes.extend_from_slice(&crypt_body);

        let extra_size = bytes.len() as u64;
        let found = find_crypt_extra(&mut Cursor::new(&bytes), extra_size)
            .unwrap()
            .unwrap();
        assert!(matches!(found, FileCrypt::MissingPswCheck));
    }
}
