//! RAR 3.x archive scanning.
//!
//! Two modes, decided by the archive header:
//!
//! - **Headers encrypted** (`-hp`): file metadata is unreadable, but the
//!   final end-of-archive block has fixed plaintext, so the record carries
//!   the salt and the last encrypted block from the archive tail.
//! - **Per-file encryption** (`-p`): file headers are walked in order, each
//!   encrypted entry competes in the candidate selector, and the winner is
//!   flushed as one record at end of archive.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::diag::Diag;
use crate::error::{RarError, Result};
use crate::record::{HashRecord, Hex};
use crate::sfx::read_fill;
use crate::ArchiveNames;

use super::candidate::{warning_threshold, Candidate, CandidateSelector};
use super::header::{
    decode_wide_name, ArchiveFlags, ArchiveHeader, FileFlags, FileHeader, FILE_HEADER_LEN,
    HEAD_FILE, HEAD_NEWSUB, METHOD_STORE,
};

/// Upper bound on the file-name field.
const MAX_NAME_LEN: usize = 1024;

/// Budget for the accumulated-names field that terminates the record.
const NAME_ACCUM_MAX: usize = 8192;

/// Scan a RAR3 archive positioned just past the magic; returns the number
/// of records emitted (0 or 1).
pub(crate) fn scan<R: Read + Seek, W: Write>(
    reader: &mut R,
    names: &ArchiveNames,
    diag: &mut Diag,
    out: &mut W,
) -> Result<u32> {
    let archive = ArchiveHeader::read(reader)?;
    if archive.head_size > 13 {
        // Comment region inside the archive header.
        reader.seek(SeekFrom::Current(i64::from(archive.head_size) - 13))?;
    }

    if archive.flags.contains(ArchiveFlags::ENCRYPTED) {
        scan_encrypted_headers(reader, names, diag, out)
    } else {
        scan_file_headers(reader, names, diag, out)
    }
}

/// `-hp` mode: the last 24 bytes of the archive are the salt followed by
/// the encrypted end-of-archive block whose plaintext is known.
fn scan_encrypted_headers<R: Read + Seek, W: Write>(
    reader: &mut R,
    names: &ArchiveNames,
    diag: &mut Diag,
    out: &mut W,
) -> Result<u32> {
    diag.info(&format!("-hp mode entry found in {}", names.base));

    reader.seek(SeekFrom::End(-24))?;
    let mut tail = [0u8; 24];
    reader.read_exact(&mut tail)?;
    let mut salt = [0u8; 8];
    salt.copy_from_slice(&tail[..8]);
    let mut block = [0u8; 16];
    block.copy_from_slice(&tail[8..]);

    HashRecord::Rar3EncryptedHeaders {
        base: names.base.clone(),
        path: names.path.clone(),
        salt,
        block,
    }
    .write_line(out)?;
    Ok(1)
}

/// `-p` mode: walk file headers, feed encrypted entries to the selector,
/// flush the winner at end of archive.
fn scan_file_headers<R: Read + Seek, W: Write>(
    reader: &mut R,
    names: &ArchiveNames,
    diag: &mut Diag,
    out: &mut W,
) -> Result<u32> {
    let mut selector = CandidateSelector::default();
    let mut name_accum = String::new();

    loop {
        let block_start = reader.stream_position()?;
        let mut block = [0u8; FILE_HEADER_LEN];
        if read_fill(reader, &mut block)? != FILE_HEADER_LEN {
            diag.info(&format!("{}: end of file", names.base));
            break;
        }

        let header = FileHeader::parse(&block)?;
        match header.tag {
            HEAD_FILE => {}
            HEAD_NEWSUB => {
                diag.info("comment subblock, skipping");
                skip_subblock(reader, &header)?;
                continue;
            }
            _ => {
                diag.info("no more file headers");
                break;
            }
        }

        if !header.flags.contains(FileFlags::LONG_BLOCK) {
            return Err(RarError::Corrupt(
                "file header long-block flag 0x8000 unset".into(),
            ));
        }

        let mut packed_size = u64::from(header.packed_size_low);
        let mut unpacked_size = u64::from(header.unpacked_size_low);
        if header.flags.contains(FileFlags::LARGE) {
            packed_size |= u64::from(reader.read_u32::<LittleEndian>()?) << 32;
            unpacked_size |= u64::from(reader.read_u32::<LittleEndian>()?) << 32;
            // The ciphertext is buffered in memory, so sizes beyond the
            // host's address width cannot be handled.
            if usize::try_from(packed_size).is_err() || usize::try_from(unpacked_size).is_err() {
                return Err(RarError::Unsupported64BitSizes);
            }
        }

        diag.info(&format!(
            "HEAD_SIZE: {}, PACK_SIZE: {packed_size}, UNP_SIZE: {unpacked_size}",
            header.head_size
        ));
        diag.info(&format!("file header: {}", Hex(&block)));

        let name_len = usize::from(header.name_len);
        if name_len > MAX_NAME_LEN {
            return Err(RarError::Corrupt(format!(
                "file name length {name_len} exceeds {MAX_NAME_LEN}"
            )));
        }
        let mut name_buf = vec![0u8; name_len];
        reader.read_exact(&mut name_buf)?;
        let name = decode_entry_name(&name_buf, header.flags.contains(FileFlags::UNICODE_NAME));
        diag.info(&format!("file name: {name}"));

        // Every entry's name goes into the record's trailing field, even
        // when the entry itself is skipped below.
        if name_accum.len() + name.len() + 1 < NAME_ACCUM_MAX {
            name_accum.push_str(&name);
            name_accum.push(' ');
        }

        let mut salt = [0u8; 8];
        if header.flags.contains(FileFlags::SALT) {
            reader.read_exact(&mut salt)?;
        }

        // The extended time region and any other trailing header bytes sit
        // between here and the declared header size.
        let header_end = block_start + u64::from(header.head_size);
        let pos = reader.stream_position()?;
        if pos > header_end {
            return Err(RarError::Corrupt(
                "file header fields overrun the declared header size".into(),
            ));
        }
        if header.flags.contains(FileFlags::EXT_TIME) {
            diag.info(&format!("extended time region of {} bytes", header_end - pos));
        }
        reader.seek(SeekFrom::Start(header_end))?;

        if header.flags.contains(FileFlags::SOLID) {
            diag.info("solid entry, skipping");
            skip_forward(reader, packed_size)?;
            continue;
        }
        if header.is_directory() {
            diag.info("directory entry, skipping");
            skip_forward(reader, packed_size)?;
            continue;
        }
        diag.info(&format!("dictionary size: {} KB", header.dict_size_kb()));
        if !header.flags.contains(FileFlags::ENCRYPTED) {
            diag.info("not encrypted, skipping");
            skip_forward(reader, packed_size)?;
            continue;
        }

        diag.info(&format!(
            "minimum version to unpack: {}.{}",
            header.required_version / 10,
            header.required_version % 10
        ));
        diag.info(&format!(
            "method: m{:x}{}",
            header.method.wrapping_sub(METHOD_STORE),
            (b'a' + header.dict_bits() as u8) as char
        ));

        if !selector.would_admit(packed_size, unpacked_size, header.method) {
            diag.info("already have a better candidate, skipping");
            skip_forward(reader, packed_size)?;
            continue;
        }

        diag.info("best candidate so far");
        let mut ciphertext = vec![0u8; packed_size as usize];
        reader.read_exact(&mut ciphertext)?;
        selector.admit(Candidate {
            packed_size,
            unpacked_size,
            method: header.method,
            salt,
            crc: header.crc,
            ciphertext,
        });
    }

    flush(selector, name_accum, names, diag, out)
}

/// Emit the winning candidate, or the no-candidate advisory.
fn flush<W: Write>(
    selector: CandidateSelector,
    name_accum: String,
    names: &ArchiveNames,
    diag: &mut Diag,
    out: &mut W,
) -> Result<u32> {
    let Some(best) = selector.into_best() else {
        diag.note(&format!(
            "Did not find a valid encrypted candidate in {}",
            names.base
        ));
        return Ok(0);
    };

    diag.info(&format!("found a valid -p mode candidate in {}", names.base));
    if best.unpacked_size < warning_threshold(best.method) {
        diag.note("WARNING: best candidate found is too small, you may see false positives");
    }

    HashRecord::Rar3File {
        base: names.base.clone(),
        salt: best.salt,
        crc: best.crc,
        packed_size: best.packed_size,
        unpacked_size: best.unpacked_size,
        method: best.method,
        ciphertext: best.ciphertext,
        names: name_accum,
    }
    .write_line(out)?;
    Ok(1)
}

/// Resolve the entry name: plain single-byte, or the packed wide encoding
/// when the header flags announce it.
fn decode_entry_name(raw: &[u8], packed_wide: bool) -> String {
    let nul = raw.iter().position(|&b| b == 0);
    match (packed_wide, nul) {
        (true, Some(split)) if split + 1 < raw.len() => {
            let wide = decode_wide_name(&raw[..split], &raw[split + 1..]);
            if wide.is_empty() {
                String::from_utf8_lossy(&raw[..split]).into_owned()
            } else {
                wide
            }
        }
        _ => {
            let end = nul.unwrap_or(raw.len());
            String::from_utf8_lossy(&raw[..end]).into_owned()
        }
    }
}

/// Skip a subblock's remaining header bytes and its data area.
fn skip_subblock<R: Seek>(reader: &mut R, header: &FileHeader) -> Result<()> {
    let skip = i64::from(header.head_size) - FILE_HEADER_LEN as i64
        + i64::from(header.packed_size_low);
    if skip < 0 {
        return Err(RarError::Corrupt("subblock header size too small".into()));
    }
    reader.seek(SeekFrom::Current(skip))?;
    Ok(())
}

fn skip_forward<R: Seek>(reader: &mut R, amount: u64) -> Result<()> {
    let amount =
        i64::try_from(amount).map_err(|_| RarError::Corrupt("data size out of range".into()))?;
    reader.seek(SeekFrom::Current(amount))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_name_stops_at_nul() {
        assert_eq!(decode_entry_name(b"abc\0def", false), "abc");
        assert_eq!(decode_entry_name(b"abc", false), "abc");
    }

    #[test]
    fn entry_name_decodes_packed_wide_part() {
        // "hi" as OEM name, packed region with default high byte 0 and a
        // verbatim run of the OEM bytes.
        let raw = b"hi\0\x00\xc0\x00\x00";
        assert_eq!(decode_entry_name(raw, true), "hi");
    }

    #[test]
    fn entry_name_falls_back_to_oem_when_packed_part_is_empty() {
        assert_eq!(decode_entry_name(b"plain\0", true), "plain");
    }
}
