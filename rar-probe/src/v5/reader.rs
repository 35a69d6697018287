//! RAR 5.x archive scanning.
//!
//! Blocks are walked in order. A crypt block latches the archive into the
//! encrypted-headers state and saves the key-derivation parameters; the
//! next "header" then only yields its leading IV, which completes the
//! record. Otherwise every file or service block is searched for a crypt
//! extra record and one record is emitted per encrypted entry.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::diag::Diag;
use crate::error::{RarError, Result};
use crate::record::HashRecord;
use crate::ArchiveNames;

use super::header::{
    find_crypt_extra, read_vint, skip_file_fields, ArchiveFlags, BlockHeader, BlockType,
    CryptHeader, FileCrypt, IV_LEN, PSWCHECK_LEN, SALT_LEN,
};

/// Key-derivation parameters saved from a crypt block, waiting for the IV
/// of the first encrypted header.
struct CryptContext {
    salt: [u8; SALT_LEN],
    log2_count: u8,
    pswcheck: [u8; PSWCHECK_LEN],
}

/// Scan a RAR5 archive positioned just past the magic; returns the number
/// of records emitted.
pub(crate) fn scan<R: Read + Seek, W: Write>(
    reader: &mut R,
    names: &ArchiveNames,
    diag: &mut Diag,
    out: &mut W,
) -> Result<u32> {
    let mut crypt: Option<CryptContext> = None;
    let mut found = 0u32;

    loop {
        if let Some(ctx) = &crypt {
            // Every header from here on is encrypted; its first 16 bytes
            // are the IV the header decryption would use.
            let mut iv = [0u8; IV_LEN];
            reader.read_exact(&mut iv).map_err(|_| {
                RarError::Corrupt("archive too short, could not read header IV".into())
            })?;
            HashRecord::Rar5 {
                base: names.base.clone(),
                salt: ctx.salt,
                log2_count: ctx.log2_count,
                iv,
                pswcheck: ctx.pswcheck,
            }
            .write_line(out)?;
            found += 1;
            break;
        }

        let Some(block) = BlockHeader::read(reader)? else {
            break;
        };

        match block.header_type {
            BlockType::Crypt => {
                let header = CryptHeader::read(reader)?;
                if !header.pswcheck_usable {
                    diag.info("password check value failed its checksum");
                }
                crypt = Some(CryptContext {
                    salt: header.salt,
                    log2_count: header.log2_count,
                    pswcheck: header.pswcheck,
                });
            }
            BlockType::Main => {
                let flags = ArchiveFlags::from_bits_truncate(read_vint(reader)?);
                if flags.contains(ArchiveFlags::VOLUME_NUMBER) {
                    let _volume_number = read_vint(reader)?;
                }
            }
            BlockType::File | BlockType::Service => {
                skip_file_fields(reader)?;
                if block.extra_size > 0 {
                    match find_crypt_extra(reader, block.extra_size)? {
                        Some(FileCrypt::Usable(extra)) => {
                            HashRecord::Rar5 {
                                base: names.base.clone(),
                                salt: extra.salt,
                                log2_count: extra.log2_count,
                                iv: extra.iv,
                                pswcheck: extra.pswcheck,
                            }
                            .write_line(out)?;
                            found += 1;
                        }
                        Some(FileCrypt::MissingPswCheck) => {
                            diag.note("entry has no password check value, skipping");
                        }
                        Some(FileCrypt::CountTooLarge(n)) => {
                            diag.note(&format!(
                                "entry PBKDF2 iteration count 2^{n} too large, skipping"
                            ));
                        }
                        None => {}
                    }
                }
            }
            BlockType::EndOfArchive => break,
            BlockType::Unknown(_) => {}
        }

        reader.seek(SeekFrom::Start(block.next_block_position()))?;
    }

    if found == 0 {
        diag.note(&format!(
            "Did not find a valid encrypted candidate in {}",
            names.base
        ));
    }
    Ok(found)
}
