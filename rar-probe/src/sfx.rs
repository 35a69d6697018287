//! Signature scanning inside SFX stubs.
//!
//! Self-extracting archives prepend a PE executable, so the RAR signature
//! sits at an arbitrary offset. The scan slides a fixed window through the
//! stream; successive windows overlap by `needle.len() - 1` bytes so a
//! signature straddling a window boundary is still found.

use std::io::{self, Read, Seek, SeekFrom};

use memchr::memmem::Finder;

use crate::error::Result;

/// Window size for the sliding signature scan.
const SCAN_CHUNK: usize = 4096;

/// Read until `buf` is full or the stream ends, returning the bytes read.
pub(crate) fn read_fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Scan forward from the current position for `needle`.
///
/// On a match the reader is left positioned immediately *after* the
/// signature and `true` is returned; otherwise the position is unspecified
/// and `false` is returned.
pub(crate) fn seek_past_signature<R: Read + Seek>(reader: &mut R, needle: &[u8]) -> Result<bool> {
    let finder = Finder::new(needle);
    let mut window = [0u8; SCAN_CHUNK];

    loop {
        let window_start = reader.stream_position()?;
        let count = read_fill(reader, &mut window)?;
        if count < needle.len() {
            return Ok(false);
        }
        if let Some(idx) = finder.find(&window[..count]) {
            reader.seek(SeekFrom::Start(window_start + (idx + needle.len()) as u64))?;
            return Ok(true);
        }
        if count < window.len() {
            // Short read means the stream is exhausted.
            return Ok(false);
        }
        reader.seek(SeekFrom::Start(
            window_start + (count - (needle.len() - 1)) as u64,
        ))?;
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const NEEDLE: &[u8] = b"Rar!\x1a\x07\x00";

    #[test]
    fn finds_signature_in_first_window() {
        let mut data = vec![0u8; 100];
        data.extend_from_slice(NEEDLE);
        data.extend_from_slice(b"payload");
        let mut cursor = Cursor::new(data);
        assert!(seek_past_signature(&mut cursor, NEEDLE).unwrap());
        assert_eq!(cursor.position(), 107);
    }

    #[test]
    fn finds_signature_straddling_a_window_boundary() {
        // Place the signature so it starts 3 bytes before the first 4096-byte
        // window ends; only the overlap makes it visible.
        let mut data = vec![0x4d; SCAN_CHUNK - 3];
        data.extend_from_slice(NEEDLE);
        let mut cursor = Cursor::new(data);
        assert!(seek_past_signature(&mut cursor, NEEDLE).unwrap());
        assert_eq!(cursor.position() as usize, SCAN_CHUNK - 3 + NEEDLE.len());
    }

    #[test]
    fn missing_signature_reports_false() {
        let mut cursor = Cursor::new(vec![0u8; 2 * SCAN_CHUNK + 17]);
        assert!(!seek_past_signature(&mut cursor, NEEDLE).unwrap());
    }

    #[test]
    fn input_shorter_than_needle_reports_false() {
        let mut cursor = Cursor::new(b"Rar".to_vec());
        assert!(!seek_past_signature(&mut cursor, NEEDLE).unwrap());
    }
}
