//! Fragment boundary scanning over data that may still be growing.
//!
//! Readers of the rolling media file can observe a write in progress. These
//! helpers find the end of the last complete `moof`+`mdat` pair so that only
//! whole fragments are forwarded.

use crate::atom::{parse_header, AtomType, HEADER_SIZE, LARGE_HEADER_SIZE};
use std::io::SeekFrom;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

/// Length of the longest prefix of `buf` that ends with a complete `mdat`.
///
/// The rolling media file holds only `moof, mdat` pairs, so this is the end
/// of the last whole fragment. Scanning stops at the first incomplete or
/// malformed header.
pub fn scan_fragments(buf: &[u8]) -> usize {
    let mut pos = 0usize;
    let mut boundary = 0usize;

    while pos + HEADER_SIZE <= buf.len() {
        let Some((size, atom_type)) = atom_header_at(&buf[pos..]) else {
            break;
        };
        let Some(end) = pos.checked_add(size as usize) else {
            break;
        };
        if end > buf.len() {
            break;
        }
        pos = end;
        if atom_type == AtomType::MDAT {
            boundary = pos;
        }
    }

    boundary
}

/// Declared size and type of the atom at the start of `buf`, if the header
/// is complete and sane.
fn atom_header_at(buf: &[u8]) -> Option<(u64, AtomType)> {
    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(buf.get(..HEADER_SIZE)?);
    let (declared, atom_type) = parse_header(&header);

    let size = match declared {
        0 => return None,
        1 => {
            let ext = buf.get(HEADER_SIZE..LARGE_HEADER_SIZE)?;
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(ext);
            let size = u64::from_be_bytes(bytes);
            if size < LARGE_HEADER_SIZE as u64 {
                return None;
            }
            size
        }
        n if (n as usize) < HEADER_SIZE => return None,
        n => n as u64,
    };
    Some((size, atom_type))
}

/// Offset of the end of the last complete fragment within the first `len`
/// bytes of `reader`, found by hopping from header to header.
///
/// Only headers are read, so this stays cheap on long files.
pub async fn last_fragment_offset<R>(reader: &mut R, len: u64) -> std::io::Result<u64>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    let mut pos = 0u64;
    let mut boundary = 0u64;
    let mut header = [0u8; LARGE_HEADER_SIZE];

    while pos + HEADER_SIZE as u64 <= len {
        reader.seek(SeekFrom::Start(pos)).await?;
        let want = (len - pos).min(LARGE_HEADER_SIZE as u64) as usize;
        reader.read_exact(&mut header[..want]).await?;

        let Some((size, atom_type)) = atom_header_at(&header[..want]) else {
            break;
        };
        if pos + size > len {
            break;
        }
        pos += size;
        if atom_type == AtomType::MDAT {
            boundary = pos;
        }
    }

    Ok(boundary)
}
