//! Exact-length atom reader over an async byte stream.
//!
//! The encoder's stdout is a pipe, so every read may return fewer bytes than
//! requested. [`AtomReader`] keeps reading until the header or payload is
//! complete, or the stream ends.

use crate::atom::{parse_header, Atom, AtomType, HEADER_SIZE, LARGE_HEADER_SIZE};
use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{self, Stream};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Default ceiling for a single atom (64 MB), guarding against OOM when the
/// stream is garbage.
pub const DEFAULT_MAX_ATOM_SIZE: u64 = 64 * 1024 * 1024;

/// Splits a byte stream into atoms.
///
/// Holds at most one atom at a time; nothing is read ahead of the atom being
/// returned.
pub struct AtomReader<R> {
    reader: R,
    max_atom_size: u64,
    atoms_read: u64,
    bytes_read: u64,
}

impl<R: AsyncRead + Unpin> AtomReader<R> {
    /// Create a new atom reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            max_atom_size: DEFAULT_MAX_ATOM_SIZE,
            atoms_read: 0,
            bytes_read: 0,
        }
    }

    /// Override the maximum accepted atom size.
    pub fn with_max_atom_size(mut self, max: u64) -> Self {
        self.max_atom_size = max;
        self
    }

    /// Number of atoms returned so far.
    pub fn atoms_read(&self) -> u64 {
        self.atoms_read
    }

    /// Number of bytes consumed by returned atoms.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Read the next atom.
    ///
    /// Returns `Ok(None)` when the stream ends before a header is complete.
    /// A stream that ends inside a payload is a [`Error::Truncated`].
    pub async fn next_atom(&mut self) -> Result<Option<Atom>> {
        let mut header = [0u8; HEADER_SIZE];
        let got = read_full(&mut self.reader, &mut header).await?;
        if got < HEADER_SIZE {
            if got > 0 {
                tracing::debug!(bytes = got, "stream ended inside an atom header");
            }
            return Ok(None);
        }

        let (declared, atom_type) = parse_header(&header);
        let (size, header_len) = match declared {
            0 => {
                // "extends to end of file" has no meaning on a live stream
                return Err(Error::InvalidAtomSize { atom_type, size: 0 });
            }
            1 => {
                let mut ext = [0u8; 8];
                let got = read_full(&mut self.reader, &mut ext).await?;
                if got < ext.len() {
                    return Err(Error::Truncated {
                        atom_type,
                        need: LARGE_HEADER_SIZE as u64,
                        have: (HEADER_SIZE + got) as u64,
                    });
                }
                (u64::from_be_bytes(ext), LARGE_HEADER_SIZE)
            }
            n => (n as u64, HEADER_SIZE),
        };

        if size < header_len as u64 {
            return Err(Error::InvalidAtomSize { atom_type, size });
        }
        if size > self.max_atom_size {
            return Err(Error::AtomTooLarge {
                atom_type,
                size,
                max: self.max_atom_size,
            });
        }

        let data = self.read_payload(atom_type, &header, size, header_len).await?;

        self.atoms_read += 1;
        self.bytes_read += size;
        tracing::trace!(atom = %atom_type, size, "atom read");

        Ok(Some(Atom::new(atom_type, data)))
    }

    async fn read_payload(
        &mut self,
        atom_type: AtomType,
        header: &[u8; HEADER_SIZE],
        size: u64,
        header_len: usize,
    ) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(size as usize);
        buf.put_slice(header);
        if header_len == LARGE_HEADER_SIZE {
            buf.put_u64(size);
        }

        let payload_len = size as usize - header_len;
        buf.resize(size as usize, 0);
        let got = read_full(&mut self.reader, &mut buf[header_len..]).await?;
        if got < payload_len {
            return Err(Error::Truncated {
                atom_type,
                need: size,
                have: (header_len + got) as u64,
            });
        }

        Ok(buf.freeze())
    }

    /// Turn the reader into a stream of atoms.
    ///
    /// The stream ends after the first error or at a clean end of input.
    pub fn into_stream(self) -> impl Stream<Item = Result<Atom>> {
        stream::unfold(Some(self), |state| async move {
            let mut reader = state?;
            match reader.next_atom().await {
                Ok(Some(atom)) => Some((Ok(atom), Some(reader))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

/// Fill `buf` from `reader`, retrying short reads.
///
/// Returns the number of bytes read, which is less than `buf.len()` only if
/// the stream ended.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
