//! MP4 atom definitions.

use bytes::Bytes;

/// Size of a compact atom header (32-bit size + type).
pub const HEADER_SIZE: usize = 8;

/// Size of an atom header carrying a 64-bit extended size.
pub const LARGE_HEADER_SIZE: usize = 16;

/// Four-character atom type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtomType(pub [u8; 4]);

impl AtomType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MOOF: Self = Self(*b"moof");
    pub const MDAT: Self = Self(*b"mdat");
    pub const MFRA: Self = Self(*b"mfra");
    pub const FREE: Self = Self(*b"free");

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for AtomType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A complete atom as it appeared on the wire.
///
/// `data` holds the whole box, header included, so concatenating atoms
/// reproduces the original stream byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    /// Atom type code.
    pub atom_type: AtomType,
    /// Header and payload bytes.
    pub data: Bytes,
}

impl Atom {
    /// Wrap already framed bytes.
    pub fn new(atom_type: AtomType, data: Bytes) -> Self {
        Self { atom_type, data }
    }

    /// Build an atom with a compact header around `payload`.
    pub fn from_payload(atom_type: AtomType, payload: &[u8]) -> Self {
        let size = (HEADER_SIZE + payload.len()) as u32;
        let mut data = Vec::with_capacity(size as usize);
        data.extend_from_slice(&size.to_be_bytes());
        data.extend_from_slice(&atom_type.0);
        data.extend_from_slice(payload);
        Self::new(atom_type, Bytes::from(data))
    }

    /// Total size including header.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Parse the declared size and type of the atom starting at `header[0]`.
///
/// Returns `(declared_size, type)`; a declared size of 1 means a 64-bit size
/// follows the type code.
pub fn parse_header(header: &[u8; HEADER_SIZE]) -> (u32, AtomType) {
    let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let atom_type = AtomType::from_bytes([header[4], header[5], header[6], header[7]]);
    (size, atom_type)
}
