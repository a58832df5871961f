//! Loopcast-Media: atom demuxing and fragmented MP4 box grammar.
//!
//! This crate understands just enough of the ISO base media file format to
//! split an encoder's fragmented MP4 output into boxes and check that the
//! boxes arrive in the order a live fMP4 stream requires.
//!
//! # Modules
//!
//! - `atom` - Atom type codes and owned atoms (header + payload)
//! - `demux` - Async exact-length atom reader over any byte stream
//! - `grammar` - `ftyp, moov, (moof, mdat)*` state machine
//! - `scan` - Fragment boundary scanning over partially written buffers
//!
//! # Architecture
//!
//! ```text
//! encoder stdout ──► AtomReader ──► BoxGrammar ──► InitReady / FragmentReady
//! ```
//!
//! The reader never holds more than one atom; the grammar buffers at most an
//! init pair or a fragment pair before handing it back to the caller.

pub mod atom;
pub mod demux;
pub mod error;
pub mod grammar;
pub mod scan;

pub use atom::{Atom, AtomType};
pub use demux::{AtomReader, DEFAULT_MAX_ATOM_SIZE};
pub use error::{Error, Result};
pub use grammar::{BoxGrammar, Fragment, GrammarEvent, GrammarState, InitSegment};
pub use scan::{last_fragment_offset, scan_fragments};
