//! Box grammar for a live fragmented MP4 stream.
//!
//! A stream produced with `frag_keyframe+empty_moov` must look like
//! `ftyp, moov, (moof, mdat)*`. [`BoxGrammar`] checks each atom against that
//! order and hands back the init segment and each fragment once complete.

use crate::atom::{Atom, AtomType};
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};

/// Where the grammar is in the box sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrammarState {
    AwaitingFtyp,
    AwaitingMoov,
    AwaitingMoof,
    AwaitingMdat,
}

impl GrammarState {
    /// The atom type this state accepts.
    pub fn expected(&self) -> AtomType {
        match self {
            Self::AwaitingFtyp => AtomType::FTYP,
            Self::AwaitingMoov => AtomType::MOOV,
            Self::AwaitingMoof => AtomType::MOOF,
            Self::AwaitingMdat => AtomType::MDAT,
        }
    }

    /// Whether the init segment has been seen.
    pub fn is_initialized(&self) -> bool {
        matches!(self, Self::AwaitingMoof | Self::AwaitingMdat)
    }
}

/// The `ftyp` + `moov` pair a decoder needs before any fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitSegment {
    pub ftyp: Atom,
    pub moov: Atom,
}

impl InitSegment {
    /// Concatenated bytes as written to `init.m4s`.
    pub fn to_bytes(&self) -> Bytes {
        concat(&self.ftyp, &self.moov)
    }

    /// Total size in bytes.
    pub fn len(&self) -> usize {
        self.ftyp.size() + self.moov.size()
    }

    /// Always false; both atoms carry at least a header.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// One playable increment: a `moof` and the `mdat` that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// 1-based position of this fragment in the run.
    pub sequence: u64,
    pub moof: Atom,
    pub mdat: Atom,
}

impl Fragment {
    /// Concatenated bytes as appended to the rolling media file.
    pub fn to_bytes(&self) -> Bytes {
        concat(&self.moof, &self.mdat)
    }

    /// Total size in bytes.
    pub fn len(&self) -> usize {
        self.moof.size() + self.mdat.size()
    }

    /// Always false; both atoms carry at least a header.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Output of [`BoxGrammar::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrammarEvent {
    /// The atom was accepted; more atoms are needed.
    Pending,
    /// `ftyp` + `moov` are complete.
    InitReady(InitSegment),
    /// A `moof` + `mdat` pair is complete.
    FragmentReady(Fragment),
}

/// State machine enforcing `ftyp, moov, (moof, mdat)*`.
#[derive(Debug)]
pub struct BoxGrammar {
    state: GrammarState,
    pending: Option<Atom>,
    fragments: u64,
}

impl BoxGrammar {
    /// Create a grammar waiting for `ftyp`.
    pub fn new() -> Self {
        Self {
            state: GrammarState::AwaitingFtyp,
            pending: None,
            fragments: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> GrammarState {
        self.state
    }

    /// Number of complete fragments seen.
    pub fn fragments(&self) -> u64 {
        self.fragments
    }

    /// Feed the next atom.
    ///
    /// Any atom other than the one the current state expects is an
    /// [`Error::UnexpectedAtom`]; the grammar stays where it was so the error
    /// can be reported, but the stream is not usable afterwards.
    pub fn push(&mut self, atom: Atom) -> Result<GrammarEvent> {
        let expected = self.state.expected();
        if atom.atom_type != expected {
            return Err(Error::unexpected(expected, atom.atom_type));
        }

        let event = match self.state {
            GrammarState::AwaitingFtyp => {
                self.pending = Some(atom);
                self.state = GrammarState::AwaitingMoov;
                GrammarEvent::Pending
            }
            GrammarState::AwaitingMoov => {
                let ftyp = self.take_pending(AtomType::FTYP)?;
                self.state = GrammarState::AwaitingMoof;
                GrammarEvent::InitReady(InitSegment { ftyp, moov: atom })
            }
            GrammarState::AwaitingMoof => {
                self.pending = Some(atom);
                self.state = GrammarState::AwaitingMdat;
                GrammarEvent::Pending
            }
            GrammarState::AwaitingMdat => {
                let moof = self.take_pending(AtomType::MOOF)?;
                self.fragments += 1;
                self.state = GrammarState::AwaitingMoof;
                GrammarEvent::FragmentReady(Fragment {
                    sequence: self.fragments,
                    moof,
                    mdat: atom,
                })
            }
        };

        Ok(event)
    }

    fn take_pending(&mut self, expected: AtomType) -> Result<Atom> {
        match self.pending.take() {
            Some(atom) => Ok(atom),
            None => Err(Error::unexpected(expected, self.state.expected())),
        }
    }
}

impl Default for BoxGrammar {
    fn default() -> Self {
        Self::new()
    }
}

fn concat(first: &Atom, second: &Atom) -> Bytes {
    let mut buf = BytesMut::with_capacity(first.size() + second.size());
    buf.extend_from_slice(&first.data);
    buf.extend_from_slice(&second.data);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn atom(t: AtomType, len: usize) -> Atom {
        Atom::from_payload(t, &vec![0xAB; len])
    }

    #[test]
    fn test_full_sequence() {
        let mut grammar = BoxGrammar::new();

        assert_eq!(
            grammar.push(atom(AtomType::FTYP, 16)).unwrap(),
            GrammarEvent::Pending
        );
        let init = match grammar.push(atom(AtomType::MOOV, 300)).unwrap() {
            GrammarEvent::InitReady(init) => init,
            other => panic!("expected init, got {:?}", other),
        };
        assert_eq!(init.len(), 24 + 308);
        assert_eq!(&init.to_bytes()[4..8], b"ftyp");
        assert!(grammar.state().is_initialized());

        for n in 1..=3u64 {
            assert_eq!(
                grammar.push(atom(AtomType::MOOF, 40)).unwrap(),
                GrammarEvent::Pending
            );
            match grammar.push(atom(AtomType::MDAT, 1000)).unwrap() {
                GrammarEvent::FragmentReady(fragment) => {
                    assert_eq!(fragment.sequence, n);
                    assert_eq!(fragment.len(), 48 + 1008);
                    assert_eq!(&fragment.to_bytes()[52..56], b"mdat");
                }
                other => panic!("expected fragment, got {:?}", other),
            }
        }
        assert_eq!(grammar.fragments(), 3);
    }

    #[test]
    fn test_moof_before_moov_fails_at_moov() {
        let mut grammar = BoxGrammar::new();
        grammar.push(atom(AtomType::FTYP, 8)).unwrap();

        let err = grammar.push(atom(AtomType::MOOF, 8)).unwrap_err();
        assert_matches!(
            err,
            Error::UnexpectedAtom { expected: AtomType::MOOV, found: AtomType::MOOF }
        );
        assert_eq!(grammar.state(), GrammarState::AwaitingMoov);
    }

    #[test]
    fn test_stream_must_start_with_ftyp() {
        let mut grammar = BoxGrammar::new();
        assert_matches!(
            grammar.push(atom(AtomType::MOOV, 8)),
            Err(Error::UnexpectedAtom { expected: AtomType::FTYP, .. })
        );
    }

    #[test]
    fn test_lone_moof_rejected() {
        let mut grammar = BoxGrammar::new();
        grammar.push(atom(AtomType::FTYP, 8)).unwrap();
        grammar.push(atom(AtomType::MOOV, 8)).unwrap();
        grammar.push(atom(AtomType::MOOF, 8)).unwrap();

        assert_matches!(
            grammar.push(atom(AtomType::MOOF, 8)),
            Err(Error::UnexpectedAtom { expected: AtomType::MDAT, found: AtomType::MOOF })
        );
    }

    #[test]
    fn test_unknown_box_rejected() {
        let mut grammar = BoxGrammar::new();
        grammar.push(atom(AtomType::FTYP, 8)).unwrap();
        grammar.push(atom(AtomType::MOOV, 8)).unwrap();

        assert_matches!(
            grammar.push(atom(AtomType::MFRA, 8)),
            Err(Error::UnexpectedAtom { expected: AtomType::MOOF, found: AtomType::MFRA })
        );
    }
}
