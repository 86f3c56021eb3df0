//! Parties of a protocol run
//!
//! Every run is carried out by a fixed set of parties known upfront. [`PartyRegistry`] holds
//! this set along with the identity of the local party (`me`). The registry is created once
//! per run and is never modified afterwards; rounds share it via [`Arc`](std::sync::Arc).

use std::collections::BTreeSet;
use std::fmt;

/// Identifier of a party
///
/// Any totally ordered, cloneable type can be used as an identifier, e.g. `u16` index
/// or a `String` name. Blanket implementation is provided.
pub trait PartyId: Ord + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> PartyId for T where T: Ord + Clone + fmt::Debug + Send + Sync + 'static {}

/// Set of parties participating in the run
#[derive(Debug, Clone)]
pub struct PartyRegistry<P> {
    me: P,
    parties: BTreeSet<P>,
}

impl<P: PartyId> PartyRegistry<P> {
    /// Constructs a registry
    ///
    /// `parties` must list every participant including `me`. Returns an error if some
    /// party is listed more than once, or if `me` is not in the list.
    pub fn new(me: P, parties: impl IntoIterator<Item = P>) -> Result<Self, InvalidRegistry> {
        let mut set = BTreeSet::new();
        for party in parties {
            if !set.insert(party) {
                return Err(Reason::DuplicateParty.into());
            }
        }
        if !set.contains(&me) {
            return Err(Reason::MeNotInParties.into());
        }
        Ok(Self { me, parties: set })
    }

    /// Identifier of the local party
    pub fn me(&self) -> &P {
        &self.me
    }

    /// Returns `true` if `party` is the local party
    pub fn is_me(&self, party: &P) -> bool {
        self.me == *party
    }

    /// All parties, in ascending order
    pub fn parties(&self) -> impl Iterator<Item = &P> + '_ {
        self.parties.iter()
    }

    /// All parties except the local one, in ascending order
    ///
    /// These are the parties the local party expects to hear from in a broadcast round.
    pub fn others(&self) -> impl Iterator<Item = &P> + '_ {
        self.parties.iter().filter(move |p| **p != self.me)
    }

    /// Checks whether `party` takes part in the run
    pub fn contains(&self, party: &P) -> bool {
        self.parties.contains(party)
    }

    /// Number of parties, including the local one
    pub fn len(&self) -> usize {
        self.parties.len()
    }

    /// Registry always contains at least the local party, so it's never empty
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Registry couldn't be constructed
#[derive(Debug)]
pub struct InvalidRegistry(Reason);

#[derive(Debug)]
enum Reason {
    DuplicateParty,
    MeNotInParties,
}

impl From<Reason> for InvalidRegistry {
    fn from(err: Reason) -> Self {
        Self(err)
    }
}

impl fmt::Display for InvalidRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Reason::DuplicateParty => f.write_str("same party appears more than once in the list"),
            Reason::MeNotInParties => f.write_str("local party is not in the list of parties"),
        }
    }
}

impl std::error::Error for InvalidRegistry {}
