use std::collections::{btree_map, BTreeMap, BTreeSet};

use round_based::{ProtocolMessage, RoundMessage};
use tracing::{event, Level};

use crate::envelope::RoundNumber;
use crate::party::{PartyId, PartyRegistry};

use super::{InvalidPayload, MessageError, Payload, Phase, RoundError};

/// Collects messages of a single round
///
/// Keeps track of expected senders and stores at most one payload per sender. Payload is
/// validated before it's stored. Once every expected sender has reported, stored messages
/// can be [taken](Inbox::take) exactly once.
#[derive(Debug)]
pub struct Inbox<P, T> {
    round: RoundNumber,
    expected: BTreeSet<P>,
    received: BTreeMap<P, T>,
    finalized: bool,
}

impl<P: PartyId, T: Payload> Inbox<P, T> {
    /// Inbox of `round` which expects a message from each of `expected` parties
    pub fn new(round: RoundNumber, expected: impl IntoIterator<Item = P>) -> Self {
        Self {
            round,
            expected: expected.into_iter().collect(),
            received: BTreeMap::new(),
            finalized: false,
        }
    }

    /// Inbox of broadcast `round`: expects a message from every party but the local one
    pub fn broadcast(round: RoundNumber, registry: &PartyRegistry<P>) -> Self {
        Self::new(round, registry.others().cloned())
    }

    /// Round which messages are collected
    pub fn round(&self) -> RoundNumber {
        self.round
    }

    /// Parties that are expected to send a message
    pub fn expected(&self) -> impl Iterator<Item = &P> + '_ {
        self.expected.iter()
    }

    /// Payload stored for `sender`, if any
    pub fn received_from(&self, sender: &P) -> Option<&T> {
        self.received.get(sender)
    }

    /// Expected senders who haven't reported yet
    pub fn waiting_for(&self) -> Vec<P> {
        self.expected
            .iter()
            .filter(|p| !self.received.contains_key(*p))
            .cloned()
            .collect()
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        if self.finalized {
            Phase::Finalized
        } else if self.received.len() == self.expected.len() {
            Phase::Complete
        } else if self.received.is_empty() {
            Phase::Created
        } else {
            Phase::Collecting {
                received: self.received.len(),
                expected: self.expected.len(),
            }
        }
    }

    /// Checks whether every expected sender has reported
    pub fn is_complete(&self) -> bool {
        self.phase() == Phase::Complete
    }

    /// Validates and stores `payload` received from `sender`
    pub fn store(&mut self, sender: P, payload: T) -> Result<(), MessageError<P>> {
        let round = self.round;
        if self.finalized {
            return Err(MessageError::RoundClosed { sender, round });
        }
        if !self.expected.contains(&sender) {
            return Err(MessageError::UnexpectedSender { sender, round });
        }
        if self.received.contains_key(&sender) {
            return Err(MessageError::DuplicateMessage { sender, round });
        }
        if let Err(reason) = payload.validate() {
            return Err(MessageError::Validation {
                sender,
                round,
                reason,
            });
        }

        event!(Level::TRACE, round = round.get(), sender = ?sender, "message stored");
        self.received.insert(sender, payload);
        Ok(())
    }

    /// Extracts the round payload from protocol message and stores it
    ///
    /// Message that carries a payload of another round is rejected as invalid.
    pub fn store_msg<M>(&mut self, sender: P, msg: M) -> Result<(), MessageError<P>>
    where
        M: ProtocolMessage + RoundMessage<T>,
    {
        match M::from_protocol_message(msg) {
            Ok(payload) => self.store(sender, payload),
            Err(msg) => Err(MessageError::Validation {
                sender,
                round: self.round,
                reason: InvalidPayload::new(format!(
                    "payload belongs to round {}, expected payload of round {}",
                    ProtocolMessage::round(&msg),
                    M::ROUND
                )),
            }),
        }
    }

    /// Zero value of the round payload wrapped into protocol message
    pub fn empty_payload<M>(&self) -> M
    where
        M: RoundMessage<T>,
        T: Default,
    {
        M::to_protocol_message(T::default())
    }

    /// Takes collected messages, closing the inbox
    ///
    /// Fails if some expected sender hasn't reported, or if messages were already taken.
    pub fn take(&mut self) -> Result<Received<P, T>, RoundError> {
        match self.phase() {
            Phase::Complete => {
                self.finalized = true;
                Ok(Received(std::mem::take(&mut self.received)))
            }
            Phase::Finalized => Err(RoundError::AlreadyFinalized { round: self.round }),
            Phase::Created | Phase::Collecting { .. } => Err(RoundError::FinalizeBeforeComplete {
                round: self.round,
                missing: self.expected.len() - self.received.len(),
            }),
        }
    }
}

/// Messages collected in a round, one per sender
///
/// Iterates in ascending order of sender identifiers, regardless of the order in which
/// messages were received.
#[derive(Debug, Clone)]
pub struct Received<P, T>(BTreeMap<P, T>);

impl<P: Ord, T> Received<P, T> {
    /// Payload sent by `sender`
    pub fn get(&self, sender: &P) -> Option<&T> {
        self.0.get(sender)
    }

    /// Iterates over `(sender, payload)` pairs
    pub fn iter(&self) -> btree_map::Iter<'_, P, T> {
        self.0.iter()
    }

    /// Iterates over payloads
    pub fn values(&self) -> btree_map::Values<'_, P, T> {
        self.0.values()
    }

    /// Amount of received messages
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Checks whether nothing was received
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns underlying map
    pub fn into_inner(self) -> BTreeMap<P, T> {
        self.0
    }
}

impl<P, T> IntoIterator for Received<P, T> {
    type Item = (P, T);
    type IntoIter = btree_map::IntoIter<P, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a, P, T> IntoIterator for &'a Received<P, T> {
    type Item = (&'a P, &'a T);
    type IntoIter = btree_map::Iter<'a, P, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
