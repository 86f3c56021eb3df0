//! XOR protocol
//!
//! Each party picks a random 32-byte value, and broadcasts it. Once a party receives values from
//! everyone else, it outputs XOR of all values including its own. XOR is associative and
//! commutative, so every party outputs the same value regardless of the order in which messages
//! arrived.
//!
//! The protocol consists of two rounds:
//! 1. [`Round1`] doesn't receive anything. When finalized, it broadcasts the party's value.
//! 2. [`Round2`] collects [`Contribution`]s from all other parties. When finalized, it computes
//!    the [`XorSum`]. This round is terminal.

use std::sync::Arc;

use rand_core::{CryptoRng, RngCore};
use round_based::{ProtocolMessage, RoundMessage};

use crate::envelope::{Outbox, RoundNumber};
use crate::party::{PartyId, PartyRegistry};
use crate::round::{
    Handoff, Inbox, InvalidPayload, MessageError, Next, Payload, Phase, Round, RoundError,
};

use super::xor_into;

/// Size of a contribution in bytes
pub const VALUE_SIZE: usize = 32;

/// Message of XOR protocol
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Msg {
    /// Value broadcast at round 1, received at round 2
    Round2(Contribution),
}

impl ProtocolMessage for Msg {
    fn round(&self) -> u16 {
        match self {
            Msg::Round2(_) => 2,
        }
    }
}

impl RoundMessage<Contribution> for Msg {
    const ROUND: u16 = 2;

    fn to_protocol_message(round_message: Contribution) -> Self {
        Msg::Round2(round_message)
    }

    fn from_protocol_message(protocol_message: Self) -> Result<Contribution, Self> {
        match protocol_message {
            Msg::Round2(msg) => Ok(msg),
        }
    }
}

/// Party's value
///
/// Kept as raw bytes, as decoded from the wire. Must be exactly [`VALUE_SIZE`] bytes long.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Contribution {
    /// The value
    pub value: Vec<u8>,
}

impl Payload for Contribution {
    fn validate(&self) -> Result<(), InvalidPayload> {
        if self.value.len() != VALUE_SIZE {
            return Err(InvalidPayload::new(format!(
                "value should be {VALUE_SIZE} bytes long, got {} bytes",
                self.value.len()
            )));
        }
        Ok(())
    }
}

/// Output of XOR protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XorSum(pub [u8; VALUE_SIZE]);

/// Starts the protocol with a random value
pub fn start<P: PartyId>(
    registry: Arc<PartyRegistry<P>>,
    rng: &mut (impl RngCore + CryptoRng),
) -> Round1<P> {
    let mut value = [0u8; VALUE_SIZE];
    rng.fill_bytes(&mut value);
    start_with_value(registry, value)
}

/// Starts the protocol with the given value
pub fn start_with_value<P: PartyId>(
    registry: Arc<PartyRegistry<P>>,
    value: [u8; VALUE_SIZE],
) -> Round1<P> {
    Round1 {
        registry,
        value,
        broadcast: Handoff::new(),
    }
}

/// Round 1: broadcasts party's value
pub struct Round1<P> {
    registry: Arc<PartyRegistry<P>>,
    value: [u8; VALUE_SIZE],
    broadcast: Handoff<[u8; VALUE_SIZE]>,
}

impl<P: PartyId> Round for Round1<P> {
    type Party = P;
    type Msg = Msg;
    type Output = XorSum;

    fn number(&self) -> RoundNumber {
        RoundNumber::FIRST
    }

    fn phase(&self) -> Phase {
        if self.broadcast.is_empty() {
            Phase::Complete
        } else {
            Phase::Finalized
        }
    }

    fn waiting_for(&self) -> Vec<P> {
        Vec::new()
    }

    fn empty_payload(&self) -> Option<Msg> {
        None
    }

    fn process_message(&mut self, sender: P, _msg: Msg) -> Result<(), MessageError<P>> {
        let round = self.number();
        if self.broadcast.is_empty() {
            Err(MessageError::UnexpectedSender { sender, round })
        } else {
            Err(MessageError::RoundClosed { sender, round })
        }
    }

    fn finalize(&mut self, outbox: &mut Outbox<P, Msg>) -> Result<(), RoundError> {
        let round = self.number();
        self.broadcast.fill(round, self.value)?;
        outbox.broadcast(Contribution {
            value: self.value.to_vec(),
        })
    }

    fn next(&mut self) -> Result<Next<P, Msg, XorSum>, RoundError> {
        let round = self.number();
        let own = self.broadcast.take(round)?;
        let round = RoundNumber::of::<Msg, Contribution>()?;
        Ok(Next::Round(Box::new(Round2 {
            own,
            inbox: Inbox::broadcast(round, &self.registry),
            sum: Handoff::new(),
        })))
    }
}

/// Round 2: collects values of other parties and outputs the sum
pub struct Round2<P> {
    own: [u8; VALUE_SIZE],
    inbox: Inbox<P, Contribution>,
    sum: Handoff<XorSum>,
}

impl<P: PartyId> Round for Round2<P> {
    type Party = P;
    type Msg = Msg;
    type Output = XorSum;

    fn number(&self) -> RoundNumber {
        self.inbox.round()
    }

    fn phase(&self) -> Phase {
        self.inbox.phase()
    }

    fn waiting_for(&self) -> Vec<P> {
        self.inbox.waiting_for()
    }

    fn empty_payload(&self) -> Option<Msg> {
        Some(self.inbox.empty_payload())
    }

    fn process_message(&mut self, sender: P, msg: Msg) -> Result<(), MessageError<P>> {
        self.inbox.store_msg(sender, msg)
    }

    fn finalize(&mut self, _outbox: &mut Outbox<P, Msg>) -> Result<(), RoundError> {
        let received = self.inbox.take()?;

        let mut sum = [0u8; VALUE_SIZE];
        xor_into(&mut sum, &self.own);
        for contribution in received.values() {
            xor_into(&mut sum, &contribution.value);
        }

        let round = self.number();
        self.sum.fill(round, XorSum(sum))
    }

    fn next(&mut self) -> Result<Next<P, Msg, XorSum>, RoundError> {
        if self.inbox.phase() != Phase::Finalized {
            return Err(RoundError::NotFinalized {
                round: self.number(),
            });
        }
        Ok(Next::Terminal)
    }

    fn result(&mut self) -> Result<XorSum, RoundError> {
        let round = self.number();
        self.sum.take(round)
    }
}
