//! Commit-reveal coin flipping
//!
//! Parties jointly sample a random seed no single party can bias, as long as all of them
//! reveal their contributions:
//! 1. [`Round1`]: party samples a seed and broadcasts a [`Commitment`] to it.
//! 2. [`Round2`]: collects commitments of other parties, then broadcasts the [`Reveal`]ed seed.
//! 3. [`Round3`]: collects reveals, checks them against the commitments from round 2, and
//!    outputs the [`Coin`]: XOR of all seeds.
//!
//! If some reveal doesn't match the commitment, the protocol fails with [`InvalidReveal`]
//! that names the parties at fault.

use std::fmt;
use std::sync::Arc;

use digest::Digest;
use rand_core::{CryptoRng, RngCore};
use round_based::{ProtocolMessage, RoundMessage};

use crate::envelope::{Outbox, RoundNumber};
use crate::party::{PartyId, PartyRegistry};
use crate::round::{
    Handoff, Inbox, MessageError, Next, Payload, Phase, Received, Round, RoundError,
};

use super::xor_into;

/// Size of the seed in bytes
pub const SEED_SIZE: usize = 32;

const COMMITMENT_TAG: &[u8] = b"roundel/coin-flip/commitment";

/// Message of coin flipping protocol
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Msg {
    /// Commitment broadcast at round 1, received at round 2
    Commit(Commitment),
    /// Seed revealed at round 2, received at round 3
    Reveal(Reveal),
}

impl ProtocolMessage for Msg {
    fn round(&self) -> u16 {
        match self {
            Msg::Commit(_) => 2,
            Msg::Reveal(_) => 3,
        }
    }
}

impl RoundMessage<Commitment> for Msg {
    const ROUND: u16 = 2;

    fn to_protocol_message(round_message: Commitment) -> Self {
        Msg::Commit(round_message)
    }

    fn from_protocol_message(protocol_message: Self) -> Result<Commitment, Self> {
        match protocol_message {
            Msg::Commit(msg) => Ok(msg),
            msg => Err(msg),
        }
    }
}

impl RoundMessage<Reveal> for Msg {
    const ROUND: u16 = 3;

    fn to_protocol_message(round_message: Reveal) -> Self {
        Msg::Reveal(round_message)
    }

    fn from_protocol_message(protocol_message: Self) -> Result<Reveal, Self> {
        match protocol_message {
            Msg::Reveal(msg) => Ok(msg),
            msg => Err(msg),
        }
    }
}

/// Commitment to a seed: `SHA256(tag || seed)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Commitment(pub [u8; 32]);

impl Commitment {
    /// Commits to the `seed`
    pub fn commit(seed: &[u8; SEED_SIZE]) -> Self {
        let hash = sha2::Sha256::new()
            .chain_update(COMMITMENT_TAG)
            .chain_update(seed)
            .finalize();
        let mut commitment = [0u8; 32];
        commitment.copy_from_slice(&hash);
        Self(commitment)
    }

    /// Checks that commitment opens to `seed`
    pub fn opens_to(&self, seed: &[u8; SEED_SIZE]) -> bool {
        Self::commit(seed) == *self
    }
}

impl Payload for Commitment {}

/// Revealed seed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Reveal(pub [u8; SEED_SIZE]);

impl Payload for Reveal {}

/// Output of coin flipping: joint random seed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coin {
    /// XOR of the seeds of all parties
    pub seed: [u8; SEED_SIZE],
}

impl Coin {
    /// Interprets the seed as a single coin toss
    pub fn heads(&self) -> bool {
        self.seed[0] & 1 == 1
    }
}

/// Starts the protocol with a random seed
pub fn start<P: PartyId>(
    registry: Arc<PartyRegistry<P>>,
    rng: &mut (impl RngCore + CryptoRng),
) -> Round1<P> {
    let mut seed = [0u8; SEED_SIZE];
    rng.fill_bytes(&mut seed);
    start_with_seed(registry, seed)
}

/// Starts the protocol with the given seed
pub fn start_with_seed<P: PartyId>(
    registry: Arc<PartyRegistry<P>>,
    seed: [u8; SEED_SIZE],
) -> Round1<P> {
    Round1 {
        registry,
        seed,
        committed: Handoff::new(),
    }
}

/// Round 1: commits to the seed
pub struct Round1<P> {
    registry: Arc<PartyRegistry<P>>,
    seed: [u8; SEED_SIZE],
    committed: Handoff<[u8; SEED_SIZE]>,
}

impl<P: PartyId> Round for Round1<P> {
    type Party = P;
    type Msg = Msg;
    type Output = Coin;

    fn number(&self) -> RoundNumber {
        RoundNumber::FIRST
    }

    fn phase(&self) -> Phase {
        if self.committed.is_empty() {
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
        if self.committed.is_empty() {
            Err(MessageError::UnexpectedSender { sender, round })
        } else {
            Err(MessageError::RoundClosed { sender, round })
        }
    }

    fn finalize(&mut self, outbox: &mut Outbox<P, Msg>) -> Result<(), RoundError> {
        let round = self.number();
        self.committed.fill(round, self.seed)?;
        outbox.broadcast(Commitment::commit(&self.seed))
    }

    fn next(&mut self) -> Result<Next<P, Msg, Coin>, RoundError> {
        let round = self.number();
        let seed = self.committed.take(round)?;
        let next_round = RoundNumber::of::<Msg, Commitment>()?;
        Ok(Next::Round(Box::new(Round2 {
            registry: self.registry.clone(),
            seed,
            inbox: Inbox::broadcast(next_round, &self.registry),
            commitments: Handoff::new(),
        })))
    }
}

/// Round 2: collects commitments and reveals the seed
pub struct Round2<P> {
    registry: Arc<PartyRegistry<P>>,
    seed: [u8; SEED_SIZE],
    inbox: Inbox<P, Commitment>,
    commitments: Handoff<Received<P, Commitment>>,
}

impl<P: PartyId> Round for Round2<P> {
    type Party = P;
    type Msg = Msg;
    type Output = Coin;

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
        Some(self.inbox.empty_payload::<Msg>())
    }

    fn process_message(&mut self, sender: P, msg: Msg) -> Result<(), MessageError<P>> {
        self.inbox.store_msg(sender, msg)
    }

    fn finalize(&mut self, outbox: &mut Outbox<P, Msg>) -> Result<(), RoundError> {
        let round = self.number();
        let commitments = self.inbox.take()?;
        self.commitments.fill(round, commitments)?;
        outbox.broadcast(Reveal(self.seed))
    }

    fn next(&mut self) -> Result<Next<P, Msg, Coin>, RoundError> {
        let round = self.number();
        let commitments = self.commitments.take(round)?;
        let next_round = RoundNumber::of::<Msg, Reveal>()?;
        Ok(Next::Round(Box::new(Round3 {
            seed: self.seed,
            commitments,
            inbox: Inbox::broadcast(next_round, &self.registry),
            coin: Handoff::new(),
        })))
    }
}

/// Round 3: collects reveals, checks them, and outputs the coin
pub struct Round3<P> {
    seed: [u8; SEED_SIZE],
    commitments: Received<P, Commitment>,
    inbox: Inbox<P, Reveal>,
    coin: Handoff<Coin>,
}

impl<P: PartyId> Round for Round3<P> {
    type Party = P;
    type Msg = Msg;
    type Output = Coin;

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
        Some(self.inbox.empty_payload::<Msg>())
    }

    fn process_message(&mut self, sender: P, msg: Msg) -> Result<(), MessageError<P>> {
        self.inbox.store_msg(sender, msg)
    }

    fn finalize(&mut self, _outbox: &mut Outbox<P, Msg>) -> Result<(), RoundError> {
        let round = self.number();
        let reveals = self.inbox.take()?;

        let culprits = reveals
            .iter()
            .filter(|(party, Reveal(seed))| {
                !self
                    .commitments
                    .get(party)
                    .is_some_and(|commitment| commitment.opens_to(seed))
            })
            .map(|(party, _)| party.clone())
            .collect::<Vec<_>>();
        if !culprits.is_empty() {
            return Err(RoundError::protocol(round, InvalidReveal { culprits }));
        }

        let mut seed = self.seed;
        for Reveal(revealed) in reveals.values() {
            xor_into(&mut seed, revealed);
        }
        self.coin.fill(round, Coin { seed })
    }

    fn next(&mut self) -> Result<Next<P, Msg, Coin>, RoundError> {
        if self.inbox.phase() != Phase::Finalized {
            return Err(RoundError::NotFinalized {
                round: self.number(),
            });
        }
        Ok(Next::Terminal)
    }

    fn result(&mut self) -> Result<Coin, RoundError> {
        let round = self.number();
        self.coin.take(round)
    }
}

/// Some parties revealed seeds that don't match their commitments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidReveal<P> {
    culprits: Vec<P>,
}

impl<P> InvalidReveal<P> {
    /// Parties at fault, in ascending order
    pub fn culprits(&self) -> &[P] {
        &self.culprits
    }
}

impl<P: fmt::Debug> fmt::Display for InvalidReveal<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "revealed seed doesn't match the commitment: {:?}",
            self.culprits
        )
    }
}

impl<P: fmt::Debug> std::error::Error for InvalidReveal<P> {}
