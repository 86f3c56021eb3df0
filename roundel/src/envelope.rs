//! Message envelopes
//!
//! Transport delivers [`Envelope`]s to the [driver](crate::driver), and takes [`Outgoing`]
//! messages emitted by rounds out of it. Payload is the protocol message `M`: usually an enum
//! with a variant per round, implementing [`ProtocolMessage`] and [`RoundMessage`] for each
//! round payload type.

use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroU16;

use round_based::{ProtocolMessage, RoundMessage};

use crate::round::RoundError;

/// Number of the protocol round
///
/// Rounds are numbered starting from 1, numbers strictly increase within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct RoundNumber(NonZeroU16);

impl RoundNumber {
    /// First round of any protocol
    pub const FIRST: Self = Self(NonZeroU16::MIN);

    /// Constructs a round number, returns `None` if `n` is zero
    pub fn new(n: u16) -> Option<Self> {
        NonZeroU16::new(n).map(Self)
    }

    /// Round number of the payload `T` carried by protocol message `M`
    pub fn of<M, T>() -> Result<Self, RoundError>
    where
        M: RoundMessage<T>,
    {
        Self::new(M::ROUND).ok_or(RoundError::InvalidRoundNumber)
    }

    /// Round number as an integer
    pub fn get(self) -> u16 {
        self.0.get()
    }

    /// Number of the round following this one
    ///
    /// Returns `None` on overflow.
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl fmt::Display for RoundNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Message received from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Envelope<P, M> {
    /// Party who sent the message
    pub sender: P,
    /// Round the message is addressed to
    pub round: RoundNumber,
    /// Protocol message
    pub payload: M,
}

impl<P, M: ProtocolMessage> Envelope<P, M> {
    /// Wraps a protocol message, taking the round number from the message itself
    ///
    /// Returns `None` if the message reports round `0`.
    pub fn new(sender: P, payload: M) -> Option<Self> {
        let round = RoundNumber::new(payload.round())?;
        Some(Self {
            sender,
            round,
            payload,
        })
    }
}

/// Destination of an outgoing message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Recipient<P> {
    /// Every party except the sender
    Broadcast,
    /// A single party
    One(P),
}

/// Message emitted by a round, to be delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Outgoing<P, M> {
    /// Local party
    pub sender: P,
    /// Whom the message is addressed to
    pub recipient: Recipient<P>,
    /// Round the message is addressed to
    pub round: RoundNumber,
    /// Protocol message
    pub payload: M,
}

impl<P: PartialEq, M> Outgoing<P, M> {
    /// Checks whether the message is broadcast
    pub fn is_broadcast(&self) -> bool {
        matches!(self.recipient, Recipient::Broadcast)
    }

    /// Checks whether `party` should receive this message
    ///
    /// Sender never receives its own message.
    pub fn delivers_to(&self, party: &P) -> bool {
        match &self.recipient {
            Recipient::Broadcast => self.sender != *party,
            Recipient::One(recipient) => recipient == party,
        }
    }

    /// Converts the message into the envelope the recipient's driver expects
    pub fn into_envelope(self) -> Envelope<P, M> {
        Envelope {
            sender: self.sender,
            round: self.round,
            payload: self.payload,
        }
    }
}

/// Queue of outgoing messages
///
/// Owned by the driver and lent to a round while it's being finalized. Sending into the
/// outbox never blocks: messages are queued until the transport drains them.
#[derive(Debug)]
pub struct Outbox<P, M> {
    me: P,
    queue: VecDeque<Outgoing<P, M>>,
}

impl<P: Clone, M> Outbox<P, M> {
    /// Constructs an empty outbox of party `me`
    pub fn new(me: P) -> Self {
        Self {
            me,
            queue: VecDeque::new(),
        }
    }

    /// Queues `msg` to be broadcast to every other party
    ///
    /// Message is addressed to the round it belongs to.
    pub fn broadcast<T>(&mut self, msg: T) -> Result<(), RoundError>
    where
        M: RoundMessage<T>,
    {
        self.push(Recipient::Broadcast, msg)
    }

    /// Queues `msg` to be sent to a single party
    pub fn send_to<T>(&mut self, recipient: P, msg: T) -> Result<(), RoundError>
    where
        M: RoundMessage<T>,
    {
        self.push(Recipient::One(recipient), msg)
    }

    fn push<T>(&mut self, recipient: Recipient<P>, msg: T) -> Result<(), RoundError>
    where
        M: RoundMessage<T>,
    {
        let round = RoundNumber::of::<M, T>()?;
        self.queue.push_back(Outgoing {
            sender: self.me.clone(),
            recipient,
            round,
            payload: M::to_protocol_message(msg),
        });
        Ok(())
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Checks whether there are no queued messages
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Takes all queued messages in the order they were queued
    pub fn drain(&mut self) -> std::collections::vec_deque::Drain<'_, Outgoing<P, M>> {
        self.queue.drain(..)
    }
}
