//! Rounds of interactive protocol
//!
//! Protocol is a chain of rounds. Each round collects one message from every expected sender,
//! and once everyone has reported, it's [finalized](Round::finalize): it computes its contribution
//! to the protocol state and possibly emits messages for the following rounds. Then the round
//! hands over to the [next one](Round::next), or declares itself terminal and yields the
//! [protocol output](Round::result).
//!
//! A round goes through the following [phases](Phase):
//! ```text
//! Created -> Collecting -> Complete -> Finalized
//! ```
//!
//! Round `N` owns whatever it needs from round `N-1`: rounds don't reference each other,
//! the previous round moves its output into the next one when [`Round::next`] is called.
//!
//! [`Inbox`] implements message bookkeeping which is the same for all rounds (expected senders,
//! duplicates, validation, completion), and [`Handoff`] keeps round output until it's taken
//! by the next round or by the driver. Implementing a round usually boils down to delegating
//! to these two.

use std::borrow::Cow;
use std::fmt;

use round_based::ProtocolMessage;

use crate::envelope::{Outbox, RoundNumber};
use crate::party::PartyId;

mod inbox;

pub use self::inbox::{Inbox, Received};

/// Round payload
///
/// Each round declares the type of payload it receives. Payload is validated before it's stored.
pub trait Payload {
    /// Checks that payload is well-formed
    ///
    /// Must be a pure predicate: the same payload is either always accepted or always rejected.
    fn validate(&self) -> Result<(), InvalidPayload> {
        Ok(())
    }
}

/// A step of the protocol
///
/// Rounds are driven by the [`Driver`](crate::driver::Driver) which is generic over protocol
/// message `Msg` and output `Output`, so rounds of the same protocol can be boxed into
/// [`BoxedRound`].
pub trait Round: Send {
    /// Party identifier
    type Party: PartyId;
    /// Protocol message
    type Msg: ProtocolMessage + Send;
    /// Protocol output
    type Output: Send;

    /// Number of the round
    fn number(&self) -> RoundNumber;

    /// Current phase of the round
    fn phase(&self) -> Phase;

    /// Expected senders who haven't reported yet
    fn waiting_for(&self) -> Vec<Self::Party>;

    /// Zero value of the payload this round receives
    ///
    /// Deserializers use it to learn which shape the incoming payload needs to be decoded into.
    /// Returns `None` if the round doesn't receive any messages.
    fn empty_payload(&self) -> Option<Self::Msg>;

    /// Validates and stores the message received from `sender`
    ///
    /// Fails if `sender` isn't expected, has already reported, or sent invalid payload. Round
    /// state is not affected by the rejected message.
    fn process_message(
        &mut self,
        sender: Self::Party,
        msg: Self::Msg,
    ) -> Result<(), MessageError<Self::Party>>;

    /// Computes the output of the round
    ///
    /// Must be called exactly once, after every expected sender has reported. Output must not
    /// depend on the order in which messages were received. Messages for the following rounds
    /// are pushed into `outbox`.
    fn finalize(&mut self, outbox: &mut Outbox<Self::Party, Self::Msg>) -> Result<(), RoundError>;

    /// Returns the next round, or [`Next::Terminal`] if this is the last round
    ///
    /// Can only be called after the round was finalized.
    fn next(&mut self) -> Result<Next<Self::Party, Self::Msg, Self::Output>, RoundError>;

    /// Output of the protocol
    ///
    /// Only defined for terminal rounds, and can be retrieved only once.
    fn result(&mut self) -> Result<Self::Output, RoundError> {
        Err(RoundError::NotTerminal {
            round: self.number(),
        })
    }
}

/// Round of the protocol with protocol message `M`, output `O`, and party identifier `P`
pub type BoxedRound<P, M, O> = Box<dyn Round<Party = P, Msg = M, Output = O>>;

/// What follows the finalized round
pub enum Next<P, M, O> {
    /// Round to be activated next
    Round(BoxedRound<P, M, O>),
    /// The round was the last one, output is available via [`Round::result`]
    Terminal,
}

impl<P, M, O> fmt::Debug for Next<P, M, O>
where
    P: PartyId,
    M: ProtocolMessage + Send,
    O: Send,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Next::Round(round) => f.debug_tuple("Round").field(&round.number()).finish(),
            Next::Terminal => f.write_str("Terminal"),
        }
    }
}

/// Phase of the round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No messages received yet
    Created,
    /// Some messages are received, some are still awaited
    Collecting {
        /// Amount of received messages
        received: usize,
        /// Amount of expected messages
        expected: usize,
    },
    /// Every expected sender has reported, round can be finalized
    Complete,
    /// Round is finalized
    Finalized,
}

/// One-shot slot for the round output
///
/// Filled once when the round is finalized, and taken once by the next round or as the protocol
/// result.
#[derive(Debug)]
pub struct Handoff<T>(Slot<T>);

#[derive(Debug)]
enum Slot<T> {
    Empty,
    Filled(T),
    Taken,
}

impl<T> Handoff<T> {
    /// Empty slot
    pub fn new() -> Self {
        Self(Slot::Empty)
    }

    /// Puts the output of `round` into the slot
    ///
    /// Returns an error if the slot was filled before, which means the round is being
    /// finalized twice.
    pub fn fill(&mut self, round: RoundNumber, value: T) -> Result<(), RoundError> {
        match self.0 {
            Slot::Empty => {
                self.0 = Slot::Filled(value);
                Ok(())
            }
            Slot::Filled(_) | Slot::Taken => Err(RoundError::AlreadyFinalized { round }),
        }
    }

    /// Takes the output of `round`
    pub fn take(&mut self, round: RoundNumber) -> Result<T, RoundError> {
        match std::mem::replace(&mut self.0, Slot::Taken) {
            Slot::Filled(value) => Ok(value),
            Slot::Empty => {
                self.0 = Slot::Empty;
                Err(RoundError::NotFinalized { round })
            }
            Slot::Taken => Err(RoundError::AlreadyTaken { round }),
        }
    }

    /// Checks whether the slot has never been filled
    pub fn is_empty(&self) -> bool {
        matches!(self.0, Slot::Empty)
    }
}

impl<T> Default for Handoff<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload didn't pass validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPayload(Cow<'static, str>);

impl InvalidPayload {
    /// Constructs an error with given description
    pub fn new(reason: impl Into<Cow<'static, str>>) -> Self {
        Self(reason.into())
    }

    /// Description of what's wrong with the payload
    pub fn reason(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvalidPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for InvalidPayload {}

/// Message was rejected
///
/// Rejection is local to the message: the round isn't affected and keeps waiting for
/// messages it expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError<P> {
    /// Payload is malformed
    Validation {
        /// Sender of the message
        sender: P,
        /// Round the message was addressed to
        round: RoundNumber,
        /// What's wrong with the payload
        reason: InvalidPayload,
    },
    /// Sender is not expected to send a message in this round
    UnexpectedSender {
        /// Sender of the message
        sender: P,
        /// Active round
        round: RoundNumber,
    },
    /// Sender has already reported in this round, the first message is retained
    DuplicateMessage {
        /// Sender of the message
        sender: P,
        /// Active round
        round: RoundNumber,
    },
    /// Message is addressed to another round
    RoundMismatch {
        /// Sender of the message
        sender: P,
        /// Active round
        expected: RoundNumber,
        /// Round the message is addressed to
        got: RoundNumber,
    },
    /// Round has been finalized and doesn't accept messages anymore
    RoundClosed {
        /// Sender of the message
        sender: P,
        /// Finalized round
        round: RoundNumber,
    },
}

impl<P> MessageError<P> {
    /// Sender of the rejected message
    pub fn sender(&self) -> &P {
        match self {
            MessageError::Validation { sender, .. }
            | MessageError::UnexpectedSender { sender, .. }
            | MessageError::DuplicateMessage { sender, .. }
            | MessageError::RoundMismatch { sender, .. }
            | MessageError::RoundClosed { sender, .. } => sender,
        }
    }

    /// Message is addressed to a round that has already passed
    pub fn is_stale(&self) -> bool {
        matches!(self, MessageError::RoundMismatch { expected, got, .. } if got < expected)
    }

    /// Message is addressed to a round that hasn't started yet
    pub fn is_future(&self) -> bool {
        matches!(self, MessageError::RoundMismatch { expected, got, .. } if got > expected)
    }
}

impl<P: fmt::Debug> fmt::Display for MessageError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::Validation { sender, round, .. } => {
                write!(f, "invalid payload from {sender:?} in round {round}")
            }
            MessageError::UnexpectedSender { sender, round } => {
                write!(f, "party {sender:?} is not expected to send a message in round {round}")
            }
            MessageError::DuplicateMessage { sender, round } => {
                write!(f, "party {sender:?} has already sent a message in round {round}")
            }
            MessageError::RoundMismatch {
                sender,
                expected,
                got,
            } => write!(
                f,
                "message from {sender:?} is addressed to round {got}, \
                but active round is {expected}"
            ),
            MessageError::RoundClosed { sender, round } => {
                write!(f, "message from {sender:?} arrived after round {round} was finalized")
            }
        }
    }
}

impl<P: fmt::Debug + 'static> std::error::Error for MessageError<P> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MessageError::Validation { reason, .. } => Some(reason),
            MessageError::UnexpectedSender { .. }
            | MessageError::DuplicateMessage { .. }
            | MessageError::RoundMismatch { .. }
            | MessageError::RoundClosed { .. } => None,
        }
    }
}

/// Round contract was violated, or protocol failed
///
/// Unlike [`MessageError`], this error is fatal to the run.
#[derive(Debug)]
pub enum RoundError {
    /// Round is finalized before every expected sender reported
    FinalizeBeforeComplete {
        /// Round being finalized
        round: RoundNumber,
        /// Amount of senders who haven't reported
        missing: usize,
    },
    /// Round is finalized twice
    AlreadyFinalized {
        /// Round being finalized
        round: RoundNumber,
    },
    /// Round output is requested before the round is finalized
    NotFinalized {
        /// The round
        round: RoundNumber,
    },
    /// Round output has already been taken
    AlreadyTaken {
        /// The round
        round: RoundNumber,
    },
    /// Protocol output is requested from a round that's not terminal
    NotTerminal {
        /// The round
        round: RoundNumber,
    },
    /// Message reports round number `0`
    InvalidRoundNumber,
    /// Next round doesn't have greater number than the finalized one
    RoundNotIncreasing {
        /// Finalized round
        from: RoundNumber,
        /// Next round
        to: RoundNumber,
    },
    /// Protocol-specific failure
    Protocol {
        /// Round that failed
        round: RoundNumber,
        /// Cause of the failure
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl RoundError {
    /// Wraps protocol-specific failure
    pub fn protocol(
        round: RoundNumber,
        err: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Protocol {
            round,
            source: Box::new(err),
        }
    }
}

impl fmt::Display for RoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundError::FinalizeBeforeComplete { round, missing } => write!(
                f,
                "round {round} is finalized while {missing} message(s) are still awaited"
            ),
            RoundError::AlreadyFinalized { round } => {
                write!(f, "round {round} has already been finalized")
            }
            RoundError::NotFinalized { round } => write!(f, "round {round} is not finalized"),
            RoundError::AlreadyTaken { round } => {
                write!(f, "output of round {round} has already been taken")
            }
            RoundError::NotTerminal { round } => {
                write!(f, "round {round} is not terminal, it has no result")
            }
            RoundError::InvalidRoundNumber => f.write_str("round number must be non-zero"),
            RoundError::RoundNotIncreasing { from, to } => {
                write!(f, "round {from} is followed by round {to}")
            }
            RoundError::Protocol { round, .. } => write!(f, "protocol failed at round {round}"),
        }
    }
}

impl std::error::Error for RoundError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RoundError::Protocol { source, .. } => Some(&**source),
            RoundError::FinalizeBeforeComplete { .. }
            | RoundError::AlreadyFinalized { .. }
            | RoundError::NotFinalized { .. }
            | RoundError::AlreadyTaken { .. }
            | RoundError::NotTerminal { .. }
            | RoundError::InvalidRoundNumber
            | RoundError::RoundNotIncreasing { .. } => None,
        }
    }
}
