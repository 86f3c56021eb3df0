//! Protocol driver
//!
//! [`Driver`] owns the active round of the local party. It accepts [envelopes](Envelope) from
//! the transport, checks they're addressed to the active round, and forwards them to
//! [`Round::process_message`]. Once the round has heard from every expected sender, the driver
//! finalizes it and installs the next round, or, if the round was terminal, keeps the protocol
//! output until it's [taken](Driver::take_output).
//!
//! Messages emitted by rounds are queued in the driver and need to be
//! [drained](Driver::drain_outgoing) and delivered by the transport.
//!
//! Driver never inspects payloads, it's generic over protocol message `M`.
//!
//! ## Example
//! ```rust,no_run
//! # use std::sync::Arc;
//! use roundel::{driver::Driver, party::PartyRegistry, protocols::xor};
//!
//! # fn receive() -> roundel::envelope::Envelope<u16, xor::Msg> { unimplemented!() }
//! # fn deliver(_: roundel::envelope::Outgoing<u16, xor::Msg>) {}
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(PartyRegistry::new(0u16, [0, 1, 2])?);
//! # let value = [0u8; 32];
//! let round1 = xor::start_with_value(registry.clone(), value);
//!
//! let mut driver = Driver::builder(&registry, round1).start()?;
//! while !driver.is_finished() {
//!     driver.drain_outgoing().for_each(deliver);
//!     if let Err(err) = driver.handle(receive()) {
//!         if err.is_fatal() {
//!             return Err(err.into());
//!         }
//!     }
//! }
//! let xor::XorSum(sum) = driver.take_output()?;
//! # let _ = sum; Ok(()) }
//! ```

use std::collections::VecDeque;
use std::fmt;

use round_based::ProtocolMessage;
use tracing::{event, Level};

use crate::envelope::{Envelope, Outbox, Outgoing, RoundNumber};
use crate::party::{PartyId, PartyRegistry};
use crate::round::{
    BoxedRound, Handoff, InvalidPayload, MessageError, Next, Phase, Round, RoundError,
};

#[cfg(feature = "async")]
mod run;
mod shared;

#[cfg(feature = "async")]
pub use self::run::RunError;
pub use self::shared::SharedDriver;

/// Amount of latest rejections kept by the driver, unless set otherwise via
/// [`DriverBuilder::set_rejections_log_size`]
pub const DEFAULT_REJECTIONS_LOG_SIZE: usize = 32;

/// Drives rounds of the protocol run on behalf of the local party
pub struct Driver<P, M, O> {
    me: P,
    active: Option<BoxedRound<P, M, O>>,
    last_round: RoundNumber,
    outbox: Outbox<P, M>,
    output: Handoff<O>,
    state: State,
    rejected: usize,
    rejections: VecDeque<MessageError<P>>,
    rejections_log_size: usize,
    rejections_limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Running,
    Finished,
    Aborted,
}

/// Builder for [`Driver`]
pub struct DriverBuilder<P, M, O> {
    me: P,
    first_round: BoxedRound<P, M, O>,
    rejections_log_size: usize,
    rejections_limit: Option<usize>,
}

impl<P, M, O> DriverBuilder<P, M, O>
where
    P: PartyId,
    M: ProtocolMessage + Send + 'static,
    O: Send + 'static,
{
    /// Aborts the run once more than `limit` messages were rejected
    ///
    /// By default, there's no limit: rejected messages never abort the run.
    pub fn set_rejections_limit(mut self, limit: Option<usize>) -> Self {
        self.rejections_limit = limit;
        self
    }

    /// Keeps at most `size` latest rejections, see [`Driver::rejections`]
    ///
    /// Defaults to [`DEFAULT_REJECTIONS_LOG_SIZE`]. Older rejections are dropped, but still
    /// counted towards the [limit](Self::set_rejections_limit).
    pub fn set_rejections_log_size(mut self, size: usize) -> Self {
        self.rejections_log_size = size;
        self
    }

    /// Starts the protocol
    ///
    /// First round is installed and, if it doesn't expect any messages, immediately
    /// finalized. Messages it emits are available via [`Driver::drain_outgoing`].
    pub fn start(self) -> Result<Driver<P, M, O>, DriverError<P>> {
        let first = self.first_round.number();
        event!(Level::DEBUG, me = ?self.me, round = first.get(), "starting protocol");

        let mut driver = Driver {
            outbox: Outbox::new(self.me.clone()),
            me: self.me,
            active: Some(self.first_round),
            last_round: first,
            output: Handoff::new(),
            state: State::Running,
            rejected: 0,
            rejections: VecDeque::new(),
            rejections_log_size: self.rejections_log_size,
            rejections_limit: self.rejections_limit,
        };
        driver.advance()?;
        Ok(driver)
    }
}

impl<P, M, O> Driver<P, M, O>
where
    P: PartyId,
    M: ProtocolMessage + Send + 'static,
    O: Send + 'static,
{
    /// Constructs a builder of the driver for the local party of `registry`
    pub fn builder<R>(registry: &PartyRegistry<P>, first_round: R) -> DriverBuilder<P, M, O>
    where
        R: Round<Party = P, Msg = M, Output = O> + 'static,
    {
        DriverBuilder {
            me: registry.me().clone(),
            first_round: Box::new(first_round),
            rejections_log_size: DEFAULT_REJECTIONS_LOG_SIZE,
            rejections_limit: None,
        }
    }

    /// Handles a message received from the transport
    ///
    /// Returns [`DriverError::Rejected`] if the message is rejected: the run isn't affected
    /// in that case. Any other error means the run is over.
    pub fn handle(&mut self, envelope: Envelope<P, M>) -> Result<Progress, DriverError<P>> {
        match self.state {
            State::Running => (),
            State::Finished => return Err(DriverError::Finished),
            State::Aborted => return Err(DriverError::Aborted),
        }
        let Some(round) = self.active.as_mut() else {
            return Err(DriverError::Aborted);
        };

        let Envelope {
            sender,
            round: target,
            payload,
        } = envelope;
        let active = round.number();
        let outcome = if target != active {
            Err(MessageError::RoundMismatch {
                sender,
                expected: active,
                got: target,
            })
        } else if payload.round() != target.get() {
            Err(MessageError::Validation {
                sender,
                round: active,
                reason: InvalidPayload::new(format!(
                    "envelope is addressed to round {target}, but payload belongs to round {}",
                    payload.round()
                )),
            })
        } else {
            round
                .process_message(sender, payload)
                .map(|()| round.phase())
        };

        match outcome {
            Err(err) => Err(self.reject(err)),
            Ok(Phase::Complete) => self.advance(),
            Ok(_) => Ok(Progress::Stored { round: active }),
        }
    }

    /// Finalizes complete rounds, installing the following ones, until it reaches a round
    /// that awaits messages or the protocol is finished
    fn advance(&mut self) -> Result<Progress, DriverError<P>> {
        let mut from = None;
        loop {
            let Some(mut round) = self.active.take() else {
                return Err(DriverError::Aborted);
            };
            let number = round.number();
            if round.phase() != Phase::Complete {
                self.active = Some(round);
                return Ok(match from {
                    Some(from) => Progress::Advanced { from, to: number },
                    None => Progress::Stored { round: number },
                });
            }

            event!(Level::DEBUG, round = number.get(), "finalizing round");
            let next = round
                .finalize(&mut self.outbox)
                .and_then(|()| round.next());
            match next {
                Ok(Next::Round(next)) => {
                    let to = next.number();
                    if to <= number {
                        return Err(self.fail(RoundError::RoundNotIncreasing { from: number, to }));
                    }
                    event!(Level::DEBUG, from = number.get(), to = to.get(), "round advanced");
                    from.get_or_insert(number);
                    self.last_round = to;
                    self.active = Some(next);
                }
                Ok(Next::Terminal) => {
                    let stored = round
                        .result()
                        .and_then(|output| self.output.fill(number, output));
                    if let Err(err) = stored {
                        return Err(self.fail(err));
                    }
                    event!(Level::INFO, me = ?self.me, round = number.get(), "protocol finished");
                    self.state = State::Finished;
                    return Ok(Progress::Finished);
                }
                Err(err) => return Err(self.fail(err)),
            }
        }
    }

    fn reject(&mut self, err: MessageError<P>) -> DriverError<P> {
        event!(Level::WARN, me = ?self.me, error = %err, "message rejected");
        self.rejected += 1;
        if self.rejections_log_size > 0 {
            if self.rejections.len() == self.rejections_log_size {
                self.rejections.pop_front();
            }
            self.rejections.push_back(err.clone());
        }
        if let Some(limit) = self.rejections_limit {
            if self.rejected > limit {
                event!(Level::ERROR, limit, "too many messages rejected, aborting");
                self.abort();
                return DriverError::TooManyRejections { limit };
            }
        }
        DriverError::Rejected(err)
    }

    fn fail(&mut self, err: RoundError) -> DriverError<P> {
        event!(Level::ERROR, me = ?self.me, error = %err, "round failed, aborting");
        self.active = None;
        self.state = State::Aborted;
        DriverError::Round(err)
    }

    /// Aborts the run
    ///
    /// Active round is discarded. Protocol output is never produced afterwards.
    pub fn abort(&mut self) {
        if self.state == State::Running {
            event!(Level::INFO, me = ?self.me, round = self.last_round.get(), "run aborted");
            self.state = State::Aborted;
        }
        self.active = None;
    }

    /// Takes the protocol output
    ///
    /// Output is available once the terminal round is finalized, and can be taken only once.
    pub fn take_output(&mut self) -> Result<O, DriverError<P>> {
        match self.state {
            State::Finished => self
                .output
                .take(self.last_round)
                .map_err(DriverError::Round),
            State::Running => Err(DriverError::NotFinished),
            State::Aborted => Err(DriverError::Aborted),
        }
    }

    /// Takes messages emitted by rounds, to be delivered by the transport
    pub fn drain_outgoing(&mut self) -> impl Iterator<Item = Outgoing<P, M>> + '_ {
        self.outbox.drain()
    }

    /// Checks whether there are messages to be delivered
    pub fn has_outgoing(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Identifier of the local party
    pub fn me(&self) -> &P {
        &self.me
    }

    /// Number of the active round, `None` if the run is over
    pub fn current_round(&self) -> Option<RoundNumber> {
        self.active.as_ref().map(|round| round.number())
    }

    /// Phase of the active round, `None` if the run is over
    pub fn phase(&self) -> Option<Phase> {
        self.active.as_ref().map(|round| round.phase())
    }

    /// Parties the active round is still waiting for
    ///
    /// Deciding what to do with parties that never report (timeouts, eviction) is up to
    /// the transport.
    pub fn waiting_for(&self) -> Vec<P> {
        self.active
            .as_ref()
            .map(|round| round.waiting_for())
            .unwrap_or_default()
    }

    /// Zero value of the payload expected in the active round
    pub fn empty_payload(&self) -> Option<M> {
        self.active.as_ref().and_then(|round| round.empty_payload())
    }

    /// Checks whether the protocol output is available
    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }

    /// Checks whether the run was aborted
    pub fn is_aborted(&self) -> bool {
        self.state == State::Aborted
    }

    /// Latest rejected messages, in order of arrival
    ///
    /// Only the last few rejections are kept, see [`DriverBuilder::set_rejections_log_size`].
    pub fn rejections(&self) -> &VecDeque<MessageError<P>> {
        &self.rejections
    }

    /// Amount of messages rejected during the run
    pub fn rejected_count(&self) -> usize {
        self.rejected
    }
}

impl<P, M, O> fmt::Debug for Driver<P, M, O>
where
    P: PartyId,
    M: ProtocolMessage + Send,
    O: Send,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("me", &self.me)
            .field("round", &self.active.as_ref().map(|round| round.number()))
            .field("state", &self.state)
            .field("rejected", &self.rejected)
            .finish()
    }
}

/// Outcome of handling a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Message is stored, round awaits more messages
    Stored {
        /// Active round
        round: RoundNumber,
    },
    /// Round was finalized and the driver moved on to the next one
    Advanced {
        /// Finalized round
        from: RoundNumber,
        /// Now active round
        to: RoundNumber,
    },
    /// Terminal round was finalized, output is available
    Finished,
}

/// Driver error
#[derive(Debug)]
pub enum DriverError<P> {
    /// Message was rejected, run continues
    Rejected(MessageError<P>),
    /// Round failed, run is aborted
    Round(RoundError),
    /// Too many messages were rejected, run is aborted
    TooManyRejections {
        /// Configured limit
        limit: usize,
    },
    /// Output is requested before the protocol is finished
    NotFinished,
    /// Message arrived after the protocol was finished
    Finished,
    /// Run has been aborted
    Aborted,
    /// Lock of the [`SharedDriver`] is poisoned
    Poisoned,
}

impl<P> DriverError<P> {
    /// Checks whether the error means that the run is over without output
    pub fn is_fatal(&self) -> bool {
        match self {
            DriverError::Round(_)
            | DriverError::TooManyRejections { .. }
            | DriverError::Aborted
            | DriverError::Poisoned => true,
            DriverError::Rejected(_) | DriverError::NotFinished | DriverError::Finished => false,
        }
    }

    /// Returns the rejection if the error is [`DriverError::Rejected`]
    pub fn rejection(&self) -> Option<&MessageError<P>> {
        match self {
            DriverError::Rejected(err) => Some(err),
            _ => None,
        }
    }
}

impl<P: fmt::Debug> fmt::Display for DriverError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Rejected(_) => f.write_str("message rejected"),
            DriverError::Round(_) => f.write_str("round failed"),
            DriverError::TooManyRejections { limit } => {
                write!(f, "more than {limit} messages were rejected")
            }
            DriverError::NotFinished => f.write_str("protocol is not finished yet"),
            DriverError::Finished => f.write_str("protocol is already finished"),
            DriverError::Aborted => f.write_str("run was aborted"),
            DriverError::Poisoned => f.write_str("driver lock is poisoned"),
        }
    }
}

impl<P: fmt::Debug + 'static> std::error::Error for DriverError<P> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DriverError::Rejected(err) => Some(err),
            DriverError::Round(err) => Some(err),
            DriverError::TooManyRejections { .. }
            | DriverError::NotFinished
            | DriverError::Finished
            | DriverError::Aborted
            | DriverError::Poisoned => None,
        }
    }
}

impl<P> From<RoundError> for DriverError<P> {
    fn from(err: RoundError) -> Self {
        DriverError::Round(err)
    }
}
