//! Framework for round-based interactive protocols
//!
//! Multi-party protocols often proceed in rounds: in every round, each party waits for a message
//! from every other party, validates and processes them, and then sends messages for the next
//! round. This crate provides the execution substrate for such protocols:
//! * [Party registry](party): fixed set of parties of the run, and the local party among them
//! * [Envelopes](envelope): messages tagged with sender and round number, and the outbox
//!   rounds send messages into
//! * [Rounds](round): a trait describing one step of the protocol, along with building blocks
//!   that take care of collecting and validating messages
//! * [Driver](driver): runs the rounds of the local party, routing received messages to the
//!   active round and advancing once the round is complete
//!
//! Network transport, discovery of parties, and encoding of messages are out of scope: driver
//! accepts already decoded [envelopes](envelope::Envelope) and emits
//! [outgoing messages](envelope::Outgoing) that need to be delivered.
//!
//! Protocol messages are described via [`ProtocolMessage`](round_based::ProtocolMessage) and
//! [`RoundMessage`](round_based::RoundMessage) traits of [`round_based`] crate: typically it's an
//! enum with a variant per round payload.
//!
//! A couple of [protocols] built on top of the framework are provided out of the box.
//!
//! ## Features
//! * `async` (default): [`Driver::run`](driver::Driver::run) carries out the protocol over
//!   [`Stream`](futures::Stream) of incoming and [`Sink`](futures::Sink) of outgoing messages
//! * `coin-flip` (default): [commit-reveal coin flipping](protocols::coin_flip) protocol
//! * `serde`: serialization of envelopes and protocol messages

#![forbid(unsafe_code, unused_crate_dependencies)]
#![deny(clippy::expect_used, clippy::unwrap_used, clippy::panic)]
#![deny(missing_docs)]
#![allow(clippy::type_complexity)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub use round_based;

pub mod driver;
pub mod envelope;
pub mod party;
pub mod protocols;
pub mod round;

pub use self::{
    driver::{Driver, DriverError, Progress},
    envelope::{Envelope, Outgoing, RoundNumber},
    party::{PartyId, PartyRegistry},
    round::{MessageError, Round, RoundError},
};
