use std::fmt;

use futures::{Sink, SinkExt, Stream, StreamExt};
use round_based::ProtocolMessage;
use tracing::{event, Level};

use crate::envelope::{Envelope, Outgoing, RoundNumber};
use crate::party::PartyId;

use super::{Driver, DriverError};

impl<P, M, O> Driver<P, M, O>
where
    P: PartyId,
    M: ProtocolMessage + Send + 'static,
    O: Send + 'static,
{
    /// Carries out the protocol over the given channels
    ///
    /// Envelopes are drained one by one from `incoming`, emitted messages are sent into
    /// `outgoing`. Rejected messages don't interrupt the run, the latest of them are available
    /// via [`Driver::rejections`] afterwards.
    ///
    /// If `incoming` ends or fails before the protocol is finished, the run is aborted.
    pub async fn run<I, S, E>(&mut self, incoming: I, outgoing: S) -> Result<O, RunError<P>>
    where
        I: Stream<Item = Result<Envelope<P, M>, E>>,
        E: std::error::Error + Send + Sync + 'static,
        S: Sink<Outgoing<P, M>>,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        futures::pin_mut!(incoming);
        futures::pin_mut!(outgoing);

        loop {
            let queued = self.drain_outgoing().collect::<Vec<_>>();
            if !queued.is_empty() {
                for msg in queued {
                    outgoing.feed(msg).await.map_err(IoError::send)?;
                }
                outgoing.flush().await.map_err(IoError::send)?;
            }

            if self.is_finished() {
                return Ok(self.take_output()?);
            }

            let envelope = match incoming.next().await {
                Some(Ok(envelope)) => envelope,
                Some(Err(err)) => {
                    self.abort();
                    return Err(IoError::recv(err).into());
                }
                None => {
                    let round = self.current_round();
                    event!(Level::WARN, me = ?self.me, "incoming stream closed before protocol finished");
                    self.abort();
                    return Err(Reason::IncomingClosed { round }.into());
                }
            };

            match self.handle(envelope) {
                Ok(_) => (),
                Err(err) if !err.is_fatal() => (),
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Error of [`Driver::run`]
#[derive(Debug)]
pub struct RunError<P>(Reason<P>);

#[derive(Debug)]
enum Reason<P> {
    Driver(DriverError<P>),
    IoError(IoError),
    IncomingClosed { round: Option<RoundNumber> },
}

#[derive(Debug)]
enum IoError {
    Send(Box<dyn std::error::Error + Send + Sync>),
    Recv(Box<dyn std::error::Error + Send + Sync>),
}

impl IoError {
    fn send(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Send(Box::new(err))
    }
    fn recv(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Recv(Box::new(err))
    }
}

impl<P> RunError<P> {
    /// Driver error that ended the run, if that's the cause
    pub fn driver_error(&self) -> Option<&DriverError<P>> {
        match &self.0 {
            Reason::Driver(err) => Some(err),
            _ => None,
        }
    }

    /// Checks whether the run ended because incoming stream was closed
    pub fn is_incoming_closed(&self) -> bool {
        matches!(self.0, Reason::IncomingClosed { .. })
    }
}

impl<P: fmt::Debug> fmt::Display for RunError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Reason::Driver(_) => f.write_str("driver failed"),
            Reason::IoError(IoError::Send(_)) => f.write_str("i/o error: send message"),
            Reason::IoError(IoError::Recv(_)) => f.write_str("i/o error: recv message"),
            Reason::IncomingClosed { round: Some(round) } => {
                write!(f, "incoming stream closed at round {round}")
            }
            Reason::IncomingClosed { round: None } => f.write_str("incoming stream closed"),
        }
    }
}

impl<P: fmt::Debug + 'static> std::error::Error for RunError<P> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.0 {
            Reason::Driver(err) => Some(err),
            Reason::IoError(IoError::Send(err)) | Reason::IoError(IoError::Recv(err)) => {
                Some(&**err)
            }
            Reason::IncomingClosed { .. } => None,
        }
    }
}

impl<P> From<Reason<P>> for RunError<P> {
    fn from(err: Reason<P>) -> Self {
        Self(err)
    }
}
impl<P> From<DriverError<P>> for RunError<P> {
    fn from(err: DriverError<P>) -> Self {
        Self(Reason::Driver(err))
    }
}
impl<P> From<IoError> for RunError<P> {
    fn from(err: IoError) -> Self {
        Self(Reason::IoError(err))
    }
}
