use std::sync::{Arc, Mutex, MutexGuard};

use round_based::ProtocolMessage;

use crate::envelope::{Envelope, Outgoing};
use crate::party::PartyId;

use super::{Driver, DriverError, Progress};

/// Driver shared between threads
///
/// Transport may deliver messages from different peers concurrently. `SharedDriver` serializes
/// access to the driver: the lock is held for the whole [`handle`](SharedDriver::handle) call,
/// including finalization of the round it might trigger, so a message arriving concurrently
/// is processed either before the round is finalized or by the next round.
pub struct SharedDriver<P, M, O>(Arc<Mutex<Driver<P, M, O>>>);

impl<P, M, O> SharedDriver<P, M, O>
where
    P: PartyId,
    M: ProtocolMessage + Send + 'static,
    O: Send + 'static,
{
    /// Wraps the driver
    pub fn new(driver: Driver<P, M, O>) -> Self {
        Self(Arc::new(Mutex::new(driver)))
    }

    /// Handles a message received from the transport
    ///
    /// See [`Driver::handle`].
    pub fn handle(&self, envelope: Envelope<P, M>) -> Result<Progress, DriverError<P>> {
        self.lock()?.handle(envelope)
    }

    /// Takes messages emitted by rounds
    pub fn drain_outgoing(&self) -> Result<Vec<Outgoing<P, M>>, DriverError<P>> {
        Ok(self.lock()?.drain_outgoing().collect())
    }

    /// Takes the protocol output
    pub fn take_output(&self) -> Result<O, DriverError<P>> {
        self.lock()?.take_output()
    }

    /// Aborts the run
    pub fn abort(&self) -> Result<(), DriverError<P>> {
        self.lock()?.abort();
        Ok(())
    }

    /// Runs `f` with exclusive access to the driver
    pub fn with<R>(&self, f: impl FnOnce(&mut Driver<P, M, O>) -> R) -> Result<R, DriverError<P>> {
        Ok(f(&mut *self.lock()?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Driver<P, M, O>>, DriverError<P>> {
        self.0.lock().map_err(|_| DriverError::Poisoned)
    }
}

impl<P, M, O> Clone for SharedDriver<P, M, O> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
