use std::sync::Arc;

use rand::{seq::SliceRandom, RngCore};
use roundel::{
    driver::{Driver, DriverError},
    party::{PartyId, PartyRegistry},
    round_based::ProtocolMessage,
};

/// Party identifier that tests can be instantiated with
pub trait TestParty: PartyId {
    /// Identifiers of `n` distinct parties
    fn parties(n: u16) -> Vec<Self>;

    /// Identifier that never appears in [`TestParty::parties`]
    fn outsider() -> Self;
}

impl TestParty for u16 {
    fn parties(n: u16) -> Vec<Self> {
        (0..n).collect()
    }

    fn outsider() -> Self {
        u16::MAX
    }
}

impl TestParty for String {
    fn parties(n: u16) -> Vec<Self> {
        (0..n).map(|i| format!("party-{i}")).collect()
    }

    fn outsider() -> Self {
        "outsider".to_owned()
    }
}

/// Registry of every party among `n`
pub fn registries<P: TestParty>(n: u16) -> Vec<Arc<PartyRegistry<P>>> {
    let parties = P::parties(n);
    parties
        .iter()
        .map(|me| {
            let registry = PartyRegistry::new(me.clone(), parties.iter().cloned())
                .expect("valid registry");
            Arc::new(registry)
        })
        .collect()
}

/// Delivers messages between drivers until no party has anything to send
///
/// Delivery goes in waves: messages emitted by all parties are collected first, then each of
/// them is delivered to its recipients. Messages emitted while the wave is being delivered go
/// to the next wave.
pub fn simulate<P, M, O>(drivers: &mut [Driver<P, M, O>]) -> Result<(), DriverError<P>>
where
    P: PartyId,
    M: ProtocolMessage + Clone + Send + 'static,
    O: Send + 'static,
{
    simulate_inner(drivers, None)
}

/// Same as [`simulate`], but messages within every wave are delivered in random order
pub fn simulate_shuffled<P, M, O>(
    drivers: &mut [Driver<P, M, O>],
    rng: &mut impl RngCore,
) -> Result<(), DriverError<P>>
where
    P: PartyId,
    M: ProtocolMessage + Clone + Send + 'static,
    O: Send + 'static,
{
    simulate_inner(drivers, Some(rng))
}

fn simulate_inner<P, M, O>(
    drivers: &mut [Driver<P, M, O>],
    mut rng: Option<&mut dyn RngCore>,
) -> Result<(), DriverError<P>>
where
    P: PartyId,
    M: ProtocolMessage + Clone + Send + 'static,
    O: Send + 'static,
{
    loop {
        let mut wave = drivers
            .iter_mut()
            .flat_map(|driver| driver.drain_outgoing().collect::<Vec<_>>())
            .collect::<Vec<_>>();
        if wave.is_empty() {
            return Ok(());
        }
        if let Some(rng) = rng.as_deref_mut() {
            wave.shuffle(rng);
        }

        for msg in wave {
            for driver in drivers.iter_mut() {
                if msg.delivers_to(driver.me()) {
                    driver.handle(msg.clone().into_envelope())?;
                }
            }
        }
    }
}

/// Takes output of every driver
pub fn outputs<P, M, O>(drivers: &mut [Driver<P, M, O>]) -> Result<Vec<O>, DriverError<P>>
where
    P: PartyId,
    M: ProtocolMessage + Send + 'static,
    O: Send + 'static,
{
    drivers.iter_mut().map(|driver| driver.take_output()).collect()
}

/// Prints driver logs of the failed test
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}
