use std::sync::Arc;

use roundel::{
    driver::{Driver, DriverError, DEFAULT_REJECTIONS_LOG_SIZE},
    envelope::{Envelope, Outbox, RoundNumber},
    party::PartyRegistry,
    protocols::{coin_flip, xor},
    round::{MessageError, Next, Phase, Round, RoundError},
};

fn registry(me: u16, n: u16) -> Arc<PartyRegistry<u16>> {
    Arc::new(PartyRegistry::new(me, 0..n).unwrap())
}

fn short_contribution(sender: u16) -> Envelope<u16, xor::Msg> {
    Envelope::new(
        sender,
        xor::Msg::Round2(xor::Contribution {
            value: vec![0; 16],
        }),
    )
    .unwrap()
}

#[test]
fn too_many_rejections_abort_the_run() {
    roundel_tests::init_tracing();
    let registry = registry(0, 3);
    let mut driver = Driver::builder(&registry, xor::start_with_value(registry.clone(), [0; 32]))
        .set_rejections_limit(Some(2))
        .start()
        .unwrap();

    for _ in 0..2 {
        let err = driver.handle(short_contribution(1)).unwrap_err();
        assert!(!err.is_fatal());
        assert!(!driver.is_aborted());
    }

    let err = driver.handle(short_contribution(2)).unwrap_err();
    assert!(matches!(err, DriverError::TooManyRejections { limit: 2 }));
    assert!(err.is_fatal());
    assert!(driver.is_aborted());
    assert_eq!(driver.rejections().len(), 3);
    assert_eq!(driver.rejected_count(), 3);
    assert_eq!(*driver.rejections()[2].sender(), 2);

    let valid = Envelope::new(
        1,
        xor::Msg::Round2(xor::Contribution { value: vec![0; 32] }),
    )
    .unwrap();
    assert!(matches!(driver.handle(valid), Err(DriverError::Aborted)));
    assert!(matches!(driver.take_output(), Err(DriverError::Aborted)));
}

#[test]
fn rejections_are_unlimited_by_default() {
    let registry = registry(0, 2);
    let mut driver = Driver::builder(&registry, xor::start_with_value(registry.clone(), [0; 32]))
        .start()
        .unwrap();

    for _ in 0..100 {
        let err = driver.handle(short_contribution(1)).unwrap_err();
        assert!(err.rejection().is_some());
    }
    assert!(!driver.is_aborted());
    assert_eq!(driver.phase(), Some(Phase::Created));
}

#[test]
fn rejections_log_is_bounded() {
    let registry = registry(0, 2);
    let mut driver = Driver::builder(&registry, xor::start_with_value(registry.clone(), [0; 32]))
        .start()
        .unwrap();

    for _ in 0..10_000 {
        driver.handle(short_contribution(1)).unwrap_err();
    }
    assert_eq!(driver.rejected_count(), 10_000);
    assert_eq!(driver.rejections().len(), DEFAULT_REJECTIONS_LOG_SIZE);
    assert!(!driver.is_aborted());
}

#[test]
fn rejections_log_keeps_latest() {
    let registry = registry(0, 3);
    let mut driver = Driver::builder(&registry, xor::start_with_value(registry.clone(), [0; 32]))
        .set_rejections_log_size(2)
        .start()
        .unwrap();

    for sender in [1, 2, 1, 2, 1] {
        driver.handle(short_contribution(sender)).unwrap_err();
    }
    let senders = driver
        .rejections()
        .iter()
        .map(|err| *err.sender())
        .collect::<Vec<_>>();
    assert_eq!(senders, [2, 1]);
    assert_eq!(driver.rejected_count(), 5);
}

#[test]
fn limit_applies_without_rejections_log() {
    let registry = registry(0, 2);
    let mut driver = Driver::builder(&registry, xor::start_with_value(registry.clone(), [0; 32]))
        .set_rejections_log_size(0)
        .set_rejections_limit(Some(1))
        .start()
        .unwrap();

    assert!(driver.handle(short_contribution(1)).unwrap_err().rejection().is_some());
    assert!(driver.rejections().is_empty());
    assert!(matches!(
        driver.handle(short_contribution(1)),
        Err(DriverError::TooManyRejections { limit: 1 })
    ));
    assert!(driver.is_aborted());
}

#[test]
fn debug_output() {
    let registry = registry(0, 2);
    let mut driver = Driver::builder(&registry, xor::start_with_value(registry.clone(), [0; 32]))
        .start()
        .unwrap();
    driver.handle(short_contribution(1)).unwrap_err();
    assert_eq!(
        format!("{driver:?}"),
        "Driver { me: 0, round: Some(RoundNumber(2)), state: Running, rejected: 1 }"
    );

    let mut round1 = xor::start_with_value(registry, [0; 32]);
    round1.finalize(&mut Outbox::new(0)).unwrap();
    let next = round1.next().unwrap();
    assert_eq!(format!("{next:?}"), "Round(RoundNumber(2))");

    let Next::Round(mut round2) = next else {
        panic!("round 1 must be followed by round 2")
    };
    round2
        .process_message(
            1,
            xor::Msg::Round2(xor::Contribution { value: vec![0; 32] }),
        )
        .unwrap();
    round2.finalize(&mut Outbox::new(0)).unwrap();
    assert_eq!(format!("{:?}", round2.next().unwrap()), "Terminal");
}

#[test]
fn aborted_run_has_no_output() {
    let registry = registry(1, 2);
    let mut driver = Driver::builder(&registry, xor::start_with_value(registry.clone(), [0; 32]))
        .start()
        .unwrap();
    assert!(driver.has_outgoing());
    assert_eq!(driver.drain_outgoing().count(), 1);
    assert!(!driver.has_outgoing());

    driver.abort();
    assert!(driver.is_aborted());
    assert_eq!(driver.current_round(), None);
    assert_eq!(driver.waiting_for(), Vec::<u16>::new());

    let valid = Envelope::new(
        0,
        xor::Msg::Round2(xor::Contribution { value: vec![0; 32] }),
    )
    .unwrap();
    assert!(matches!(driver.handle(valid), Err(DriverError::Aborted)));
    assert!(matches!(driver.take_output(), Err(DriverError::Aborted)));
}

#[test]
fn payload_must_belong_to_addressed_round() {
    let registry = registry(0, 2);
    let round1 = coin_flip::start_with_seed(registry.clone(), [0; 32]);
    let mut driver = Driver::builder(&registry, round1).start().unwrap();
    assert_eq!(driver.current_round(), RoundNumber::new(2));

    // Envelope claims round 2, but carries the payload of round 3
    let envelope = Envelope {
        sender: 1,
        round: RoundNumber::new(2).unwrap(),
        payload: coin_flip::Msg::Reveal(coin_flip::Reveal([0; 32])),
    };
    let err = driver.handle(envelope).unwrap_err();
    assert!(matches!(
        err.rejection(),
        Some(MessageError::Validation { sender: 1, .. })
    ));
    assert_eq!(driver.phase(), Some(Phase::Created));
}

/// Round that claims to be followed by itself
struct Stuck;

impl Round for Stuck {
    type Party = u16;
    type Msg = xor::Msg;
    type Output = ();

    fn number(&self) -> RoundNumber {
        RoundNumber::FIRST
    }

    fn phase(&self) -> Phase {
        Phase::Complete
    }

    fn waiting_for(&self) -> Vec<u16> {
        vec![]
    }

    fn empty_payload(&self) -> Option<xor::Msg> {
        None
    }

    fn process_message(&mut self, sender: u16, _msg: xor::Msg) -> Result<(), MessageError<u16>> {
        Err(MessageError::UnexpectedSender {
            sender,
            round: self.number(),
        })
    }

    fn finalize(&mut self, _outbox: &mut Outbox<u16, xor::Msg>) -> Result<(), RoundError> {
        Ok(())
    }

    fn next(&mut self) -> Result<Next<u16, xor::Msg, ()>, RoundError> {
        Ok(Next::Round(Box::new(Stuck)))
    }
}

#[test]
fn round_numbers_must_increase() {
    let registry = registry(0, 2);
    let err = Driver::builder(&registry, Stuck).start().unwrap_err();
    assert!(matches!(
        err,
        DriverError::Round(RoundError::RoundNotIncreasing { from, to })
            if from == RoundNumber::FIRST && to == RoundNumber::FIRST
    ));
    assert!(err.is_fatal());
}
