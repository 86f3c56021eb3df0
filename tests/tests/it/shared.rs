use std::thread;

use roundel::{
    driver::{Driver, Progress, SharedDriver},
    envelope::Envelope,
    protocols::xor::{self, Contribution, XorSum},
};

#[test]
fn concurrent_delivery() {
    roundel_tests::init_tracing();
    let n = 8u16;
    let registries = roundel_tests::registries::<u16>(n);
    let registry = &registries[0];
    let round1 = xor::start_with_value(registry.clone(), [0; 32]);
    let driver = SharedDriver::new(Driver::builder(registry, round1).start().unwrap());
    assert_eq!(driver.drain_outgoing().unwrap().len(), 1);

    let progress = thread::scope(|s| {
        let handles = (1..n)
            .map(|sender| {
                let driver = driver.clone();
                s.spawn(move || {
                    let msg = xor::Msg::Round2(Contribution {
                        value: vec![sender as u8; 32],
                    });
                    driver.handle(Envelope::new(sender, msg).unwrap())
                })
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap().unwrap())
            .collect::<Vec<_>>()
    });

    // Exactly one of the messages completes the round, no matter which
    assert_eq!(
        progress
            .iter()
            .filter(|p| **p == Progress::Finished)
            .count(),
        1
    );

    // 1 ^ 2 ^ ... ^ 7 = 0
    assert_eq!(driver.take_output().unwrap(), XorSum([0; 32]));
    assert!(driver.with(|driver| driver.rejections().is_empty()).unwrap());
}

#[test]
fn abort_through_any_handle() {
    let registries = roundel_tests::registries::<u16>(2);
    let registry = &registries[0];
    let round1 = xor::start_with_value(registry.clone(), [0; 32]);
    let driver = SharedDriver::new(Driver::builder(registry, round1).start().unwrap());

    let other = driver.clone();
    thread::spawn(move || other.abort().unwrap()).join().unwrap();

    assert!(driver.with(|driver| driver.is_aborted()).unwrap());
    assert!(driver.take_output().unwrap_err().is_fatal());
}
