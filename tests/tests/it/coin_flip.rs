#[generic_tests::define(attrs(test, test_case::case))]
mod generic {
    use std::error::Error as _;

    use roundel::{
        driver::{Driver, DriverError},
        protocols::coin_flip::{self, Coin, InvalidReveal},
        RoundError,
    };
    use roundel_tests::TestParty;

    #[test_case::case(1; "n1")]
    #[test_case::case(2; "n2")]
    #[test_case::case(3; "n3")]
    #[test_case::case(7; "n7")]
    fn parties_agree_on_coin<P: TestParty>(n: u16) {
        roundel_tests::init_tracing();
        let mut rng = rand_dev::DevRng::new();

        let registries = roundel_tests::registries::<P>(n);
        let mut drivers = registries
            .iter()
            .map(|registry| {
                let mut party_rng = rng.fork();
                let round1 = coin_flip::start(registry.clone(), &mut party_rng);
                Driver::builder(registry, round1).start()
            })
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        roundel_tests::simulate_shuffled(&mut drivers, &mut rng).unwrap();

        let coins: Vec<Coin> = roundel_tests::outputs(&mut drivers).unwrap();
        for coin in &coins[1..] {
            assert_eq!(coins[0], *coin);
        }
    }

    #[test]
    fn coin_is_xor_of_seeds<P: TestParty>() {
        let registries = roundel_tests::registries::<P>(3);
        let seeds = [[0b001; 32], [0b010; 32], [0b100; 32]];
        let mut drivers = registries
            .iter()
            .zip(seeds)
            .map(|(registry, seed)| {
                Driver::builder(registry, coin_flip::start_with_seed(registry.clone(), seed))
                    .start()
            })
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        roundel_tests::simulate(&mut drivers).unwrap();

        let coin = drivers[2].take_output().unwrap();
        assert_eq!(coin.seed, [0b111; 32]);
        assert!(coin.heads());
    }

    #[test]
    fn cheater_is_blamed<P: TestParty>() {
        let parties = P::parties(3);
        let registries = roundel_tests::registries::<P>(3);
        let mut drivers = registries
            .iter()
            .map(|registry| {
                Driver::builder(registry, coin_flip::start_with_seed(registry.clone(), [1; 32]))
                    .start()
            })
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        // Commitments are delivered honestly
        let commitments = drivers
            .iter_mut()
            .flat_map(|driver| driver.drain_outgoing().collect::<Vec<_>>())
            .collect::<Vec<_>>();
        for msg in commitments {
            for driver in drivers.iter_mut() {
                if msg.delivers_to(driver.me()) {
                    driver.handle(msg.clone().into_envelope()).unwrap();
                }
            }
        }

        // Party 1 reveals a seed it didn't commit to
        let mut reveals = drivers
            .iter_mut()
            .flat_map(|driver| driver.drain_outgoing().collect::<Vec<_>>())
            .collect::<Vec<_>>();
        for msg in &mut reveals {
            if msg.sender == parties[1] {
                msg.payload = coin_flip::Msg::Reveal(coin_flip::Reveal([2; 32]));
            }
        }

        let driver = &mut drivers[0];
        let mut result = None;
        for msg in reveals {
            if msg.delivers_to(driver.me()) {
                result = Some(driver.handle(msg.into_envelope()));
            }
        }

        let Some(Err(DriverError::Round(err))) = result else {
            panic!("protocol must fail")
        };
        assert!(matches!(err, RoundError::Protocol { .. }));
        let reason = err
            .source()
            .and_then(|source| source.downcast_ref::<InvalidReveal<P>>())
            .unwrap();
        assert_eq!(reason.culprits(), [parties[1].clone()]);
        assert!(driver.is_aborted());
    }

    #[instantiate_tests(<u16>)]
    mod u16 {}
    #[instantiate_tests(<String>)]
    mod string {}
}

#[test]
fn commitment_test_vector() {
    let commitment = roundel::protocols::coin_flip::Commitment::commit(&[0; 32]);
    assert_eq!(
        commitment.0,
        hex_literal::hex!("4cd60670996789a4956388be263f5d58c0cec4672d150c547c5ab405782942fa")
    );
    assert!(commitment.opens_to(&[0; 32]));
    assert!(!commitment.opens_to(&[1; 32]));

    let commitment = roundel::protocols::coin_flip::Commitment::commit(&[1; 32]);
    assert_eq!(
        commitment.0,
        hex_literal::hex!("28e6e4eb663e67d5b8fb31575ca90149eac621af43b547e60c63b34325c039ea")
    );
}
