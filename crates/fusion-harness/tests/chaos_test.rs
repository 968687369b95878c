//! Property tests over seeds and fragmentation.
//!
//! Whatever the slice sizes, fusions converge on one leader and every public
//! message reaches every client exactly once.

use fusion_harness::scenario::{oracle, Scenario};
use proptest::prelude::*;

const SERVERS: [&str; 5] = ["alpha", "bravo", "charlie", "delta", "echo"];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_fusion_converges(
        seed in any::<u64>(),
        max_chunk in 1usize..128,
        order in Just(SERVERS.to_vec()).prop_shuffle(),
        count in 2usize..=5,
    ) {
        let servers = &order[..count];
        let mut scenario = Scenario::new().with_seed(seed).with_max_chunk(max_chunk);
        for name in servers {
            scenario = scenario.server(name);
        }
        for pair in servers.windows(2) {
            scenario = scenario.fuse(pair[1], pair[0]);
        }

        let leader = servers.iter().min().copied().unwrap_or("alpha");
        let result = scenario
            .oracle(oracle::all_of(vec![
                oracle::single_leader(leader),
                oracle::links_consistent(),
                oracle::settled(),
            ]))
            .run();

        prop_assert_eq!(result, Ok(()));
    }

    #[test]
    fn prop_public_delivered_exactly_once(
        seed in any::<u64>(),
        max_chunk in 1usize..128,
        sender in 0usize..5,
    ) {
        let mut scenario = Scenario::new().with_seed(seed).with_max_chunk(max_chunk);
        for name in SERVERS {
            scenario = scenario.server(name);
        }
        for name in &SERVERS[1..] {
            scenario = scenario.fuse(name, SERVERS[0]);
        }
        for (i, name) in SERVERS.iter().enumerate() {
            scenario = scenario.client(&format!("user{i}"), name);
        }

        let result = scenario
            .public(&format!("user{sender}"), "hello everyone")
            .oracle(oracle::public_delivered_once("hello everyone"))
            .run();

        prop_assert_eq!(result, Ok(()));
    }
}
