//! Federation scenarios: who ends up leading whom.

use fusion_harness::scenario::{oracle, Scenario};

#[test]
fn two_servers_fuse_under_smallest_name() {
    let result = Scenario::new()
        .server("alpha")
        .server("beta")
        .fuse("beta", "alpha")
        .oracle(oracle::all_of(vec![
            oracle::single_leader("alpha"),
            oracle::links_consistent(),
            oracle::settled(),
        ]))
        .run();

    assert_eq!(result, Ok(()));
}

#[test]
fn initiator_with_smaller_name_keeps_leadership() {
    let result = Scenario::new()
        .server("alpha")
        .server("beta")
        .fuse("alpha", "beta")
        .oracle(oracle::all_of(vec![oracle::single_leader("alpha"), oracle::settled()]))
        .run();

    assert_eq!(result, Ok(()));
}

#[test]
fn losing_leader_moves_its_members() {
    // bravo leads charlie; alpha then takes over both.
    let result = Scenario::new()
        .server("alpha")
        .server("bravo")
        .server("charlie")
        .fuse("charlie", "bravo")
        .fuse("alpha", "bravo")
        .oracle(oracle::all_of(vec![
            oracle::single_leader("alpha"),
            oracle::members_are("alpha", &["bravo", "charlie"]),
            oracle::links_consistent(),
            oracle::settled(),
        ]))
        .run();

    assert_eq!(result, Ok(()));
}

#[test]
fn two_federations_merge() {
    let result = Scenario::new()
        .server("alpha")
        .server("bravo")
        .server("charlie")
        .server("delta")
        .fuse("bravo", "alpha")
        .fuse("delta", "charlie")
        .fuse("charlie", "alpha")
        .oracle(oracle::all_of(vec![
            oracle::single_leader("alpha"),
            oracle::links_consistent(),
            oracle::settled(),
        ]))
        .run();

    assert_eq!(result, Ok(()));
}

#[test]
fn member_asks_its_leader_to_fuse() {
    // delta is a member of charlie, so charlie runs the negotiation.
    let result = Scenario::new()
        .server("alpha")
        .server("charlie")
        .server("delta")
        .fuse("delta", "charlie")
        .fuse("delta", "alpha")
        .oracle(oracle::all_of(vec![
            oracle::single_leader("alpha"),
            oracle::members_are("alpha", &["charlie", "delta"]),
            oracle::settled(),
        ]))
        .run();

    assert_eq!(result, Ok(()));
}

#[test]
fn fusing_with_a_member_is_forwarded_to_its_leader() {
    let result = Scenario::new()
        .server("alpha")
        .server("bravo")
        .server("charlie")
        .fuse("bravo", "alpha")
        .fuse("charlie", "bravo")
        .oracle(oracle::all_of(vec![
            oracle::single_leader("alpha"),
            oracle::links_consistent(),
            oracle::settled(),
        ]))
        .run();

    assert_eq!(result, Ok(()));
}

#[test]
fn concurrent_fusions_settle_consistently() {
    // Depending on interleaving zulu is refused with FusionInitKo or joins.
    let result = Scenario::new()
        .server("alpha")
        .server("bravo")
        .server("zulu")
        .together(|s| s.fuse("alpha", "bravo").fuse("zulu", "alpha"))
        .oracle(oracle::all_of(vec![
            oracle::leader_is("bravo", "alpha"),
            oracle::links_consistent(),
            oracle::settled(),
        ]))
        .run();

    assert_eq!(result, Ok(()));
}

#[test]
fn fusing_within_one_federation_changes_nothing() {
    // bravo forwards to alpha, which then refuses to fuse with itself.
    let result = Scenario::new()
        .server("alpha")
        .server("bravo")
        .fuse("bravo", "alpha")
        .fuse("alpha", "bravo")
        .oracle(oracle::all_of(vec![
            oracle::single_leader("alpha"),
            oracle::links_consistent(),
            oracle::settled(),
        ]))
        .run();

    assert_eq!(result, Ok(()));
}

#[test]
fn fusing_with_self_is_ignored() {
    let result = Scenario::new()
        .server("alpha")
        .fuse("alpha", "alpha")
        .oracle(oracle::all_of(vec![oracle::leader_is("alpha", "alpha"), oracle::settled()]))
        .run();

    assert_eq!(result, Ok(()));
}

#[test]
fn leader_crash_leaves_members_on_their_own() {
    let result = Scenario::new()
        .server("alpha")
        .server("bravo")
        .server("charlie")
        .fuse("bravo", "alpha")
        .fuse("charlie", "alpha")
        .crash("alpha")
        .oracle(oracle::all_of(vec![
            oracle::leader_is("bravo", "bravo"),
            oracle::leader_is("charlie", "charlie"),
            oracle::links_consistent(),
            oracle::settled(),
        ]))
        .run();

    assert_eq!(result, Ok(()));
}

#[test]
fn member_crash_is_forgotten_by_leader() {
    let result = Scenario::new()
        .server("alpha")
        .server("bravo")
        .server("charlie")
        .fuse("bravo", "alpha")
        .fuse("charlie", "alpha")
        .crash("bravo")
        .oracle(oracle::all_of(vec![oracle::single_leader("alpha"), oracle::members_are("alpha", &["charlie"])]))
        .run();

    assert_eq!(result, Ok(()));
}

#[test]
fn unknown_server_in_builder_is_an_error() {
    let result = Scenario::new().server("alpha").fuse("alpha", "nowhere").oracle(oracle::settled()).run();

    assert!(result.is_err());
}
