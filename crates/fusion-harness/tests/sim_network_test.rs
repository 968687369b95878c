//! Protocol violations seen through the simulated network.

use fusion_harness::SimNetwork;
use fusion_proto::{DirectMessage, Frame, PublicMessage};

fn logged_in(net: &mut SimNetwork, label: &str, server: &str) {
    net.connect_client(label, server);
    net.client_send(label, &Frame::AnonymousLogin { username: label.to_string() });
    net.run_until_idle().unwrap();
}

#[test]
fn spoofed_sender_is_disconnected() {
    let mut net = SimNetwork::new(3);
    net.add_server("alpha");
    logged_in(&mut net, "bob", "alpha");
    logged_in(&mut net, "eve", "alpha");

    let forged =
        PublicMessage { origin_server: "alpha".to_string(), sender: "bob".to_string(), text: "hi".to_string() };
    net.client_send("eve", &Frame::PublicMessage(forged));
    net.run_until_idle().unwrap();

    assert!(net.client_disconnected("eve"));
    assert!(!net.client_disconnected("bob"));
    assert_eq!(net.client("bob").unwrap().received().len(), 1);
}

#[test]
fn wrong_origin_server_is_disconnected() {
    let mut net = SimNetwork::new(3);
    net.add_server("alpha");
    logged_in(&mut net, "bob", "alpha");

    let forged = DirectMessage {
        origin_server: "beta".to_string(),
        sender: "bob".to_string(),
        dest_server: "alpha".to_string(),
        recipient: "bob".to_string(),
        text: "hi".to_string(),
    };
    net.client_send("bob", &Frame::DirectMessage(forged));
    net.run_until_idle().unwrap();

    assert!(net.client_disconnected("bob"));
}

#[test]
fn server_frame_from_client_is_disconnected() {
    let mut net = SimNetwork::new(3);
    net.add_server("alpha");
    logged_in(&mut net, "bob", "alpha");

    net.client_send("bob", &Frame::FusionMerge { name: "bravo".to_string() });
    net.run_until_idle().unwrap();

    assert!(net.client_disconnected("bob"));
    let report = net.node("alpha").unwrap().report();
    assert!(report.clients.is_empty());
}

#[test]
fn chat_before_login_is_disconnected() {
    let mut net = SimNetwork::new(3);
    net.add_server("alpha");
    net.connect_client("anon", "alpha");

    let message =
        PublicMessage { origin_server: "alpha".to_string(), sender: "anon".to_string(), text: "hi".to_string() };
    net.client_send("anon", &Frame::PublicMessage(message));
    net.run_until_idle().unwrap();

    assert!(net.client_disconnected("anon"));
    assert!(net.client("anon").unwrap().received().is_empty());
}

#[test]
fn crashed_server_disconnects_its_clients() {
    let mut net = SimNetwork::new(3);
    net.add_server("alpha");
    logged_in(&mut net, "bob", "alpha");

    net.crash("alpha");
    net.run_until_idle().unwrap();

    assert!(net.client_disconnected("bob"));
    assert!(net.node("alpha").is_none());
}
