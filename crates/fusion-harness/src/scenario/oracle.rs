//! Oracle functions for scenario verification.
//!
//! Oracle functions run at the end of scenarios to verify global consistency.
//! They receive a snapshot of the entire world state and assert invariants.

use fusion_proto::Frame;

use crate::scenario::World;

/// Oracle function type.
///
/// Receives immutable reference to world state and returns:
/// - `Ok(())` if all invariants hold
/// - `Err(message)` if verification fails
pub type OracleFn = Box<dyn FnOnce(&World) -> Result<(), String>>;

/// Every running server is led by `leader`, and `leader` lists all of them
/// as members.
pub fn single_leader(leader: &str) -> OracleFn {
    let leader = leader.to_string();
    Box::new(move |world| {
        for server in world.servers() {
            let actual = world.leader_of(&server);
            if actual.as_deref() != Some(leader.as_str()) {
                return Err(format!("{server} follows {actual:?}, expected {leader}"));
            }
        }
        let expected: Vec<String> = world.servers().into_iter().filter(|s| *s != leader).collect();
        let members = world.members_of(&leader);
        if members != expected {
            return Err(format!("{leader} has members {members:?}, expected {expected:?}"));
        }
        Ok(())
    })
}

/// `server` is led by `leader` (its own name when it leads).
pub fn leader_is(server: &str, leader: &str) -> OracleFn {
    let (server, leader) = (server.to_string(), leader.to_string());
    Box::new(move |world| {
        let actual = world.leader_of(&server);
        if actual.as_deref() == Some(leader.as_str()) {
            Ok(())
        } else {
            Err(format!("{server} follows {actual:?}, expected {leader}"))
        }
    })
}

/// `leader` has exactly the given members.
pub fn members_are(leader: &str, members: &[&str]) -> OracleFn {
    let leader = leader.to_string();
    let mut expected: Vec<String> = members.iter().map(ToString::to_string).collect();
    expected.sort();
    Box::new(move |world| {
        let actual = world.members_of(&leader);
        if actual == expected {
            Ok(())
        } else {
            Err(format!("{leader} has members {actual:?}, expected {expected:?}"))
        }
    })
}

/// Leader and member links agree in both directions.
///
/// A leader's members all follow it, and a subordinate's leader lists it.
/// Subordinates have no members of their own.
pub fn links_consistent() -> OracleFn {
    Box::new(|world| {
        for server in world.servers() {
            let leader = world.leader_of(&server).ok_or_else(|| format!("{server} vanished"))?;
            if leader == server {
                for member in world.members_of(&server) {
                    let follows = world.leader_of(&member);
                    if follows.as_deref() != Some(server.as_str()) {
                        return Err(format!("{server} lists {member}, which follows {follows:?}"));
                    }
                }
            } else {
                if !world.members_of(&leader).contains(&server) {
                    return Err(format!("{server} follows {leader}, which does not list it"));
                }
                let own = world.members_of(&server);
                if !own.is_empty() {
                    return Err(format!("subordinate {server} still has members {own:?}"));
                }
            }
        }
        Ok(())
    })
}

/// No server is negotiating a fusion or waiting for announced members.
pub fn settled() -> OracleFn {
    Box::new(|world| {
        for server in world.servers() {
            if world.is_fusing(&server) {
                return Err(format!("{server} is still fusing"));
            }
            let pending = world.pending_of(&server);
            if !pending.is_empty() {
                return Err(format!("{server} still expects members {pending:?}"));
            }
        }
        Ok(())
    })
}

/// The client's login was accepted and it is still connected.
pub fn logged_in(client: &str) -> OracleFn {
    let client = client.to_string();
    Box::new(move |world| {
        if world.logged_in(&client) && !world.disconnected(&client) {
            Ok(())
        } else {
            Err(format!("{client} is not logged in: {:?}", world.received(&client)))
        }
    })
}

/// The client was refused and then disconnected.
pub fn refused(client: &str) -> OracleFn {
    let client = client.to_string();
    Box::new(move |world| {
        if world.received(&client) != [Frame::LoginRefused].as_slice() {
            return Err(format!("{client} received {:?}, expected a refusal", world.received(&client)));
        }
        if !world.disconnected(&client) {
            return Err(format!("{client} was refused but is still connected"));
        }
        Ok(())
    })
}

/// Every connected, logged-in client received exactly one public message
/// with `text`.
pub fn public_delivered_once(text: &str) -> OracleFn {
    let text = text.to_string();
    Box::new(move |world| {
        for client in world.logged_clients() {
            let count = world.public_messages(&client).iter().filter(|m| m.text == text).count();
            if count != 1 {
                return Err(format!("{client} received {text:?} {count} times"));
            }
        }
        Ok(())
    })
}

/// `client` received exactly one direct message with `text`, and no other
/// client received it.
pub fn direct_delivered_to(client: &str, text: &str) -> OracleFn {
    let (client, text) = (client.to_string(), text.to_string());
    Box::new(move |world| {
        for label in world.network().client_labels() {
            let count = world.direct_messages(&label).iter().filter(|m| m.text == text).count();
            let expected = usize::from(label == client);
            if count != expected {
                return Err(format!("{label} received direct {text:?} {count} times, expected {expected}"));
            }
        }
        Ok(())
    })
}

/// No client received a message with `text`.
pub fn nobody_received(text: &str) -> OracleFn {
    let text = text.to_string();
    Box::new(move |world| {
        for label in world.network().client_labels() {
            let public = world.public_messages(&label).iter().any(|m| m.text == text);
            let direct = world.direct_messages(&label).iter().any(|m| m.text == text);
            if public || direct {
                return Err(format!("{label} received {text:?}"));
            }
        }
        Ok(())
    })
}

/// Combine multiple oracles into one.
pub fn all_of(oracles: Vec<OracleFn>) -> OracleFn {
    Box::new(move |world| {
        for oracle in oracles {
            oracle(world)?;
        }
        Ok(())
    })
}
