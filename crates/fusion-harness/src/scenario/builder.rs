//! Scenario builder API.
//!
//! Provides a declarative API for constructing scenario tests that enforce
//! the Oracle Pattern. Steps run in order; the network is stepped until idle
//! after each one unless steps are grouped with [`Scenario::together`].

use std::collections::BTreeMap;

use fusion_proto::{DirectMessage, Frame, PublicMessage};

use crate::{
    scenario::{OracleFn, World},
    sim_network::SimNetwork,
};

#[derive(Debug, Clone)]
enum Step {
    Server(String),
    Login { client: String, server: String, username: String },
    Fuse { initiator: String, target: String },
    Public { client: String, text: String },
    Direct { client: String, dest_server: String, recipient: String, text: String },
    Disconnect(String),
    Crash(String),
    Together(Vec<Step>),
}

/// Scenario builder.
///
/// ```
/// use fusion_harness::scenario::{oracle, Scenario};
///
/// Scenario::new()
///     .server("alpha")
///     .server("beta")
///     .fuse("beta", "alpha")
///     .oracle(oracle::single_leader("alpha"))
///     .run()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct Scenario {
    seed: u64,
    max_chunk: usize,
    steps: Vec<Step>,
}

impl Scenario {
    /// Create an empty scenario with seed 0
    #[must_use]
    pub fn new() -> Self {
        Self { seed: 0, max_chunk: 64, steps: Vec::new() }
    }

    /// Seed of the fragmentation RNG
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Largest slice delivered per connection and step
    #[must_use]
    pub fn with_max_chunk(mut self, max_chunk: usize) -> Self {
        self.max_chunk = max_chunk;
        self
    }

    /// Start a server
    #[must_use]
    pub fn server(mut self, name: &str) -> Self {
        self.steps.push(Step::Server(name.to_string()));
        self
    }

    /// Connect a client labelled `client` to `server` and log in as `client`
    #[must_use]
    pub fn client(self, client: &str, server: &str) -> Self {
        self.login(client, server, client)
    }

    /// Connect a client labelled `client` to `server` and log in as `username`
    #[must_use]
    pub fn login(mut self, client: &str, server: &str, username: &str) -> Self {
        self.steps.push(Step::Login {
            client: client.to_string(),
            server: server.to_string(),
            username: username.to_string(),
        });
        self
    }

    /// Operator `FUSION` on `initiator` with the address of `target`
    #[must_use]
    pub fn fuse(mut self, initiator: &str, target: &str) -> Self {
        self.steps.push(Step::Fuse { initiator: initiator.to_string(), target: target.to_string() });
        self
    }

    /// Client sends a public message
    #[must_use]
    pub fn public(mut self, client: &str, text: &str) -> Self {
        self.steps.push(Step::Public { client: client.to_string(), text: text.to_string() });
        self
    }

    /// Client sends a direct message to `recipient` on `dest_server`
    #[must_use]
    pub fn direct(mut self, client: &str, dest_server: &str, recipient: &str, text: &str) -> Self {
        self.steps.push(Step::Direct {
            client: client.to_string(),
            dest_server: dest_server.to_string(),
            recipient: recipient.to_string(),
            text: text.to_string(),
        });
        self
    }

    /// Client closes its connection
    #[must_use]
    pub fn disconnect(mut self, client: &str) -> Self {
        self.steps.push(Step::Disconnect(client.to_string()));
        self
    }

    /// Server dies, cutting all its connections
    #[must_use]
    pub fn crash(mut self, server: &str) -> Self {
        self.steps.push(Step::Crash(server.to_string()));
        self
    }

    /// Issue the steps added by `build` without letting the network settle
    /// between them.
    #[must_use]
    pub fn together(mut self, build: impl FnOnce(Scenario) -> Scenario) -> Self {
        let group = build(Scenario::new());
        self.steps.push(Step::Together(group.steps));
        self
    }

    /// Set the oracle function and return a runnable scenario.
    ///
    /// The oracle is mandatory - you cannot run a scenario without
    /// verification.
    #[must_use]
    pub fn oracle(self, oracle: OracleFn) -> RunnableScenario {
        RunnableScenario { scenario: self, oracle }
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}

/// A scenario with an oracle function that can be executed.
pub struct RunnableScenario {
    scenario: Scenario,
    oracle: OracleFn,
}

impl RunnableScenario {
    /// Execute the scenario and verify it with the oracle.
    ///
    /// # Errors
    ///
    /// Returns an error if a step refers to an unknown server or client, if
    /// the network never settles, or if the oracle fails.
    pub fn run(self) -> Result<(), String> {
        let world = self.execute()?;
        (self.oracle)(&world)
    }

    fn execute(&self) -> Result<World, String> {
        let mut network = SimNetwork::new(self.scenario.seed).with_max_chunk(self.scenario.max_chunk);
        let mut usernames = BTreeMap::new();
        let mut steps = 0;

        for step in &self.scenario.steps {
            apply(&mut network, &mut usernames, step)?;
            steps += network.run_until_idle()?;
        }
        Ok(World::new(network, steps))
    }
}

/// Usernames by client label.
type Usernames = BTreeMap<String, String>;

fn apply(network: &mut SimNetwork, usernames: &mut Usernames, step: &Step) -> Result<(), String> {
    match step {
        Step::Server(name) => {
            network.add_server(name);
        },
        Step::Login { client, server, username } => {
            if network.address(server).is_none() {
                return Err(format!("login to unknown server {server}"));
            }
            network.connect_client(client, server);
            usernames.insert(client.clone(), username.clone());
            network.client_send(client, &Frame::AnonymousLogin { username: username.clone() });
        },
        Step::Fuse { initiator, target } => {
            let address = network.address(target).ok_or_else(|| format!("fusion with unknown server {target}"))?;
            network.fuse(initiator, address);
        },
        Step::Public { client, text } => {
            let (origin_server, sender) = identity(network, usernames, client)?;
            network.client_send(client, &Frame::PublicMessage(PublicMessage { origin_server, sender, text: text.clone() }));
        },
        Step::Direct { client, dest_server, recipient, text } => {
            let (origin_server, sender) = identity(network, usernames, client)?;
            network.client_send(
                client,
                &Frame::DirectMessage(DirectMessage {
                    origin_server,
                    sender,
                    dest_server: dest_server.clone(),
                    recipient: recipient.clone(),
                    text: text.clone(),
                }),
            );
        },
        Step::Disconnect(client) => network.disconnect_client(client),
        Step::Crash(server) => network.crash(server),
        Step::Together(group) => {
            for step in group {
                apply(network, usernames, step)?;
            }
        },
    }
    Ok(())
}

/// Origin server and username a client logged in with.
fn identity(network: &SimNetwork, usernames: &Usernames, client: &str) -> Result<(String, String), String> {
    let sim = network.client(client).ok_or_else(|| format!("unknown client {client}"))?;
    match (sim.received().first(), usernames.get(client)) {
        (Some(Frame::LoginAccepted { server_name }), Some(username)) => Ok((server_name.clone(), username.clone())),
        _ => Err(format!("client {client} is not logged in")),
    }
}
