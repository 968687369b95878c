//! World state for scenario execution.
//!
//! The World wraps the simulated network after a scenario ran and answers
//! the questions oracles ask: who leads whom, and which client saw which
//! messages.

use std::collections::BTreeSet;

use fusion_proto::{DirectMessage, Frame, PublicMessage};

use crate::sim_network::SimNetwork;

/// Network snapshot handed to oracles.
pub struct World {
    network: SimNetwork,
    steps: usize,
}

impl World {
    pub(crate) fn new(network: SimNetwork, steps: usize) -> Self {
        Self { network, steps }
    }

    /// Underlying network
    #[must_use]
    pub fn network(&self) -> &SimNetwork {
        &self.network
    }

    /// Network steps the scenario took
    #[must_use]
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Names of running servers, sorted
    #[must_use]
    pub fn servers(&self) -> Vec<String> {
        self.network.server_names()
    }

    /// Leader of `server`: its own name when it leads, `None` if it is not
    /// running.
    #[must_use]
    pub fn leader_of(&self, server: &str) -> Option<String> {
        let federation = self.network.node(server)?.federation();
        Some(match federation.leader() {
            Some(link) => link.identity.name.clone(),
            None => server.to_string(),
        })
    }

    /// Member names of `server`, sorted
    #[must_use]
    pub fn members_of(&self, server: &str) -> Vec<String> {
        self.network
            .node(server)
            .map(|n| n.federation().members().keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Pending member names of `server`, sorted
    #[must_use]
    pub fn pending_of(&self, server: &str) -> BTreeSet<String> {
        self.network.node(server).map(|n| n.federation().pending_members().clone()).unwrap_or_default()
    }

    /// Returns true if `server` is negotiating a fusion
    #[must_use]
    pub fn is_fusing(&self, server: &str) -> bool {
        self.network.node(server).is_some_and(|n| n.federation().is_fusing())
    }

    /// Frames received by a client, in order
    #[must_use]
    pub fn received(&self, client: &str) -> &[Frame] {
        self.network.client(client).map(|c| c.received()).unwrap_or(&[])
    }

    /// Public messages received by a client, in order
    #[must_use]
    pub fn public_messages(&self, client: &str) -> Vec<&PublicMessage> {
        self.received(client)
            .iter()
            .filter_map(|f| match f {
                Frame::PublicMessage(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    /// Direct messages received by a client, in order
    #[must_use]
    pub fn direct_messages(&self, client: &str) -> Vec<&DirectMessage> {
        self.received(client)
            .iter()
            .filter_map(|f| match f {
                Frame::DirectMessage(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    /// Returns true if the client's login was accepted
    #[must_use]
    pub fn logged_in(&self, client: &str) -> bool {
        matches!(self.received(client).first(), Some(Frame::LoginAccepted { .. }))
    }

    /// Labels of clients still connected and logged in, sorted
    #[must_use]
    pub fn logged_clients(&self) -> Vec<String> {
        self.network
            .client_labels()
            .into_iter()
            .filter(|c| self.logged_in(c) && !self.network.client_disconnected(c))
            .collect()
    }

    /// Returns true once the server closed the client's connection
    #[must_use]
    pub fn disconnected(&self, client: &str) -> bool {
        self.network.client_disconnected(client)
    }
}
