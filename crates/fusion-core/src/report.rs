//! Operator status report (`INFO`).

use std::{fmt, net::SocketAddr};

use fusion_proto::ServerIdentity;

use crate::{federation::Federation, table::Connections};

/// Point-in-time view of a node, printed by the `INFO` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReport {
    /// Our name and listening address
    pub identity: ServerIdentity,
    /// Our leader, `None` when we lead
    pub leader: Option<ServerIdentity>,
    /// A fusion is being negotiated
    pub fusing: bool,
    /// Members and the remote address of their connection
    pub members: Vec<(String, Option<SocketAddr>)>,
    /// Announced members that have not merged yet
    pub pending_members: Vec<String>,
    /// Logged usernames
    pub clients: Vec<String>,
}

impl NodeReport {
    pub(crate) fn capture(federation: &Federation, conns: &Connections, clients: Vec<String>) -> Self {
        Self {
            identity: federation.identity().clone(),
            leader: federation.leader().map(|l| l.identity.clone()),
            fusing: federation.is_fusing(),
            members: federation
                .members()
                .iter()
                .map(|(name, &conn)| (name.clone(), conns.get(conn).map(|c| c.remote())))
                .collect(),
            pending_members: federation.pending_members().iter().cloned().collect(),
            clients,
        }
    }
}

impl fmt::Display for NodeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "server: {}", self.identity)?;
        match &self.leader {
            Some(leader) => writeln!(f, "leader: {leader}")?,
            None => writeln!(f, "leader: self")?,
        }
        writeln!(f, "fusing: {}", if self.fusing { "yes" } else { "no" })?;

        writeln!(f, "members: {}", self.members.len())?;
        for (name, remote) in &self.members {
            match remote {
                Some(remote) => writeln!(f, "  {name} via {remote}")?,
                None => writeln!(f, "  {name}")?,
            }
        }
        if !self.pending_members.is_empty() {
            writeln!(f, "pending: {}", self.pending_members.join(", "))?;
        }
        write!(f, "clients: {}", self.clients.len())?;
        if !self.clients.is_empty() {
            write!(f, " ({})", self.clients.join(", "))?;
        }
        Ok(())
    }
}
