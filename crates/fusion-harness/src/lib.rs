//! Deterministic simulation harness for ChatFusion federations.
//!
//! Servers run the real [`fusion_core::Node`] over an in-memory network
//! whose links fragment traffic according to a seeded RNG. On top of it,
//! the [`scenario`] module offers a declarative builder whose runs must end
//! with an oracle check.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod scenario;
pub mod sim_network;

pub use sim_network::{SimClient, SimNetwork};
