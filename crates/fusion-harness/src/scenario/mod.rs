//! Scenario testing framework for deterministic simulation tests.
//!
//! This module provides a declarative API for writing scenario-based tests
//! that follow the Oracle Pattern. Scenarios drive the simulated network
//! until it settles after every step, and enforce oracle verification.

mod builder;
pub mod oracle;
mod world;

pub use builder::{RunnableScenario, Scenario};
pub use oracle::OracleFn;
pub use world::World;
