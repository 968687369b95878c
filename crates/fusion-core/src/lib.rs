//! ChatFusion server core logic
//!
//! This crate contains everything a ChatFusion server does except touching
//! sockets: byte buffering, frame dispatch, the client registry, and the
//! federation state machine.
//!
//! # Architecture
//!
//! ```text
//!      ┌──────────────────────────────┐
//!      │ fusion-core                  │
//!      │ - Connection controllers     │
//!      │ - Role-based dispatch        │
//!      │ - Federation state machine   │
//!      └──────────────────────────────┘
//!         ↓                       ↓
//! ┌──────────────────┐  ┌──────────────────┐
//! │ fusion-harness   │  │ fusion-server    │
//! │ - Memory streams │  │ - mio reactor    │
//! │ - Seeded chunks  │  │ - Real sockets   │
//! │ - Oracles        │  │ - Console        │
//! └──────────────────┘  └──────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - No I/O in core: sockets are passed in as `Read`/`Write` when ready, and
//!   outbound connects are requested, not performed.
//! - Single-threaded: a [`Node`] is driven by one loop; cross-thread input
//!   goes through that loop's command queue.
//!
//! # Modules
//!
//! - [`connection`]: per-socket buffers, decoder and readiness interest
//! - [`table`]: every connection of a node
//! - [`registry`]: logged clients
//! - [`federation`]: fusion negotiation and inter-server forwarding
//! - [`node`]: dispatch by connection role
//! - [`report`]: `INFO` output
//! - [`error`]: error types

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod connection;
pub mod error;
pub mod federation;
pub mod node;
pub mod registry;
pub mod report;
pub mod table;

pub use connection::{ConnId, Connection, Interest, Role};
pub use error::{ConnectionError, DispatchError, FederationError};
pub use federation::Federation;
pub use node::Node;
pub use registry::{ClientRegistry, LocalRegistry};
pub use report::NodeReport;
pub use table::Connections;
