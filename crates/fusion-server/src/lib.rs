//! ChatFusion server
//!
//! Runs a [`fusion_core::Node`] on real sockets. The [`reactor`] owns every
//! socket in one `mio` readiness loop; the [`console`] thread feeds operator
//! commands into it.
//!
//! ```no_run
//! use fusion_server::{config::Config, reactor::Server};
//!
//! let config = Config::new("alpha", "0.0.0.0:7777".parse().unwrap());
//! let server = Server::bind(&config)?;
//! server.run()?;
//! # Ok::<(), fusion_server::error::ServerError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod console;
pub mod error;
pub mod reactor;

pub use config::{Cli, Config};
pub use console::{parse_command, Command};
pub use error::{Result, ServerError};
pub use reactor::{Handle, Server};

/// Install the global `tracing` subscriber.
///
/// Honors `RUST_LOG`; defaults to `info`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry().with(fmt::layer().with_target(true)).with(filter).init();
}
