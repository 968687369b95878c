#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::{io::BufReader, process::ExitCode};

use clap::Parser;
use fusion_server::{console, init_tracing, Cli, Server};
use tracing::{error, info};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!(target: "fusion_server", error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        },
    };

    let server = match Server::bind(&config) {
        Ok(server) => server,
        Err(e) => {
            error!(target: "fusion_server", error = %e, listen = %config.listen_addr, "Failed to start server");
            return ExitCode::FAILURE;
        },
    };

    info!(
        target: "fusion_server",
        name = %config.name,
        listen = %server.local_addr(),
        advertised = %server.identity().address,
        "Starting ChatFusion server"
    );

    if let Err(e) = console::spawn(BufReader::new(std::io::stdin()), server.handle()) {
        error!(target: "fusion_server", error = %e, "Failed to start console");
        return ExitCode::FAILURE;
    }

    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(target: "fusion_server", error = %e, "Server error");
            ExitCode::FAILURE
        },
    }
}
