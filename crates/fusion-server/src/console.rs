//! Operator console.
//!
//! Reads commands from standard input on a dedicated thread and hands them to
//! the readiness loop through its command queue:
//!
//! ```text
//! INFO                 print federation and client status
//! SHUTDOWN             stop accepting connections
//! SHUTDOWNNOW          close everything and exit
//! FUSION <host> <port> fuse with the server at host:port
//! ```

use std::{
    io::BufRead,
    net::{SocketAddr, ToSocketAddrs},
    thread::{self, JoinHandle},
};

use thiserror::Error;

use crate::reactor::Handle;

/// Operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print a status report
    Info,
    /// Stop accepting new connections
    Shutdown,
    /// Close every connection and stop the loop
    ShutdownNow,
    /// Start a fusion with the server listening on this address
    Fusion(SocketAddr),
}

/// A console line that is not a valid command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsoleError {
    /// Blank line
    #[error("empty command")]
    Empty,

    /// First word is not a command
    #[error("unknown command: {0}")]
    Unknown(String),

    /// Wrong arguments for a known command
    #[error("usage: {0}")]
    Usage(&'static str),

    /// Port is not a number in 0..=65535
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// Host did not resolve
    #[error("cannot resolve {host}: {reason}")]
    Resolve {
        /// Host as typed
        host: String,
        /// Resolver message
        reason: String,
    },
}

/// Parse one console line.
///
/// # Errors
///
/// Returns a [`ConsoleError`] describing why the line is not a command.
pub fn parse_command(line: &str) -> Result<Command, ConsoleError> {
    let mut words = line.split_whitespace();
    let Some(keyword) = words.next() else {
        return Err(ConsoleError::Empty);
    };

    let command = match keyword.to_ascii_uppercase().as_str() {
        "INFO" => Command::Info,
        "SHUTDOWN" => Command::Shutdown,
        "SHUTDOWNNOW" => Command::ShutdownNow,
        "FUSION" => {
            let (Some(host), Some(port)) = (words.next(), words.next()) else {
                return Err(ConsoleError::Usage("FUSION <host> <port>"));
            };
            let port: u16 = port.parse().map_err(|_| ConsoleError::InvalidPort(port.to_string()))?;
            Command::Fusion(resolve(host, port)?)
        },
        _ => return Err(ConsoleError::Unknown(keyword.to_string())),
    };

    if words.next().is_some() {
        return Err(ConsoleError::Usage(match command {
            Command::Fusion(_) => "FUSION <host> <port>",
            _ => "INFO | SHUTDOWN | SHUTDOWNNOW | FUSION <host> <port>",
        }));
    }
    Ok(command)
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, ConsoleError> {
    let resolve_error = |reason: String| ConsoleError::Resolve { host: host.to_string(), reason };
    (host, port)
        .to_socket_addrs()
        .map_err(|e| resolve_error(e.to_string()))?
        .next()
        .ok_or_else(|| resolve_error("no address found".to_string()))
}

/// Spawn the console thread reading `input` line by line.
///
/// The thread ends at end of input, after `SHUTDOWNNOW`, or once the loop is
/// gone.
///
/// # Errors
///
/// Returns the spawn error if the thread cannot be created.
pub fn spawn<R: BufRead + Send + 'static>(input: R, handle: Handle) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new().name("console".to_string()).spawn(move || run(input, &handle))
}

fn run<R: BufRead>(input: R, handle: &Handle) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Console input failed");
                return;
            },
        };

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(ConsoleError::Empty) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            },
        };

        let stop = command == Command::ShutdownNow;
        if handle.send(command).is_err() {
            return;
        }
        if stop {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_commands() {
        assert_eq!(parse_command("INFO"), Ok(Command::Info));
        assert_eq!(parse_command("  shutdown "), Ok(Command::Shutdown));
        assert_eq!(parse_command("SHUTDOWNNOW"), Ok(Command::ShutdownNow));
    }

    #[test]
    fn parses_fusion_with_literal_address() {
        assert_eq!(
            parse_command("FUSION 127.0.0.1 7777"),
            Ok(Command::Fusion("127.0.0.1:7777".parse().unwrap()))
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(parse_command(""), Err(ConsoleError::Empty));
        assert_eq!(parse_command("HELLO"), Err(ConsoleError::Unknown("HELLO".to_string())));
        assert_eq!(parse_command("FUSION 127.0.0.1"), Err(ConsoleError::Usage("FUSION <host> <port>")));
        assert_eq!(parse_command("FUSION 127.0.0.1 http"), Err(ConsoleError::InvalidPort("http".to_string())));
        assert_eq!(parse_command("FUSION 127.0.0.1 70000"), Err(ConsoleError::InvalidPort("70000".to_string())));
        assert!(matches!(parse_command("INFO now"), Err(ConsoleError::Usage(_))));
    }
}
