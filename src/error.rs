//! Startup failures of the server.

use std::{io, path::PathBuf};

/// Errors that stop the server from running.
///
/// Per-request failures never surface here; they are answered with an error
/// page instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Another process is listening on the port already.
    #[error("Port {port} is already in use")]
    AddrInUse {
        /// The requested port.
        port: u16,
        /// Underlying error.
        source: io::Error,
    },

    /// Binding failed for any other reason.
    #[error("Could not listen on {addr}: {source}")]
    Bind {
        /// The requested `host:port`.
        addr: String,
        /// Underlying error.
        source: io::Error,
    },

    /// The directory to serve is missing or not a directory.
    #[error("Cannot serve {}: {source}", path.display())]
    InvalidRoot {
        /// The configured root.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },

    /// The accept loop failed.
    #[error("Server error: {0}")]
    Serve(#[source] io::Error),
}
