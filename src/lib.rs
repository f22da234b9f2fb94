//! A static file server that reloads your browser when files change.
//!
//! # Example
//!
//! ```no_run
//! use livehttpd::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new(ServerConfig {
//!         root: "public".into(),
//!         ..ServerConfig::default()
//!     })?;
//!
//!     let listening = server.bind().await?;
//!     eprintln!("listening on: {}", listening.local_url());
//!     listening
//!         .serve(async {
//!             tokio::signal::ctrl_c().await.ok();
//!         })
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # How it works
//!
//! Every HTML page served, including generated directory listings, has a
//! small script inserted before its closing `</body>` tag. The script opens a
//! WebSocket to the same host and port the page came from. Whenever a
//! non-hidden file below the served directory is created, changed or
//! removed, every connected tab receives the text message `reload` and
//! refreshes itself.
//!
//! The pieces are usable on their own:
//!
//! - [`Reloader`] is the set of connected tabs. It can trigger reloads from
//!   any Rust code, not just from the file watcher.
//! - [`InjectLayer`] is [tower] middleware that inserts a script into HTML
//!   responses of any service.
//! - [`Responder`] maps request paths to files and directory listings below a
//!   root, refusing anything that resolves outside of it.
//!
//! [tower]: https://docs.rs/tower
//!
//! # Heuristics
//!
//! A response receives the script when its [`Content-Type`] starts with
//! `text/html`, its status is successful, and [`Content-Encoding`] is not
//! set. Error pages are therefore never reloaded.
//!
//! [`Content-Type`]: https://developer.mozilla.org/en-US/docs/Web/HTTP/Headers/Content-Type
//! [`Content-Encoding`]: https://developer.mozilla.org/en-US/docs/Web/HTTP/Headers/Content-Encoding

#![warn(clippy::all, missing_docs, nonstandard_style, future_incompatible)]
#![forbid(unsafe_code)]

mod browser;
mod error;
mod gateway;
mod inject;
mod predicate;
mod reloader;
mod responder;
mod server;
mod update;
mod watcher;

pub use error::Error;
pub use gateway::router;
pub use inject::{inject_script, InjectLayer, InjectService, RELOAD_SCRIPT};
pub use predicate::{And, ContentTypeStartsWithPredicate, Predicate, SuccessPredicate};
pub use reloader::{ClientId, ReloadClient, Reloader, RELOAD_MESSAGE};
pub use responder::{RequestContext, Resolved, Responder, ResponderError};
pub use server::{Listening, Server, ServerConfig};
pub use update::{check_for_update, UpdateStatus};
pub use watcher::{ChangeEvent, ChangeKind, ChangeWatcher, MIN_DEBOUNCE};
