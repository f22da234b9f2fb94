//! The server session: binding, running and shutting down.

use std::{
    future::{Future, IntoFuture},
    io,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use tokio::{net::TcpListener, sync::oneshot};

use crate::{
    error::Error, gateway, reloader::Reloader, responder::Responder, watcher::ChangeWatcher,
};

/// How long in-flight requests may take once shutdown started.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Resolved configuration of a [`Server`].
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Directory to serve.
    pub root: PathBuf,
    /// Host name or address to bind to.
    pub host: String,
    /// Port to bind to; `0` picks a free one.
    pub port: u16,
    /// Open the served page in a browser once listening.
    pub open_browser: bool,
    /// Window in which bursts of changes share one reload, at least
    /// [`MIN_DEBOUNCE`](crate::MIN_DEBOUNCE).
    pub debounce: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            host: "0.0.0.0".to_owned(),
            port: 3000,
            open_browser: false,
            debounce: Duration::from_millis(50),
        }
    }
}

/// A configured, not yet listening server.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    responder: Responder,
    reloader: Reloader,
}

impl Server {
    /// Validate `config` and create the session.
    pub fn new(config: ServerConfig) -> Result<Self, Error> {
        let responder = Responder::new(&config.root).map_err(|source| Error::InvalidRoot {
            path: config.root.clone(),
            source,
        })?;

        Ok(Self {
            config,
            responder,
            reloader: Reloader::new(),
        })
    }

    /// The canonical served root.
    pub fn root(&self) -> &Path {
        self.responder.root()
    }

    /// Handle for sending reloads to this server's clients.
    pub fn reloader(&self) -> Reloader {
        self.reloader.clone()
    }

    /// Bind the listening socket.
    pub async fn bind(self) -> Result<Listening, Error> {
        let host = self.config.host.as_str();
        let port = self.config.port;

        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| match source.kind() {
                io::ErrorKind::AddrInUse => Error::AddrInUse { port, source },
                _ => Error::Bind {
                    addr: format!("{host}:{port}"),
                    source,
                },
            })?;
        let local_addr = listener.local_addr().map_err(|source| Error::Bind {
            addr: format!("{host}:{port}"),
            source,
        })?;
        tracing::debug!(address = %local_addr, "listening");

        Ok(Listening {
            server: self,
            listener,
            local_addr,
        })
    }
}

/// A server whose socket is bound and which is ready to serve.
#[derive(Debug)]
pub struct Listening {
    server: Server,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Listening {
    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL for browsers on this machine.
    pub fn local_url(&self) -> String {
        format!("http://localhost:{}", self.local_addr.port())
    }

    /// URL for other machines on the network.
    pub fn network_url(&self) -> String {
        let ip = match self.local_addr.ip() {
            ip if ip.is_unspecified() => lan_ipv4().unwrap_or(ip),
            ip => ip,
        };
        format!("http://{}", SocketAddr::new(ip, self.local_addr.port()))
    }

    /// The canonical served root.
    pub fn root(&self) -> &Path {
        self.server.root()
    }

    /// Handle for sending reloads to this server's clients.
    pub fn reloader(&self) -> Reloader {
        self.server.reloader()
    }

    /// Serve until `shutdown` completes.
    ///
    /// On shutdown the watcher stops, reload clients are disconnected and no
    /// new connections are accepted. Requests still running after a short
    /// grace period are abandoned.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_url = self.local_url();
        let Listening {
            server, listener, ..
        } = self;

        if server.config.open_browser {
            crate::browser::open(&local_url);
        }

        let watcher = match ChangeWatcher::start(
            server.root(),
            server.reloader.clone(),
            server.config.debounce,
        ) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                tracing::warn!(error = %err, "cannot watch for changes, live reload disabled");
                None
            }
        };

        let reloader = server.reloader.clone();
        let app = gateway::router(server.responder, server.reloader);

        let (stopping, stopped) = oneshot::channel();
        let signal = async move {
            shutdown.await;
            tracing::info!("shutting down");
            if let Some(watcher) = watcher {
                watcher.stop();
            }
            reloader.close_all();
            stopping.send(()).ok();
        };

        let grace = async move {
            match stopped.await {
                Ok(()) => tokio::time::sleep(SHUTDOWN_GRACE).await,
                Err(_) => std::future::pending().await,
            }
        };

        tokio::select! {
            result = axum::serve(listener, app).with_graceful_shutdown(signal).into_future() => {
                result.map_err(Error::Serve)
            }
            () = grace => {
                tracing::warn!("gave up waiting for open connections");
                Ok(())
            }
        }
    }
}

/// Address of the first IPv4 interface reachable from other machines.
fn lan_ipv4() -> Option<IpAddr> {
    let interfaces = if_addrs::get_if_addrs()
        .inspect_err(|err| tracing::debug!(error = %err, "cannot list network interfaces"))
        .ok()?;
    first_external_ipv4(interfaces.iter().map(if_addrs::Interface::ip))
}

fn first_external_ipv4(addrs: impl IntoIterator<Item = IpAddr>) -> Option<IpAddr> {
    addrs
        .into_iter()
        .find(|ip| ip.is_ipv4() && !ip.is_loopback() && !ip.is_unspecified())
}
