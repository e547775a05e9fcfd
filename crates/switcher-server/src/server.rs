//! Server loop (C8).
//!
//! A single-threaded cooperative loop over one UDP socket: bind, run,
//! dispatch an action enum against shared state. One socket, one
//! 1-second-timeout receive per iteration, rebind on a transient socket
//! error, exit on SIGINT.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use switcher_core::session::SessionAction;
use switcher_proto::Envelope;
use switcher_state::StateStore;
use tokio::net::UdpSocket;

use crate::error::ServerError;
use crate::initial_state;
use crate::manager::ClientManager;
use crate::system_env::SystemEnv;

/// Datagrams up to this size are read in one `recv_from`, assuming an MTU
/// of at least 1500 bytes; this leaves headroom above the largest carrier.
const RECV_BUFFER_LEN: usize = 2048;

/// The running control-plane server: one UDP socket, one client manager,
/// one process-wide state store.
pub struct Server {
    socket: UdpSocket,
    manager: ClientManager<Instant>,
    state: StateStore,
    env: SystemEnv,
}

impl Server {
    /// Bind a UDP socket at `address:port` and take ownership of the
    /// already-loaded switcher state.
    pub async fn bind(address: &str, port: u16, state: StateStore) -> Result<Self, ServerError> {
        let socket = UdpSocket::bind((address, port)).await?;
        Ok(Self { socket, manager: ClientManager::new(), state, env: SystemEnv::new() })
    }

    /// The address the server is actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.socket.local_addr()?)
    }

    /// Run until SIGINT. Every iteration waits up to one second for a
    /// datagram, handles at most one, then ticks every session.
    pub async fn run(mut self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.local_addr()?, "server loop starting");
        let mut buf = vec![0u8; RECV_BUFFER_LEN];

        loop {
            tokio::select! {
                () = ctrl_c() => {
                    tracing::info!("received SIGINT, shutting down");
                    return Ok(());
                }
                result = tokio::time::timeout(Duration::from_secs(1), self.socket.recv_from(&mut buf)) => {
                    match result {
                        Ok(Ok((len, addr))) => self.handle_datagram(&buf[..len], addr).await,
                        Ok(Err(err)) => self.handle_socket_error(err).await?,
                        Err(_) => {}, // 1s receive timeout; fall through to the tick below
                    }
                }
            }
            self.tick_all().await;
        }
    }

    async fn handle_datagram(&mut self, datagram: &[u8], addr: SocketAddr) {
        let envelope = match Envelope::decode(datagram) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::debug!(%addr, %err, "dropping malformed packet");
                return;
            },
        };

        let session = self.manager.get_or_create(addr, &self.env);
        let actions = match session.handle_envelope(&envelope, &mut self.state, &self.env) {
            Ok(actions) => actions,
            Err(err) => {
                tracing::warn!(%addr, %err, "dropping misrouted envelope");
                return;
            },
        };

        for action in actions {
            self.dispatch(addr, action).await;
        }
    }

    async fn tick_all(&mut self) {
        let actions = self.manager.run_clients(&self.env);
        for (addr, action) in actions {
            self.dispatch(addr, action).await;
        }
    }

    async fn dispatch(&mut self, addr: SocketAddr, action: SessionAction) {
        match action {
            SessionAction::Send(envelope) => self.send_envelope(addr, &envelope).await,
            SessionAction::Multicast(carrier) => {
                self.manager.send_to_other_clients(addr, &carrier, &self.env);
            },
            SessionAction::EstablishedNeedsInitialDump => {
                let groups = initial_state::build(&self.state);
                if let Some(session) = self.manager.get(addr) {
                    session.enqueue_initial_dump(groups, &self.env);
                }
            },
            SessionAction::Finished => {
                tracing::info!(%addr, "session finished, removing");
                self.manager.remove(addr);
            },
        }
    }

    async fn send_envelope(&mut self, addr: SocketAddr, envelope: &Envelope) {
        let bytes = match envelope.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(%addr, %err, "failed to encode outbound envelope");
                return;
            },
        };
        if let Err(err) = self.socket.send_to(&bytes, addr).await {
            tracing::warn!(%addr, %err, "send failed");
        }
    }

    /// A transient socket error: rebind in place and keep running.
    async fn handle_socket_error(&mut self, err: std::io::Error) -> Result<(), ServerError> {
        tracing::warn!(%err, "socket error, rebinding");
        let local_addr = self.local_addr()?;
        self.socket = UdpSocket::bind(local_addr).await?;
        Ok(())
    }
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to install SIGINT handler");
        std::future::pending::<()>().await;
    }
}
